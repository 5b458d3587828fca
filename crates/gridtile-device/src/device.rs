//! Device handle: grid bounds, memory map and the circular buffer ledger
//!
//! A `Device` is cheap to clone; clones share one ledger, so reservations
//! made through any clone (or any [`crate::Program`] built on it) see each
//! other. Reserve and release are serialized by a single mutex.

use crate::circular_buffer::{CbLedger, CbWindow, CircularBuffer, CircularBufferConfig, SharedLedger};
use crate::core_coord::{CoreCoord, GridSize};
use crate::error::{DeviceError, Result};
use crate::memory_map::MemoryMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Compute grid of a wormhole part as exposed to programs.
pub const WORMHOLE_GRID: GridSize = GridSize::new(8, 8);

/// Handle to one accelerator's compute grid
#[derive(Debug, Clone)]
pub struct Device {
    grid: GridSize,
    memory_map: Arc<MemoryMap>,
    ledger: SharedLedger,
}

impl Device {
    /// Create a device with a validated memory map.
    #[tracing::instrument(skip(memory_map), fields(grid = %grid))]
    pub fn new(grid: GridSize, memory_map: MemoryMap) -> Result<Self> {
        memory_map.validate()?;
        if grid.num_cores() == 0 {
            return Err(DeviceError::EmptyCoreRangeSet);
        }
        let memory_map = Arc::new(memory_map);

        tracing::debug!(
            l1_size = memory_map.l1_size,
            allocatable_base = memory_map.allocatable_base(),
            reserved_regions = memory_map.reserved.len(),
            "device_created"
        );

        Ok(Self {
            grid,
            ledger: Arc::new(Mutex::new(CbLedger::new(Arc::clone(&memory_map), grid))),
            memory_map,
        })
    }

    /// 8x8 grid with the wormhole L1 layout.
    pub fn wormhole() -> Self {
        let memory_map = Arc::new(MemoryMap::wormhole());
        Self {
            grid: WORMHOLE_GRID,
            ledger: Arc::new(Mutex::new(CbLedger::new(Arc::clone(&memory_map), WORMHOLE_GRID))),
            memory_map,
        }
    }

    pub fn compute_with_storage_grid_size(&self) -> GridSize {
        self.grid
    }

    pub fn memory_map(&self) -> &MemoryMap {
        &self.memory_map
    }

    /// Reserve a circular buffer window on every core of the config's set.
    ///
    /// The returned handle releases the window when dropped.
    #[tracing::instrument(skip(self, config), fields(
        slot = config.buffer_index,
        num_tiles = config.num_tiles,
        size = config.size,
        cores = config.core_ranges.num_cores()
    ))]
    pub fn reserve_circular_buffer(&self, config: CircularBufferConfig) -> Result<CircularBuffer> {
        let start = std::time::Instant::now();
        let buffer = CircularBuffer::reserve(&self.ledger, config).inspect_err(|err| {
            tracing::debug!(error = %err, "circular_buffer_rejected");
        })?;

        tracing::debug!(
            duration_us = start.elapsed().as_micros() as u64,
            address = buffer.address(),
            "circular_buffer_reserved"
        );
        Ok(buffer)
    }

    /// Return a buffer's window to the ledger.
    pub fn release_circular_buffer(&self, buffer: CircularBuffer) -> Result<()> {
        if !buffer.belongs_to(&self.ledger) {
            return Err(DeviceError::ForeignBuffer {
                slot: buffer.buffer_index(),
            });
        }
        buffer.release();
        Ok(())
    }

    /// Number of live circular buffer reservations.
    pub fn live_reservations(&self) -> usize {
        self.ledger.lock().live_reservations()
    }

    /// Live windows on `core`, ordered by address.
    pub fn windows_on_core(&self, core: CoreCoord) -> Vec<CbWindow> {
        self.ledger.lock().windows(core).to_vec()
    }

    /// Free bytes above the highest live window of `core`.
    pub fn free_l1_bytes(&self, core: CoreCoord) -> u32 {
        self.ledger.lock().free_bytes(core)
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::wormhole()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_coord::{CoreRange, CoreRangeSet};
    use crate::data_format::DataFormat;
    use std::thread;

    fn all_cores() -> CoreRangeSet {
        CoreRange::new(CoreCoord::new(0, 0), CoreCoord::new(7, 7)).unwrap().into()
    }

    #[test]
    fn drop_releases_reservation() {
        let device = Device::wormhole();
        {
            let _cb = device
                .reserve_circular_buffer(CircularBufferConfig::new(all_cores(), 0, 2, DataFormat::Float16B))
                .unwrap();
            assert_eq!(device.live_reservations(), 1);
            assert_eq!(device.windows_on_core(CoreCoord::new(7, 7)).len(), 1);
        }
        assert_eq!(device.live_reservations(), 0);
        assert!(device.windows_on_core(CoreCoord::new(7, 7)).is_empty());
    }

    #[test]
    fn moved_handle_releases_once() {
        let device = Device::wormhole();
        let cb = device
            .reserve_circular_buffer(CircularBufferConfig::new(CoreCoord::new(0, 0), 0, 1, DataFormat::Float32))
            .unwrap();
        let mut owners = vec![cb];
        let moved = owners.pop().unwrap();

        let other = device
            .reserve_circular_buffer(CircularBufferConfig::new(CoreCoord::new(0, 0), 1, 1, DataFormat::Float32))
            .unwrap();
        device.release_circular_buffer(moved).unwrap();
        assert_eq!(device.live_reservations(), 1);
        assert_eq!(device.windows_on_core(CoreCoord::new(0, 0))[0].slot, other.buffer_index());
        drop(other);
        assert_eq!(device.live_reservations(), 0);
    }

    #[test]
    fn foreign_buffers_are_rejected() {
        let a = Device::wormhole();
        let b = Device::wormhole();
        let cb = a
            .reserve_circular_buffer(CircularBufferConfig::new(CoreCoord::new(0, 0), 0, 1, DataFormat::Float32))
            .unwrap();
        assert!(matches!(
            b.release_circular_buffer(cb),
            Err(DeviceError::ForeignBuffer { slot: 0 })
        ));
        // the rejected handle was dropped, which still frees it on its own device
        assert_eq!(a.live_reservations(), 0);
    }

    #[test]
    fn clones_share_the_ledger() {
        let device = Device::wormhole();
        let clone = device.clone();
        let _cb = clone
            .reserve_circular_buffer(CircularBufferConfig::new(CoreCoord::new(1, 1), 4, 1, DataFormat::Float32))
            .unwrap();
        let err = device
            .reserve_circular_buffer(CircularBufferConfig::new(CoreCoord::new(1, 1), 4, 1, DataFormat::Float32))
            .unwrap_err();
        assert!(matches!(err, DeviceError::SlotInUse { slot: 4, .. }));
    }

    #[test]
    fn concurrent_reservations_never_overlap() {
        let device = Device::wormhole();
        let handles: Vec<_> = (0..8u8)
            .map(|slot| {
                let device = device.clone();
                thread::spawn(move || {
                    device
                        .reserve_circular_buffer(CircularBufferConfig::new(all_cores(), slot, 3, DataFormat::Float16B))
                        .unwrap()
                })
            })
            .collect();
        let buffers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let mut addresses: Vec<_> = buffers.iter().map(|cb| (cb.address(), cb.size())).collect();
        addresses.sort_unstable();
        for pair in addresses.windows(2) {
            assert!(pair[0].0 + pair[0].1 <= pair[1].0);
        }
        assert_eq!(device.live_reservations(), 8);
    }

    #[test]
    fn custom_map_is_validated() {
        let mut map = MemoryMap::wormhole();
        map.alignment = 3;
        assert!(Device::new(GridSize::new(2, 2), map).is_err());
        assert!(Device::new(GridSize::new(0, 2), MemoryMap::wormhole()).is_err());
    }
}
