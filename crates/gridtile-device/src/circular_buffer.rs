//! Circular buffer reservations
//!
//! A circular buffer is a window of L1 replicated on every core of a core
//! range set: same slot index, same address, same size on each core. The
//! per-device [`CbLedger`] records which windows are live on which core and
//! rejects anything that would collide with firmware holes, other live
//! windows, or the end of L1.
//!
//! # Ownership
//!
//! [`CircularBuffer`] is a move-only handle. Dropping a handle that still
//! holds its reservation returns the window to the ledger; moving it
//! transfers that duty, so a window is released exactly once. Only the
//! owner ([`crate::Program`] or [`crate::Device`]) releases early, by value.
//!
//! # Device-side contract
//!
//! On the device each buffer is a bounded single-producer single-consumer
//! channel: the producer waits for free pages (`cb_reserve_back`) before
//! writing and publishes them (`cb_push_back`); the consumer waits for
//! committed pages (`cb_wait_front`) and frees them (`cb_pop_front`). The
//! tile count chosen here is that channel's capacity.

use crate::core_coord::{CoreCoord, CoreRangeSet, GridSize};
use crate::data_format::DataFormat;
use crate::error::{DeviceError, Result};
use crate::memory_map::MemoryMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Slots per core (slot indices `0..32`)
pub const NUM_CIRCULAR_BUFFERS: u8 = 32;

/// Conventional slot assignments used by the kernels
pub mod slots {
    pub const IN0: u8 = 0;
    pub const IN1: u8 = 1;
    pub const IN2: u8 = 2;
    pub const IN3: u8 = 3;
    pub const IN4: u8 = 4;
    pub const IN5: u8 = 5;
    pub const IN6: u8 = 6;
    pub const OUT0: u8 = 16;
    pub const INTERMED0: u8 = 24;
    pub const INTERMED1: u8 = 25;
}

/// Request for one circular buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircularBufferConfig {
    pub core_ranges: CoreRangeSet,
    pub buffer_index: u8,
    pub num_tiles: u32,
    pub size: u32,
    pub data_format: DataFormat,
    /// Explicit placement; `None` places above every live window.
    pub address: Option<u32>,
}

impl CircularBufferConfig {
    /// `num_tiles` pages of `data_format` tiles.
    pub fn new(core_ranges: impl Into<CoreRangeSet>, buffer_index: u8, num_tiles: u32, data_format: DataFormat) -> Self {
        Self {
            core_ranges: core_ranges.into(),
            buffer_index,
            num_tiles,
            size: num_tiles.saturating_mul(data_format.tile_size()),
            data_format,
            address: None,
        }
    }

    /// Override the byte size (row-major sticks are smaller than tiles).
    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    pub fn at_address(mut self, address: u32) -> Self {
        self.address = Some(address);
        self
    }
}

/// Identity of a live reservation in a ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReservationId(u64);

/// One live window as seen from a single core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CbWindow {
    pub id: ReservationId,
    pub slot: u8,
    pub address: u32,
    pub size: u32,
}

impl CbWindow {
    pub const fn end(&self) -> u32 {
        self.address + self.size
    }

    const fn overlaps(&self, address: u32, size: u32) -> bool {
        address < self.end() && self.address < address + size
    }
}

/// Per-device record of live circular buffer windows
#[derive(Debug)]
pub struct CbLedger {
    memory_map: Arc<MemoryMap>,
    grid: GridSize,
    cores: HashMap<CoreCoord, Vec<CbWindow>>,
    live: HashMap<ReservationId, CoreRangeSet>,
    next_id: u64,
}

impl CbLedger {
    pub fn new(memory_map: Arc<MemoryMap>, grid: GridSize) -> Self {
        Self {
            memory_map,
            grid,
            cores: HashMap::new(),
            live: HashMap::new(),
            next_id: 0,
        }
    }

    /// Validate `config` and record the window on every covered core.
    ///
    /// Returns the reservation id and the chosen address.
    pub fn reserve(&mut self, config: &CircularBufferConfig) -> Result<(ReservationId, u32)> {
        let slot = config.buffer_index;
        if slot >= NUM_CIRCULAR_BUFFERS {
            return Err(DeviceError::InvalidSlot {
                slot,
                max: NUM_CIRCULAR_BUFFERS,
            });
        }
        if config.num_tiles == 0 || config.size == 0 || config.size % config.num_tiles != 0 {
            return Err(DeviceError::InvalidBufferGeometry {
                num_tiles: config.num_tiles,
                size: config.size,
            });
        }
        if config.core_ranges.is_empty() {
            return Err(DeviceError::EmptyCoreRangeSet);
        }

        for core in config.core_ranges.cores() {
            self.grid.check(core)?;
            if self.windows(core).iter().any(|window| window.slot == slot) {
                return Err(DeviceError::SlotInUse { slot, core });
            }
        }

        let address = match config.address {
            Some(address) => {
                if !self.memory_map.is_aligned(address) {
                    return Err(DeviceError::MisalignedAddress {
                        address,
                        alignment: self.memory_map.alignment,
                    });
                }
                address
            }
            None => self.next_free_address(&config.core_ranges, config.size),
        };
        self.check_window(&config.core_ranges, address, config.size)?;

        let id = ReservationId(self.next_id);
        self.next_id += 1;
        for core in config.core_ranges.cores() {
            let windows = self.cores.entry(core).or_default();
            windows.push(CbWindow {
                id,
                slot,
                address,
                size: config.size,
            });
            windows.sort_by_key(|window| window.address);
        }
        self.live.insert(id, config.core_ranges.clone());

        Ok((id, address))
    }

    /// Free the window on every core it covers. Unknown ids are ignored.
    pub fn release(&mut self, id: ReservationId) -> bool {
        let Some(core_ranges) = self.live.remove(&id) else {
            return false;
        };
        for core in core_ranges.cores() {
            if let Some(windows) = self.cores.get_mut(&core) {
                windows.retain(|window| window.id != id);
                if windows.is_empty() {
                    self.cores.remove(&core);
                }
            }
        }
        true
    }

    pub fn live_reservations(&self) -> usize {
        self.live.len()
    }

    /// Live windows on `core`, ordered by address.
    pub fn windows(&self, core: CoreCoord) -> &[CbWindow] {
        self.cores.get(&core).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Bytes still free above the highest live window of `core`, not
    /// counting reserved regions.
    pub fn free_bytes(&self, core: CoreCoord) -> u32 {
        let top = self.windows(core).iter().map(CbWindow::end).max().unwrap_or(0);
        let map = &self.memory_map;
        map.free_bytes_above(map.align_up(top).max(map.allocatable_base()))
    }

    /// First fit above every live window on the covered cores, skipping
    /// reserved regions. When nothing fits, the plain bump address is
    /// returned so the window check reports why.
    fn next_free_address(&self, core_ranges: &CoreRangeSet, size: u32) -> u32 {
        let top = core_ranges
            .cores()
            .flat_map(|core| self.windows(core).iter().map(CbWindow::end))
            .max()
            .unwrap_or(0);
        self.memory_map
            .first_fit(top, size)
            .unwrap_or_else(|| self.memory_map.allocatable_base().max(self.memory_map.align_up(top)))
    }

    fn check_window(&self, core_ranges: &CoreRangeSet, address: u32, size: u32) -> Result<()> {
        let capacity = self.memory_map.l1_size;
        if address as u64 + size as u64 > capacity as u64 {
            return Err(DeviceError::CapacityExceeded { address, size, capacity });
        }
        if let Some(region) = self.memory_map.reserved_overlap(address, size) {
            return Err(DeviceError::ReservedRegionOverlap {
                address,
                size,
                region: region.name.clone(),
            });
        }
        for core in core_ranges.cores() {
            if let Some(window) = self.windows(core).iter().find(|window| window.overlaps(address, size)) {
                return Err(DeviceError::WindowOverlap {
                    address,
                    size,
                    slot: window.slot,
                    core,
                });
            }
        }
        Ok(())
    }
}

pub(crate) type SharedLedger = Arc<Mutex<CbLedger>>;

/// Owned circular buffer reservation
#[derive(Debug)]
pub struct CircularBuffer {
    ledger: SharedLedger,
    reservation: Option<ReservationId>,
    core_ranges: CoreRangeSet,
    buffer_index: u8,
    num_tiles: u32,
    size: u32,
    address: u32,
    data_format: DataFormat,
}

impl CircularBuffer {
    pub(crate) fn reserve(ledger: &SharedLedger, config: CircularBufferConfig) -> Result<Self> {
        let (id, address) = ledger.lock().reserve(&config)?;
        gridtile_tracing::performance::record_reservation(
            config.buffer_index,
            config.size,
            address,
            config.core_ranges.num_cores() as usize,
        );

        Ok(Self {
            ledger: Arc::clone(ledger),
            reservation: Some(id),
            core_ranges: config.core_ranges,
            buffer_index: config.buffer_index,
            num_tiles: config.num_tiles,
            size: config.size,
            address,
            data_format: config.data_format,
        })
    }

    /// Return the window to the ledger now. Called by owners only.
    pub(crate) fn release(mut self) {
        self.release_reservation();
    }

    pub(crate) fn belongs_to(&self, ledger: &SharedLedger) -> bool {
        Arc::ptr_eq(&self.ledger, ledger)
    }

    fn release_reservation(&mut self) {
        if let Some(id) = self.reservation.take() {
            self.ledger.lock().release(id);
            tracing::trace!(slot = self.buffer_index, address = self.address, "circular_buffer_released");
        }
    }

    pub fn core_range_set(&self) -> &CoreRangeSet {
        &self.core_ranges
    }

    pub fn buffer_index(&self) -> u8 {
        self.buffer_index
    }

    pub fn num_tiles(&self) -> u32 {
        self.num_tiles
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Bytes per page (one tile, or one row-major stick).
    pub fn page_size(&self) -> u32 {
        self.size / self.num_tiles
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn data_format(&self) -> DataFormat {
        self.data_format
    }

    pub fn is_on_core(&self, core: CoreCoord) -> bool {
        self.core_ranges.contains(core)
    }

    pub fn reservation(&self) -> Option<ReservationId> {
        self.reservation
    }
}

impl Drop for CircularBuffer {
    fn drop(&mut self) {
        self.release_reservation();
    }
}
