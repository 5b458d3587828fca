//! Per-core L1 memory map used as circular-buffer capacity input
//!
//! The map is immutable configuration handed to a [`crate::Device`] at
//! construction. Every reserved region is treated as permanently occupied on
//! every core; circular buffers may only live in the gaps.
//!
//! ```text
//! 0x00000 ┌──────────────┐ boot code, mailboxes
//! 0x00800 ├──────────────┤ zeros
//! 0x00A00 ├──────────────┤ BRISC / TRISC0-2 firmware
//! 0x0DA00 ├──────────────┤ init relocation (local mem + NCRISC IRAM images)
//! 0x15200 ├──────────────┤ ← first auto-placed circular buffer
//!         │   free L1    │
//! 1464 KB └──────────────┘
//! ```
//!
//! RISC-V stacks live in core-local memory outside L1 on this architecture,
//! so they never constrain circular buffers. A map for a part that keeps
//! stacks in L1 lists them as ordinary reserved regions.
//!
//! Circular buffers start at the largest free span between reserved
//! regions; smaller holes between firmware images stay unused unless a
//! buffer is placed there explicitly. Auto-placement skips over any
//! reserved region above that base.

use crate::error::{DeviceError, Result};
use serde::{Deserialize, Serialize};

const MEM_L1_SIZE: u32 = 1464 * 1024;

const MEM_BOOT_CODE_BASE: u32 = 0;
const MEM_BOOT_CODE_SIZE: u32 = 4;
const MEM_MAILBOX_BASE: u32 = 4;
const MEM_MAILBOX_END: u32 = MEM_MAILBOX_BASE + 212;
const MEM_ZEROS_BASE: u32 = 2048;
const MEM_ZEROS_SIZE: u32 = 512;

const MEM_BRISC_FIRMWARE_SIZE: u32 = 8 * 1024;
const MEM_TRISC0_SIZE: u32 = 16 * 1024;
const MEM_TRISC1_SIZE: u32 = 12 * 1024;
const MEM_TRISC2_SIZE: u32 = 16 * 1024;
const MEM_BRISC_FIRMWARE_BASE: u32 = MEM_ZEROS_BASE + MEM_ZEROS_SIZE;
const MEM_TRISC0_BASE: u32 = MEM_BRISC_FIRMWARE_BASE + MEM_BRISC_FIRMWARE_SIZE;
const MEM_TRISC1_BASE: u32 = MEM_TRISC0_BASE + MEM_TRISC0_SIZE;
const MEM_TRISC2_BASE: u32 = MEM_TRISC1_BASE + MEM_TRISC1_SIZE;

const MEM_BRISC_LOCAL_SIZE: u32 = 4 * 1024;
const MEM_NCRISC_LOCAL_SIZE: u32 = 4 * 1024;
const MEM_TRISC_LOCAL_SIZE: u32 = 2 * 1024;
const MEM_NCRISC_IRAM_SIZE: u32 = 16 * 1024;

const MEM_BRISC_INIT_LOCAL_L1_BASE: u32 = MEM_TRISC2_BASE + MEM_TRISC2_SIZE;
const MEM_NCRISC_INIT_LOCAL_L1_BASE: u32 = MEM_BRISC_INIT_LOCAL_L1_BASE + MEM_BRISC_LOCAL_SIZE;
const MEM_TRISC0_INIT_LOCAL_L1_BASE: u32 = MEM_NCRISC_INIT_LOCAL_L1_BASE + MEM_NCRISC_LOCAL_SIZE;
const MEM_TRISC1_INIT_LOCAL_L1_BASE: u32 = MEM_TRISC0_INIT_LOCAL_L1_BASE + MEM_TRISC_LOCAL_SIZE;
const MEM_TRISC2_INIT_LOCAL_L1_BASE: u32 = MEM_TRISC1_INIT_LOCAL_L1_BASE + MEM_TRISC_LOCAL_SIZE;
const MEM_NCRISC_INIT_IRAM_L1_BASE: u32 = MEM_TRISC2_INIT_LOCAL_L1_BASE + MEM_TRISC_LOCAL_SIZE;

/// Base address of the all-zeros scratch region kernels read from when
/// clearing tiles.
pub const ZEROS_BASE: u32 = MEM_ZEROS_BASE;

/// Size of the all-zeros scratch region.
pub const ZEROS_SIZE: u32 = MEM_ZEROS_SIZE;

/// Named byte range that circular buffers may never touch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedRegion {
    pub name: String,
    pub base: u32,
    pub size: u32,
}

impl ReservedRegion {
    pub fn new(name: impl Into<String>, base: u32, size: u32) -> Self {
        Self {
            name: name.into(),
            base,
            size,
        }
    }

    pub const fn end(&self) -> u32 {
        self.base + self.size
    }

    pub const fn overlaps(&self, address: u32, size: u32) -> bool {
        address < self.end() && self.base < address + size
    }
}

/// Static per-core capacity table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryMap {
    /// Total L1 bytes per core.
    pub l1_size: u32,
    /// Circular buffer addresses are multiples of this.
    pub alignment: u32,
    /// Firmware, mailbox and relocation holes.
    pub reserved: Vec<ReservedRegion>,
}

impl MemoryMap {
    /// Wormhole Tensix L1 layout.
    pub fn wormhole() -> Self {
        Self {
            l1_size: MEM_L1_SIZE,
            alignment: 32,
            reserved: vec![
                ReservedRegion::new("boot_code", MEM_BOOT_CODE_BASE, MEM_BOOT_CODE_SIZE),
                ReservedRegion::new("mailbox", MEM_MAILBOX_BASE, MEM_MAILBOX_END - MEM_MAILBOX_BASE),
                ReservedRegion::new("zeros", MEM_ZEROS_BASE, MEM_ZEROS_SIZE),
                ReservedRegion::new("brisc_firmware", MEM_BRISC_FIRMWARE_BASE, MEM_BRISC_FIRMWARE_SIZE),
                ReservedRegion::new("trisc0_firmware", MEM_TRISC0_BASE, MEM_TRISC0_SIZE),
                ReservedRegion::new("trisc1_firmware", MEM_TRISC1_BASE, MEM_TRISC1_SIZE),
                ReservedRegion::new("trisc2_firmware", MEM_TRISC2_BASE, MEM_TRISC2_SIZE),
                ReservedRegion::new("brisc_init_local", MEM_BRISC_INIT_LOCAL_L1_BASE, MEM_BRISC_LOCAL_SIZE),
                ReservedRegion::new("ncrisc_init_local", MEM_NCRISC_INIT_LOCAL_L1_BASE, MEM_NCRISC_LOCAL_SIZE),
                ReservedRegion::new("trisc0_init_local", MEM_TRISC0_INIT_LOCAL_L1_BASE, MEM_TRISC_LOCAL_SIZE),
                ReservedRegion::new("trisc1_init_local", MEM_TRISC1_INIT_LOCAL_L1_BASE, MEM_TRISC_LOCAL_SIZE),
                ReservedRegion::new("trisc2_init_local", MEM_TRISC2_INIT_LOCAL_L1_BASE, MEM_TRISC_LOCAL_SIZE),
                ReservedRegion::new("ncrisc_init_iram", MEM_NCRISC_INIT_IRAM_L1_BASE, MEM_NCRISC_IRAM_SIZE),
            ],
        }
    }

    /// Parse and validate a JSON memory map.
    pub fn from_json(json: &str) -> Result<Self> {
        let map: Self = serde_json::from_str(json).map_err(|e| DeviceError::invalid_memory_map(e.to_string()))?;
        map.validate()?;
        Ok(map)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| DeviceError::invalid_memory_map(e.to_string()))
    }

    /// Check alignment, region bounds and pairwise disjointness.
    pub fn validate(&self) -> Result<()> {
        if self.alignment == 0 || !self.alignment.is_power_of_two() {
            return Err(DeviceError::invalid_memory_map(format!(
                "alignment {} is not a power of two",
                self.alignment
            )));
        }

        for (index, region) in self.reserved.iter().enumerate() {
            if region.size == 0 {
                return Err(DeviceError::invalid_memory_map(format!("region '{}' is empty", region.name)));
            }
            if region.base.checked_add(region.size).map_or(true, |end| end > self.l1_size) {
                return Err(DeviceError::invalid_memory_map(format!(
                    "region '{}' [{:#x}, +{}) exceeds L1 size {}",
                    region.name, region.base, region.size, self.l1_size
                )));
            }
            if let Some(other) = self.reserved[index + 1..]
                .iter()
                .find(|other| other.overlaps(region.base, region.size))
            {
                return Err(DeviceError::invalid_memory_map(format!(
                    "regions '{}' and '{}' overlap",
                    region.name, other.name
                )));
            }
        }

        if self.free_spans().is_empty() {
            return Err(DeviceError::invalid_memory_map("no allocatable L1 left between reserved regions"));
        }

        Ok(())
    }

    /// Aligned `[start, end)` ranges not covered by any reserved region,
    /// ascending.
    pub fn free_spans(&self) -> Vec<(u32, u32)> {
        let mut regions: Vec<&ReservedRegion> = self.reserved.iter().collect();
        regions.sort_by_key(|region| region.base);

        let mut spans = Vec::new();
        let mut cursor = 0u32;
        for region in regions {
            let start = self.align_up(cursor);
            if start < region.base {
                spans.push((start, region.base));
            }
            cursor = cursor.max(region.end());
        }
        let start = self.align_up(cursor);
        if start < self.l1_size {
            spans.push((start, self.l1_size));
        }
        spans
    }

    /// Start of the largest free span; the lowest one wins a tie.
    /// `l1_size` when nothing is free.
    pub fn allocatable_base(&self) -> u32 {
        self.free_spans()
            .into_iter()
            .fold(None, |best: Option<(u32, u32)>, span| match best {
                Some(best) if best.1 - best.0 >= span.1 - span.0 => Some(best),
                _ => Some(span),
            })
            .map_or(self.l1_size, |(start, _)| start)
    }

    /// Free bytes at or above [`Self::allocatable_base`] on one core.
    pub fn allocatable_size(&self) -> u32 {
        self.free_bytes_above(self.allocatable_base())
    }

    /// Free bytes in `[address, l1_size)` outside reserved regions.
    pub fn free_bytes_above(&self, address: u32) -> u32 {
        self.free_spans()
            .into_iter()
            .map(|(start, end)| end.saturating_sub(start.max(address)))
            .sum()
    }

    /// Lowest aligned address at or above both `from` and the allocatable
    /// base where `size` bytes avoid every reserved region and fit in L1.
    pub fn first_fit(&self, from: u32, size: u32) -> Option<u32> {
        let mut address = from.max(self.allocatable_base()).checked_next_multiple_of(self.alignment)?;
        loop {
            if address as u64 + size as u64 > self.l1_size as u64 {
                return None;
            }
            match self.reserved_overlap(address, size) {
                Some(region) => address = region.end().checked_next_multiple_of(self.alignment)?,
                None => return Some(address),
            }
        }
    }

    pub fn align_up(&self, address: u32) -> u32 {
        address.next_multiple_of(self.alignment)
    }

    pub fn is_aligned(&self, address: u32) -> bool {
        address % self.alignment == 0
    }

    /// First reserved region touching `[address, address + size)`.
    pub fn reserved_overlap(&self, address: u32, size: u32) -> Option<&ReservedRegion> {
        self.reserved.iter().find(|region| region.overlaps(address, size))
    }
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self::wormhole()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wormhole_layout() {
        let map = MemoryMap::wormhole();
        map.validate().unwrap();
        assert_eq!(map.l1_size, 1_499_136);
        assert_eq!(MEM_BRISC_FIRMWARE_BASE, 2560);
        assert_eq!(MEM_NCRISC_INIT_IRAM_L1_BASE, 70_144);
        assert_eq!(map.allocatable_base(), 86_528);
        assert_eq!(map.allocatable_size(), 1_499_136 - 86_528);
    }

    #[test]
    fn reserved_overlap_lookup() {
        let map = MemoryMap::wormhole();
        assert_eq!(map.reserved_overlap(0, 4).map(|r| r.name.as_str()), Some("boot_code"));
        assert_eq!(map.reserved_overlap(2100, 16).map(|r| r.name.as_str()), Some("zeros"));
        // gap between the mailboxes and the zeros region
        assert!(map.reserved_overlap(256, 1024).is_none());
        assert!(map.reserved_overlap(86_528, 2048).is_none());
    }

    #[test]
    fn json_round_trip() {
        let map = MemoryMap::wormhole();
        let parsed = MemoryMap::from_json(&map.to_json().unwrap()).unwrap();
        assert_eq!(parsed, map);
    }

    #[test]
    fn rejects_bad_maps() {
        let mut map = MemoryMap::wormhole();
        map.alignment = 24;
        assert!(map.validate().is_err());

        let mut map = MemoryMap::wormhole();
        map.reserved.push(ReservedRegion::new("clash", 100, 16));
        assert!(matches!(map.validate(), Err(DeviceError::InvalidMemoryMap(_))));

        let mut map = MemoryMap::wormhole();
        map.reserved.push(ReservedRegion::new("tail", map.l1_size - 16, 32));
        assert!(map.validate().is_err());

        assert!(MemoryMap::from_json("{\"l1_size\": 4}").is_err());
    }

    #[test]
    fn small_custom_map() {
        let map = MemoryMap::from_json(
            r#"{"l1_size": 65536, "alignment": 16,
                "reserved": [{"name": "fw", "base": 0, "size": 1000}]}"#,
        )
        .unwrap();
        assert_eq!(map.allocatable_base(), 1008);
    }

    fn stack_at_top() -> MemoryMap {
        MemoryMap {
            l1_size: 65_536,
            alignment: 32,
            reserved: vec![
                ReservedRegion::new("fw", 0, 1024),
                ReservedRegion::new("stack", 63_488, 2048),
            ],
        }
    }

    #[test]
    fn region_at_top_of_l1() {
        let map = stack_at_top();
        map.validate().unwrap();
        assert_eq!(map.free_spans(), vec![(1024, 63_488)]);
        assert_eq!(map.allocatable_base(), 1024);
        assert_eq!(map.allocatable_size(), 62_464);
        assert_eq!(map.first_fit(0, 62_464), Some(1024));
        assert_eq!(map.first_fit(0, 62_465), None);
        assert_eq!(map.first_fit(62_464, 1024), Some(62_464));
        assert_eq!(map.first_fit(62_464, 1056), None);
    }

    #[test]
    fn first_fit_skips_holes() {
        let mut map = stack_at_top();
        map.reserved.push(ReservedRegion::new("scratch", 8192, 1000));
        map.validate().unwrap();
        // the span above the hole is the larger one
        assert_eq!(map.allocatable_base(), 9216);
        assert_eq!(map.first_fit(0, 4096), Some(9216));

        let mut map = stack_at_top();
        map.reserved.push(ReservedRegion::new("scratch", 40_000, 1000));
        assert_eq!(map.allocatable_base(), 1024);
        assert_eq!(map.first_fit(36_000, 8192), Some(41_024));
        assert_eq!(map.free_bytes_above(40_000), 63_488 - 41_024);
    }

    #[test]
    fn fully_reserved_map_is_rejected() {
        let map = MemoryMap {
            l1_size: 4096,
            alignment: 32,
            reserved: vec![ReservedRegion::new("fw", 0, 2048), ReservedRegion::new("stack", 2048, 2048)],
        };
        assert!(map.free_spans().is_empty());
        assert_eq!(map.allocatable_base(), 4096);
        assert!(matches!(map.validate(), Err(DeviceError::InvalidMemoryMap(_))));
    }
}
