//! Error types for device-level planning

use crate::core_coord::{CoreCoord, CoreRange};

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Fatal precondition violations raised while committing resources to the grid
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// Core lies outside the compute grid
    #[error("core {core} is outside the {grid_x}x{grid_y} compute grid")]
    CoreOutOfGrid { core: CoreCoord, grid_x: u32, grid_y: u32 },

    /// Range start is past its end on some axis
    #[error("invalid core range: start {start} is past end {end}")]
    InvalidCoreRange { start: CoreCoord, end: CoreCoord },

    /// Two ranges of one set share a core
    #[error("core ranges {first} and {second} overlap")]
    OverlappingRanges { first: CoreRange, second: CoreRange },

    /// Circular buffer set built from no cores
    #[error("core range set is empty")]
    EmptyCoreRangeSet,

    /// Slot index beyond the per-core slot table
    #[error("circular buffer slot {slot} out of range (must be < {max})")]
    InvalidSlot { slot: u8, max: u8 },

    /// Slot already bound on a core
    #[error("circular buffer slot {slot} already reserved on core {core}")]
    SlotInUse { slot: u8, core: CoreCoord },

    /// Zero-sized, zero-tile or uneven-page reservation
    #[error("invalid circular buffer geometry: {num_tiles} tiles in {size} bytes")]
    InvalidBufferGeometry { num_tiles: u32, size: u32 },

    /// Explicit address violates the allocation alignment
    #[error("address {address:#x} is not aligned to {alignment} bytes")]
    MisalignedAddress { address: u32, alignment: u32 },

    /// Window runs past the end of L1
    #[error("circular buffer [{address:#x}, +{size}) exceeds L1 capacity of {capacity} bytes")]
    CapacityExceeded { address: u32, size: u32, capacity: u32 },

    /// Window touches a firmware/mailbox/stack hole
    #[error("circular buffer [{address:#x}, +{size}) overlaps reserved region '{region}'")]
    ReservedRegionOverlap { address: u32, size: u32, region: String },

    /// Window touches a live reservation
    #[error("circular buffer [{address:#x}, +{size}) overlaps slot {slot} on core {core}")]
    WindowOverlap {
        address: u32,
        size: u32,
        slot: u8,
        core: CoreCoord,
    },

    /// Buffer handed back to a device that did not reserve it
    #[error("circular buffer on slot {slot} was reserved on another device")]
    ForeignBuffer { slot: u8 },

    /// Runtime arguments set for a core no kernel of the program runs on
    #[error("core {core} is not covered by kernel '{kernel}'")]
    CoreNotInKernel { core: CoreCoord, kernel: String },

    /// Kernel id not issued by this program
    #[error("unknown kernel handle {0}")]
    UnknownKernel(usize),

    /// Coordinate does not fit its NOC field
    #[error("NOC coordinate {value} does not fit in {bits} bits")]
    NocFieldOverflow { value: u32, bits: u32 },

    /// Local offset does not fit below the node-id fields
    #[error("NOC local offset {offset:#x} does not fit in {bits} bits")]
    NocOffsetOverflow { offset: u64, bits: u32 },

    /// Memory map failed validation
    #[error("invalid memory map: {0}")]
    InvalidMemoryMap(String),
}

impl DeviceError {
    /// Create an invalid memory map error
    pub fn invalid_memory_map(msg: impl Into<String>) -> Self {
        Self::InvalidMemoryMap(msg.into())
    }
}
