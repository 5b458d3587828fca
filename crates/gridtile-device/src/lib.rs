//! # gridtile-device
//!
//! Device-side model of a tiled accelerator's compute grid: logical core
//! geometry, the per-core L1 memory map, NOC address encoding, and the
//! circular-buffer ledger every program reserves on-core scratch from.
//!
//! ```text
//! Device ─┬─ GridSize          (x columns, y rows)
//!         ├─ MemoryMap         (L1 size, alignment, reserved holes)
//!         └─ CbLedger (Mutex)  ← Program::add_circular_buffer
//!                                  └─ CircularBuffer (RAII)
//! ```
//!
//! Nothing in this crate talks to hardware; it decides where things go and
//! refuses layouts that cannot work.

pub mod circular_buffer;
pub mod core_coord;
pub mod data_format;
pub mod device;
pub mod error;
pub mod memory_map;
pub mod noc;
pub mod program;

pub use circular_buffer::{
    slots, CbWindow, CircularBuffer, CircularBufferConfig, ReservationId, NUM_CIRCULAR_BUFFERS,
};
pub use core_coord::{CoreCoord, CoreRange, CoreRangeSet, GridSize};
pub use data_format::{DataFormat, TILE_HEIGHT, TILE_HW, TILE_WIDTH};
pub use device::{Device, WORMHOLE_GRID};
pub use error::{DeviceError, Result};
pub use memory_map::{MemoryMap, ReservedRegion};
pub use program::{Kernel, KernelConfig, KernelHandle, KernelKind, Program};
