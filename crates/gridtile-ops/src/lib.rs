//! # gridtile-ops
//!
//! Planning layer for tiled tensor operations on a grid of cores. Given
//! tensor descriptors, an operation validates its operands, picks a
//! parallelization strategy, sizes its work (matmul block search, core
//! rectangles, even work splits) and emits a [`gridtile_device::Program`]
//! whose circular buffers are committed on the device ledger.
//!
//! ```text
//! TensorSpec ─▶ DeviceOperation::validate
//!                 └─▶ parallelization_strategy ─┬─ SingleCore ─▶ core (0, 0)
//!                                               └─ MultiCore  ─┬─ large_matmul_params + core_extent
//!                                                              └─ split_work_to_cores
//!                                                                   └─▶ Program
//! ```
//!
//! ```rust
//! use gridtile_device::{DataFormat, Device};
//! use gridtile_ops::tensor::{DeviceBuffer, Layout, TensorSpec};
//! use gridtile_ops::{run_operation, CopyOp};
//!
//! let device = Device::wormhole();
//! let src = TensorSpec::on_device([1, 1, 64, 64], Layout::Tile, DataFormat::Float16B, DeviceBuffer::dram(0));
//! let dst = TensorSpec::on_device([1, 1, 64, 64], Layout::Tile, DataFormat::Float16B, DeviceBuffer::dram(0x8000));
//! let program = run_operation(&device, &CopyOp::new(DataFormat::Float16B), &[src], &[dst]).unwrap();
//! assert_eq!(program.num_cores(), 4);
//! ```

pub mod core_range;
pub mod error;
pub mod factor;
pub mod matmul;
pub mod operation;
pub mod ops;
pub mod strategy;
pub mod tensor;
pub mod work_split;

pub use core_range::{core_extent, CoreExtent};
pub use error::{Error, Result};
pub use factor::{prime_factors, product_closure};
pub use matmul::{large_matmul_params, BlockShape};
pub use operation::{run_operation, DeviceOperation};
pub use ops::{CopyOp, LayerNormOp, MatmulOp};
pub use strategy::{select_strategy, ParallelizationStrategy};
pub use tensor::{MemoryConfig, TensorSpec};
pub use work_split::{split_work_to_cores, WorkSplit};
