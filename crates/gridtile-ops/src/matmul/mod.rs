//! Matmul tiling search

pub mod planner;

pub use planner::{large_matmul_params, max_block_dim, BlockShape, SUBBLOCK_HW_CHOICES};
