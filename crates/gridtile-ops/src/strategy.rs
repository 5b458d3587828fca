//! Single-core vs multi-core dispatch

use crate::tensor::{Layout, TensorSpec};
use gridtile_device::TILE_HW;
use serde::Serialize;
use std::fmt;

/// How an operation spreads over the grid, decided once per invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ParallelizationStrategy {
    SingleCore,
    MultiCore,
}

impl ParallelizationStrategy {
    /// `MultiCore` once there is more than one unit of work.
    pub fn for_units(units: u64) -> Self {
        if units > 1 {
            ParallelizationStrategy::MultiCore
        } else {
            ParallelizationStrategy::SingleCore
        }
    }
}

impl fmt::Display for ParallelizationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParallelizationStrategy::SingleCore => f.write_str("single_core"),
            ParallelizationStrategy::MultiCore => f.write_str("multi_core"),
        }
    }
}

/// Independent units of work in `tensor`: tiles, or row-major sticks.
pub fn work_units(tensor: &TensorSpec) -> u64 {
    let divisor = match tensor.layout {
        Layout::Tile => TILE_HW as u64,
        Layout::RowMajor => tensor.width() as u64,
    };
    if divisor == 0 {
        return 0;
    }
    tensor.volume() / divisor
}

pub fn select_strategy(tensor: &TensorSpec) -> ParallelizationStrategy {
    ParallelizationStrategy::for_units(work_units(tensor))
}
