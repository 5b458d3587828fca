//! Tile data formats and their on-core footprint

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tile height in elements
pub const TILE_HEIGHT: u32 = 32;

/// Tile width in elements
pub const TILE_WIDTH: u32 = 32;

/// Elements per tile
pub const TILE_HW: u32 = TILE_HEIGHT * TILE_WIDTH;

/// Element formats a circular buffer can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataFormat {
    Float32,
    /// bfloat16
    Float16B,
    /// Block floating point: 8-bit mantissas, one shared exponent per 16 values
    Bfp8B,
    UInt32,
}

impl DataFormat {
    /// Bytes occupied by one 32x32 tile.
    pub const fn tile_size(self) -> u32 {
        match self {
            DataFormat::Float32 | DataFormat::UInt32 => TILE_HW * 4,
            DataFormat::Float16B => TILE_HW * 2,
            // 1024 mantissa bytes + 64 shared exponents
            DataFormat::Bfp8B => TILE_HW + TILE_HW / 16,
        }
    }

    /// Bytes per element outside tile layout. Block formats have no
    /// row-major representation.
    pub const fn element_size(self) -> Option<u32> {
        match self {
            DataFormat::Float32 | DataFormat::UInt32 => Some(4),
            DataFormat::Float16B => Some(2),
            DataFormat::Bfp8B => None,
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataFormat::Float32 => "Float32",
            DataFormat::Float16B => "Float16_b",
            DataFormat::Bfp8B => "Bfp8_b",
            DataFormat::UInt32 => "UInt32",
        };
        f.write_str(name)
    }
}
