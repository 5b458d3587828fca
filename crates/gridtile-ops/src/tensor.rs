//! Tensor descriptors
//!
//! Operations never see tensor data, only where it lives and how it is laid
//! out. A `TensorSpec` is that description: a 4-d shape `[W, Z, Y, X]`, a
//! layout, an element format, and (for device tensors) the buffer holding it.

use gridtile_device::{DataFormat, TILE_HEIGHT, TILE_HW, TILE_WIDTH};
use serde::Serialize;
use std::fmt;

/// `[W, Z, Y, X]`, innermost last
pub type Shape = [u32; 4];

/// Element arrangement in memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Layout {
    /// 32x32 tiles, one tile per page
    Tile,
    /// Rows of `X` elements ("sticks"), one stick per page
    RowMajor,
}

/// Where the tensor data lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StorageType {
    Host,
    Device,
}

/// How pages are distributed over memory banks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TensorMemoryLayout {
    Interleaved,
    HeightSharded,
    WidthSharded,
    BlockSharded,
}

impl fmt::Display for TensorMemoryLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Memory kind backing a device buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BufferType {
    Dram,
    L1,
}

/// Placement requested for an operation's output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MemoryConfig {
    pub memory_layout: TensorMemoryLayout,
    pub buffer_type: BufferType,
}

impl MemoryConfig {
    pub const DRAM_INTERLEAVED: MemoryConfig = MemoryConfig {
        memory_layout: TensorMemoryLayout::Interleaved,
        buffer_type: BufferType::Dram,
    };

    pub const L1_INTERLEAVED: MemoryConfig = MemoryConfig {
        memory_layout: TensorMemoryLayout::Interleaved,
        buffer_type: BufferType::L1,
    };
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self::DRAM_INTERLEAVED
    }
}

/// Allocated device buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceBuffer {
    pub address: u32,
    pub buffer_type: BufferType,
}

impl DeviceBuffer {
    pub fn dram(address: u32) -> Self {
        Self {
            address,
            buffer_type: BufferType::Dram,
        }
    }

    pub fn l1(address: u32) -> Self {
        Self {
            address,
            buffer_type: BufferType::L1,
        }
    }
}

/// Description of one tensor operand
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TensorSpec {
    pub shape: Shape,
    pub layout: Layout,
    pub dtype: DataFormat,
    pub storage: StorageType,
    pub memory_layout: TensorMemoryLayout,
    pub buffer: Option<DeviceBuffer>,
}

impl TensorSpec {
    /// Interleaved device tensor backed by `buffer`.
    pub fn on_device(shape: Shape, layout: Layout, dtype: DataFormat, buffer: DeviceBuffer) -> Self {
        Self {
            shape,
            layout,
            dtype,
            storage: StorageType::Device,
            memory_layout: TensorMemoryLayout::Interleaved,
            buffer: Some(buffer),
        }
    }

    pub fn on_host(shape: Shape, layout: Layout, dtype: DataFormat) -> Self {
        Self {
            shape,
            layout,
            dtype,
            storage: StorageType::Host,
            memory_layout: TensorMemoryLayout::Interleaved,
            buffer: None,
        }
    }

    pub fn with_memory_layout(mut self, memory_layout: TensorMemoryLayout) -> Self {
        self.memory_layout = memory_layout;
        self
    }

    pub fn without_buffer(mut self) -> Self {
        self.buffer = None;
        self
    }

    /// Element count, saturating at `u64::MAX`.
    pub fn volume(&self) -> u64 {
        self.shape.iter().fold(1u64, |volume, &d| volume.saturating_mul(d as u64))
    }

    /// Innermost dimension.
    pub fn width(&self) -> u32 {
        self.shape[3]
    }

    pub fn height(&self) -> u32 {
        self.shape[2]
    }

    /// Product of the two outer dimensions.
    pub fn batch(&self) -> u64 {
        self.shape[0] as u64 * self.shape[1] as u64
    }

    /// Tile count, assuming tile-aligned height and width.
    pub fn num_tiles(&self) -> u64 {
        self.volume() / TILE_HW as u64
    }

    /// Tiles along the innermost dimension.
    pub fn width_tiles(&self) -> u32 {
        self.width() / TILE_WIDTH
    }

    pub fn height_tiles(&self) -> u32 {
        self.height() / TILE_HEIGHT
    }

    pub fn is_tile_aligned(&self) -> bool {
        self.width() % TILE_WIDTH == 0 && self.height() % TILE_HEIGHT == 0
    }

    /// Pages the tensor spans: tiles, or sticks in row-major layout.
    pub fn num_pages(&self) -> u64 {
        match self.layout {
            Layout::Tile => self.num_tiles(),
            Layout::RowMajor => self.volume() / self.width().max(1) as u64,
        }
    }

    /// Bytes per page. Row-major block formats have no stick size.
    pub fn page_size(&self) -> Option<u32> {
        match self.layout {
            Layout::Tile => Some(self.dtype.tile_size()),
            Layout::RowMajor => self.dtype.element_size().map(|size| size * self.width()),
        }
    }

    pub fn is_on_device(&self) -> bool {
        self.storage == StorageType::Device
    }

    pub fn is_dram(&self) -> bool {
        matches!(
            self.buffer,
            Some(DeviceBuffer {
                buffer_type: BufferType::Dram,
                ..
            })
        )
    }

    /// Buffer address, or zero when unallocated.
    pub fn address(&self) -> u32 {
        self.buffer.map_or(0, |buffer| buffer.address)
    }
}

/// Kernel compile-time flags describing a page size: `(is_pow2, log2 or size)`.
pub(crate) fn page_size_args(page_size: u32) -> (u32, u32) {
    if page_size.is_power_of_two() {
        (1, page_size.trailing_zeros())
    } else {
        (0, page_size)
    }
}
