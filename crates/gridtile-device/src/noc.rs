//! NOC address encoding
//!
//! A NOC address is a 64-bit value: the low [`NOC_ADDR_LOCAL_BITS`] bits are
//! a byte offset inside the target core's local memory and the bits above
//! carry the node encoding. The node encoding is produced as the 32-bit value
//! kernels program into the upper address register, then shifted above the
//! local bits.
//!
//! ```text
//! unicast node:    [ y : 6 ][ x : 6 ][ pcie : 1 ][ 3 ]          (bit 4 = x)
//! multicast node:  [ y_start : 6 ][ x_start : 6 ][ y_end : 6 ][ x_end : 6 ][ 4 ]
//! ```
//!
//! These layouts are fixed by the silicon; kernels decode them bit for bit.

use crate::core_coord::{CoreCoord, CoreRange};
use crate::error::{DeviceError, Result};

/// Width of the local-offset field.
pub const NOC_ADDR_LOCAL_BITS: u32 = 36;

/// Width of one node-id coordinate field.
pub const NOC_ADDR_NODE_ID_BITS: u32 = 6;

/// NOC coordinate of the PCIe bridge that fronts bulk storage.
pub const BULK_STORAGE_CORE: CoreCoord = CoreCoord::new(0, 3);

/// Marker bit set in the unicast encoding when targeting [`BULK_STORAGE_CORE`].
pub const BULK_STORAGE_FLAG: u32 = 0x8;

const NODE_SHIFT: u32 = NOC_ADDR_LOCAL_BITS % 32;
const NODE_MASK: u32 = (1 << NOC_ADDR_NODE_ID_BITS) - 1;
const LOCAL_MASK: u64 = (1 << NOC_ADDR_LOCAL_BITS) - 1;

fn node_field(value: u32) -> Result<u32> {
    if value > NODE_MASK {
        return Err(DeviceError::NocFieldOverflow {
            value,
            bits: NOC_ADDR_NODE_ID_BITS,
        });
    }
    Ok(value)
}

fn local_field(offset: u64) -> Result<u64> {
    if offset & !LOCAL_MASK != 0 {
        return Err(DeviceError::NocOffsetOverflow {
            offset,
            bits: NOC_ADDR_LOCAL_BITS,
        });
    }
    Ok(offset)
}

/// 32-bit node encoding of a single core.
pub fn xy_encoding(core: CoreCoord) -> Result<u32> {
    let x = node_field(core.x)?;
    let y = node_field(core.y)?;
    let flag = if core == BULK_STORAGE_CORE { BULK_STORAGE_FLAG } else { 0 };
    Ok((y << (NODE_SHIFT + NOC_ADDR_NODE_ID_BITS)) | (x << NODE_SHIFT) | flag)
}

/// 32-bit node encoding of a rectangle, for multicast writes.
pub fn multicast_encoding(range: &CoreRange) -> Result<u32> {
    let start = range.start();
    let end = range.end();
    let (x_start, y_start) = (node_field(start.x)?, node_field(start.y)?);
    let (x_end, y_end) = (node_field(end.x)?, node_field(end.y)?);
    Ok((x_start << (NODE_SHIFT + 2 * NOC_ADDR_NODE_ID_BITS))
        | (y_start << (NODE_SHIFT + 3 * NOC_ADDR_NODE_ID_BITS))
        | (x_end << NODE_SHIFT)
        | (y_end << (NODE_SHIFT + NOC_ADDR_NODE_ID_BITS)))
}

/// Concatenate a node encoding with a local offset.
pub fn noc_addr(node: u32, local_offset: u64) -> Result<u64> {
    Ok(((node as u64) << NOC_ADDR_LOCAL_BITS) | local_field(local_offset)?)
}

/// Device address of `local_offset` inside `core`.
pub fn encode_unicast(core: CoreCoord, local_offset: u64) -> Result<u64> {
    noc_addr(xy_encoding(core)?, local_offset)
}

/// Device address of `local_offset` on every core of `range`.
pub fn encode_multicast(range: &CoreRange, local_offset: u64) -> Result<u64> {
    noc_addr(multicast_encoding(range)?, local_offset)
}
