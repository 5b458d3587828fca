//! Per-core block and subblock search for large matmuls
//!
//! Each core computes one `row_block x col_block` block of the output; the
//! block is further walked in `subblock_rows x subblock_cols` pieces that fit
//! the destination registers. Block sizes are products of the output
//! extent's prime factors so every block divides its axis.
//!
//! Per-core scratch is modelled as double-buffered in0/in1 blocks plus one
//! output block, all in tiles:
//!
//! ```text
//! 2·w·row_block + 2·w·col_block + row_block·col_block <= 400
//! ```
//!
//! When nothing fits the search returns [`BlockShape::NONE`]; callers fall
//! back to a finer-grained program.

use crate::factor::{prime_factors, product_closure};
use serde::Serialize;
use std::fmt;

/// Scratch budget per core, in tiles.
pub const SCRATCH_TILE_BUDGET: i64 = 400;

/// Supported compute subblocks `(rows, cols)`, highest precedence first.
pub const SUBBLOCK_HW_CHOICES: [(u32, u32); 20] = [
    (4, 2),
    (2, 4),
    (8, 1),
    (1, 8),
    (7, 1),
    (1, 7),
    (3, 2),
    (2, 3),
    (6, 1),
    (1, 6),
    (5, 1),
    (1, 5),
    (2, 2),
    (4, 1),
    (1, 4),
    (3, 1),
    (1, 3),
    (2, 1),
    (1, 2),
    (1, 1),
];

/// Per-core tiling of the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct BlockShape {
    pub row_block: u32,
    pub col_block: u32,
    pub subblock_rows: u32,
    pub subblock_cols: u32,
}

impl BlockShape {
    /// No block plan fits.
    pub const NONE: BlockShape = BlockShape {
        row_block: 0,
        col_block: 0,
        subblock_rows: 0,
        subblock_cols: 0,
    };

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }

    pub fn block_tiles(&self) -> u32 {
        self.row_block * self.col_block
    }

    pub fn subblock_tiles(&self) -> u32 {
        self.subblock_rows * self.subblock_cols
    }

    pub fn num_subblocks_rows(&self) -> u32 {
        self.row_block / self.subblock_rows
    }

    pub fn num_subblocks_cols(&self) -> u32 {
        self.col_block / self.subblock_cols
    }
}

impl fmt::Display for BlockShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} block / {}x{} subblock",
            self.row_block, self.col_block, self.subblock_rows, self.subblock_cols
        )
    }
}

/// Largest block on the other axis that fits the scratch budget once one
/// axis is fixed at `block_dim`. Zero when nothing fits.
pub fn max_block_dim(block_dim: u32, in0_block_w: u32) -> u32 {
    let block_dim = block_dim as i64;
    let w = in0_block_w as i64;
    let other = (SCRATCH_TILE_BUDGET - 2 * w * block_dim) / (2 * w + block_dim);
    if other > 0 {
        other as u32
    } else {
        0
    }
}

/// Split `factors` into the product of those above `bound` and the rest.
fn split_forced(factors: Vec<u32>, bound: u32) -> (u32, Vec<u32>) {
    let (forced, free): (Vec<u32>, Vec<u32>) = factors.into_iter().partition(|&f| f > bound);
    (forced.iter().product(), free)
}

/// First supported subblock dividing `row_block x col_block`.
fn first_subblock(row_block: u32, col_block: u32) -> Option<BlockShape> {
    SUBBLOCK_HW_CHOICES
        .iter()
        .find(|&&(h, w)| row_block % h == 0 && col_block % w == 0)
        .map(|&(subblock_rows, subblock_cols)| BlockShape {
            row_block,
            col_block,
            subblock_rows,
            subblock_cols,
        })
}

/// Grow `forced_min` by the largest candidate that stays under `max`.
///
/// Candidates are visited in ascending order and the walk stops at the
/// first one that overflows.
fn grow_forced(forced_min: u32, candidates: &[u32], max: u32) -> u32 {
    let mut block = forced_min;
    for &candidate in candidates {
        let grown = candidate as u64 * forced_min as u64;
        if grown > max as u64 {
            break;
        }
        block = grown as u32;
    }
    block
}

fn exceeds_grid(mt: u32, nt: u32, row_block: u32, col_block: u32, num_cores_y: u32, num_cores_x: u32) -> bool {
    mt / row_block > num_cores_y || nt / col_block > num_cores_x
}

/// Choose the per-core block and subblock for an `mt x nt` tile output on a
/// grid of `num_cores_y` rows by `num_cores_x` columns.
///
/// Prime factors too large to spread over an axis are forced into that
/// axis's block. With a forced row block the column block is grown to the
/// capacity limit (and the reverse); with neither, column candidates are
/// tried in ascending order, each paired with the largest row block that
/// fits. The first candidate that fits the grid wins.
pub fn large_matmul_params(mt: u32, nt: u32, num_cores_y: u32, num_cores_x: u32, in0_block_w: u32) -> BlockShape {
    let (col_block_min, nt_factors) = split_forced(prime_factors(nt), num_cores_x);
    let (row_block_min, mt_factors) = split_forced(prime_factors(mt), num_cores_y);

    if col_block_min > max_block_dim(row_block_min, in0_block_w) {
        tracing::trace!(row_block_min, col_block_min, "forced blocks exceed scratch budget");
        return BlockShape::NONE;
    }

    if row_block_min > 1 {
        let col_max = max_block_dim(row_block_min, in0_block_w);
        let col_block = grow_forced(col_block_min, &product_closure(&nt_factors), col_max);
        if exceeds_grid(mt, nt, row_block_min, col_block, num_cores_y, num_cores_x) {
            tracing::trace!(row_block = row_block_min, col_block, "forced row block does not fit grid");
            return BlockShape::NONE;
        }
        return first_subblock(row_block_min, col_block).unwrap_or(BlockShape::NONE);
    }

    if col_block_min > 1 {
        let row_max = max_block_dim(col_block_min, in0_block_w);
        let row_block = grow_forced(row_block_min, &product_closure(&mt_factors), row_max);
        if exceeds_grid(mt, nt, row_block, col_block_min, num_cores_y, num_cores_x) {
            tracing::trace!(row_block, col_block = col_block_min, "forced col block does not fit grid");
            return BlockShape::NONE;
        }
        return first_subblock(row_block, col_block_min).unwrap_or(BlockShape::NONE);
    }

    let row_choices = product_closure(&mt_factors);
    let col_choices = product_closure(&nt_factors);
    // Keeps its value across column candidates when no row candidate fits.
    let mut row_block = row_block_min;
    for &col_block in &col_choices {
        let row_max = max_block_dim(col_block, in0_block_w);
        if let Some(&fit) = row_choices.iter().rev().find(|&&candidate| candidate <= row_max) {
            row_block = fit;
        }

        if exceeds_grid(mt, nt, row_block, col_block, num_cores_y, num_cores_x) {
            tracing::trace!(row_block, col_block, "candidate does not fit grid");
            continue;
        }
        if let Some(shape) = first_subblock(row_block, col_block) {
            return shape;
        }
    }

    BlockShape::NONE
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn shape(row_block: u32, col_block: u32, subblock_rows: u32, subblock_cols: u32) -> BlockShape {
        BlockShape {
            row_block,
            col_block,
            subblock_rows,
            subblock_cols,
        }
    }

    #[test]
    fn capacity_model() {
        assert_eq!(max_block_dim(1, 2), 79);
        assert_eq!(max_block_dim(2, 2), 65);
        assert_eq!(max_block_dim(11, 2), 23);
        assert_eq!(max_block_dim(97, 2), 0);
        assert_eq!(max_block_dim(200, 1), 0);
        assert_eq!(max_block_dim(400, 1), 0);
    }

    #[test]
    fn square_eight_by_eight() {
        assert_eq!(large_matmul_params(8, 8, 8, 8, 2), shape(8, 2, 4, 2));
    }

    #[test]
    fn single_tile_output() {
        assert_eq!(large_matmul_params(1, 1, 8, 8, 2), shape(1, 1, 1, 1));
    }

    #[test]
    fn forced_on_both_axes() {
        assert_eq!(large_matmul_params(11, 11, 8, 8, 2), shape(11, 11, 1, 1));
        assert!(large_matmul_params(97, 97, 8, 8, 2).is_none());
    }

    #[test]
    fn forced_row_block_grows_columns() {
        assert_eq!(large_matmul_params(22, 8, 8, 8, 2), shape(11, 8, 1, 8));
    }

    #[test]
    fn forced_col_block_grows_rows() {
        assert_eq!(large_matmul_params(8, 11, 8, 8, 2), shape(8, 11, 8, 1));
    }

    #[test]
    fn forced_block_that_leaves_too_many_cores() {
        // 176 = 16 * 11: the 16 remaining row blocks cannot fit 8 rows
        assert!(large_matmul_params(176, 8, 8, 8, 2).is_none());
    }

    #[test]
    fn row_block_carries_over_between_candidates() {
        // col 2 picks row 2 but overflows the grid; col 4 admits no row
        // candidate and reuses row 2
        assert_eq!(large_matmul_params(4, 8, 2, 2, 33), shape(2, 4, 2, 4));
    }

    #[test]
    fn subblock_precedence() {
        assert_eq!(first_subblock(6, 4), Some(shape(6, 4, 2, 4)));
        assert_eq!(first_subblock(7, 3), Some(shape(7, 3, 7, 1)));
        assert_eq!(first_subblock(5, 5), Some(shape(5, 5, 5, 1)));
        assert_eq!(first_subblock(1, 1), Some(shape(1, 1, 1, 1)));
    }

    #[test]
    fn sentinel_display_and_helpers() {
        assert!(BlockShape::NONE.is_none());
        let s = shape(8, 2, 4, 2);
        assert_eq!(s.num_subblocks_rows(), 2);
        assert_eq!(s.num_subblocks_cols(), 1);
        assert_eq!(s.to_string(), "8x2 block / 4x2 subblock");
    }

    proptest! {
        #[test]
        fn prop_plans_satisfy_invariants(
            mt in 1u32..256,
            nt in 1u32..256,
            rows in 1u32..13,
            cols in 1u32..13,
            w in 1u32..5,
        ) {
            let plan = large_matmul_params(mt, nt, rows, cols, w);
            if !plan.is_none() {
                prop_assert_eq!(plan.row_block % plan.subblock_rows, 0);
                prop_assert_eq!(plan.col_block % plan.subblock_cols, 0);
                prop_assert_eq!(mt % plan.row_block, 0);
                prop_assert_eq!(nt % plan.col_block, 0);
                prop_assert!(mt / plan.row_block <= rows);
                prop_assert!(nt / plan.col_block <= cols);
                let first = SUBBLOCK_HW_CHOICES
                    .iter()
                    .position(|&(h, c)| plan.row_block % h == 0 && plan.col_block % c == 0)
                    .unwrap();
                prop_assert_eq!(SUBBLOCK_HW_CHOICES[first], (plan.subblock_rows, plan.subblock_cols));
            }
        }
    }
}
