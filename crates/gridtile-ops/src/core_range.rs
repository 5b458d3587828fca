//! Mapping block counts onto a rectangle of cores

use gridtile_device::{CoreCoord, CoreRange};
use serde::Serialize;

/// Cores used by a block plan: `x` columns by `y` rows from the origin
///
/// A zero extent means the plan needs no multi-core rectangle; the caller
/// takes a different program path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct CoreExtent {
    pub x: u32,
    pub y: u32,
}

impl CoreExtent {
    pub const ZERO: CoreExtent = CoreExtent { x: 0, y: 0 };

    pub fn is_empty(&self) -> bool {
        self.x == 0 || self.y == 0
    }

    pub fn num_cores(&self) -> u32 {
        self.x * self.y
    }

    /// `[(0, 0) - (x - 1, y - 1)]`, or `None` for a zero extent.
    pub fn as_range(&self) -> Option<CoreRange> {
        if self.is_empty() {
            return None;
        }
        CoreRange::new(CoreCoord::new(0, 0), CoreCoord::new(self.x - 1, self.y - 1)).ok()
    }
}

/// Rectangle covering `num_blocks_rows x num_blocks_cols` blocks, one per
/// core.
///
/// Zero when there is a single block overall or the blocks exceed the grid.
pub fn core_extent(num_blocks_rows: u32, num_blocks_cols: u32, max_num_rows: u32, max_num_cols: u32) -> CoreExtent {
    let single_block = num_blocks_rows == 1 && num_blocks_cols == 1;
    if single_block || num_blocks_rows > max_num_rows || num_blocks_cols > max_num_cols {
        return CoreExtent::ZERO;
    }
    CoreExtent {
        x: num_blocks_cols,
        y: num_blocks_rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn single_block_is_degenerate() {
        assert_eq!(core_extent(1, 1, 8, 8), CoreExtent::ZERO);
        assert_eq!(CoreExtent::ZERO.as_range(), None);
    }

    #[test]
    fn over_grid_is_degenerate() {
        assert_eq!(core_extent(9, 2, 8, 8), CoreExtent::ZERO);
        assert_eq!(core_extent(2, 9, 8, 8), CoreExtent::ZERO);
    }

    #[test]
    fn extent_is_columns_by_rows() {
        let extent = core_extent(1, 4, 8, 8);
        assert_eq!(extent, CoreExtent { x: 4, y: 1 });
        let range = extent.as_range().unwrap();
        assert_eq!(range.end(), CoreCoord::new(3, 0));
        assert_eq!(range.num_cores(), 4);
    }

    proptest! {
        #[test]
        fn prop_extent_bounds(rows in 1u32..12, cols in 1u32..12, max_rows in 1u32..10, max_cols in 1u32..10) {
            let extent = core_extent(rows, cols, max_rows, max_cols);
            if extent.is_empty() {
                prop_assert!((rows == 1 && cols == 1) || rows > max_rows || cols > max_cols);
            } else {
                prop_assert_eq!(extent.num_cores(), rows * cols);
                prop_assert!(extent.x <= max_cols && extent.y <= max_rows);
                prop_assert_eq!(extent.as_range().unwrap().start(), CoreCoord::new(0, 0));
            }
        }
    }
}
