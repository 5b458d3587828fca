//! Even distribution of independent work units over the grid
//!
//! Cores are numbered linearly, column by column (or row by row when
//! `row_wise`). The first `units % num_cores` cores form group 1 and take one
//! extra unit; the rest form group 2.

use crate::error::Result;
use gridtile_device::{CoreCoord, CoreRange, CoreRangeSet, GridSize};

/// Outcome of [`split_work_to_cores`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkSplit {
    pub num_cores: u32,
    pub all_cores: CoreRangeSet,
    pub core_group_1: CoreRangeSet,
    pub core_group_2: CoreRangeSet,
    pub units_per_core_group_1: u32,
    pub units_per_core_group_2: u32,
    pub row_wise: bool,
}

impl WorkSplit {
    /// Core holding linear index `index`.
    pub fn core(&self, index: u32, grid: GridSize) -> CoreCoord {
        linear_core(index, grid, self.row_wise)
    }

    /// Units assigned to the core at linear index `index`.
    pub fn units_for(&self, index: u32) -> u32 {
        if index < self.core_group_1.num_cores() {
            self.units_per_core_group_1
        } else {
            self.units_per_core_group_2
        }
    }

    /// `(core, first unit, unit count)` for every participating core.
    pub fn assignments(&self, grid: GridSize) -> Vec<(CoreCoord, u32, u32)> {
        let mut start = 0;
        (0..self.num_cores)
            .map(|index| {
                let units = self.units_for(index);
                let assignment = (self.core(index, grid), start, units);
                start += units;
                assignment
            })
            .collect()
    }
}

fn linear_core(index: u32, grid: GridSize, row_wise: bool) -> CoreCoord {
    if row_wise {
        CoreCoord::new(index % grid.x, index / grid.x)
    } else {
        CoreCoord::new(index / grid.y, index % grid.y)
    }
}

/// Core ranges covering linear indices `start..start + count`.
///
/// Produces a partial leading line, a block of full lines, and a partial
/// trailing line, as needed.
pub fn cores_to_range_set(start: u32, count: u32, grid: GridSize, row_wise: bool) -> Result<CoreRangeSet> {
    let line = if row_wise { grid.x } else { grid.y };
    let mut ranges = Vec::new();
    let end = start + count;
    let mut index = start;

    while index < end {
        let line_index = index / line;
        let position = index % line;
        let remaining = end - index;

        let (first, last, taken) = if position != 0 || remaining < line {
            let last_position = (line - 1).min(position + remaining - 1);
            (
                (line_index, position),
                (line_index, last_position),
                last_position - position + 1,
            )
        } else {
            let full_lines = remaining / line;
            ((line_index, 0), (line_index + full_lines - 1, line - 1), full_lines * line)
        };

        let to_core = |(line_index, position): (u32, u32)| {
            if row_wise {
                CoreCoord::new(position, line_index)
            } else {
                CoreCoord::new(line_index, position)
            }
        };
        ranges.push(CoreRange::new(to_core(first), to_core(last))?);
        index += taken;
    }

    Ok(CoreRangeSet::new(ranges)?)
}

/// Spread `units` over at most every core of `grid`.
#[tracing::instrument(level = "trace")]
pub fn split_work_to_cores(grid: GridSize, units: u32, row_wise: bool) -> Result<WorkSplit> {
    let num_cores = units.min(grid.num_cores());
    if num_cores == 0 {
        return Ok(WorkSplit {
            num_cores: 0,
            all_cores: CoreRangeSet::default(),
            core_group_1: CoreRangeSet::default(),
            core_group_2: CoreRangeSet::default(),
            units_per_core_group_1: 0,
            units_per_core_group_2: 0,
            row_wise,
        });
    }

    let all_cores = cores_to_range_set(0, num_cores, grid, row_wise)?;
    let base = units / num_cores;
    let extra = units % num_cores;

    let split = if extra == 0 {
        WorkSplit {
            num_cores,
            core_group_1: all_cores.clone(),
            all_cores,
            core_group_2: CoreRangeSet::default(),
            units_per_core_group_1: base,
            units_per_core_group_2: 0,
            row_wise,
        }
    } else {
        WorkSplit {
            num_cores,
            core_group_1: cores_to_range_set(0, extra, grid, row_wise)?,
            core_group_2: cores_to_range_set(extra, num_cores - extra, grid, row_wise)?,
            all_cores,
            units_per_core_group_1: base + 1,
            units_per_core_group_2: base,
            row_wise,
        }
    };

    tracing::trace!(
        num_cores,
        group_1 = split.core_group_1.num_cores(),
        units_1 = split.units_per_core_group_1,
        units_2 = split.units_per_core_group_2,
        "work_split"
    );
    Ok(split)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const GRID: GridSize = GridSize::new(8, 8);

    #[test]
    fn fewer_units_than_cores() {
        let split = split_work_to_cores(GRID, 3, false).unwrap();
        assert_eq!(split.num_cores, 3);
        assert_eq!(split.units_per_core_group_1, 1);
        assert!(split.core_group_2.is_empty());
        assert_eq!(split.all_cores.to_string(), "{[(0, 0) - (0, 2)]}");
    }

    #[test]
    fn uneven_split_front_loads_extra_units() {
        let split = split_work_to_cores(GRID, 70, false).unwrap();
        assert_eq!(split.num_cores, 64);
        assert_eq!(split.core_group_1.num_cores(), 6);
        assert_eq!(split.units_per_core_group_1, 2);
        assert_eq!(split.core_group_2.num_cores(), 58);
        assert_eq!(split.units_per_core_group_2, 1);
        assert!(!split.core_group_1.intersects(&split.core_group_2));
        assert!(split.core_group_2.contains(CoreCoord::new(0, 6)));
    }

    #[test]
    fn row_wise_numbering() {
        let split = split_work_to_cores(GRID, 10, true).unwrap();
        assert_eq!(split.core(9, GRID), CoreCoord::new(1, 1));
        assert_eq!(
            split.all_cores.to_string(),
            "{[(0, 0) - (7, 0)], [(0, 1) - (1, 1)]}"
        );
    }

    #[test]
    fn range_set_with_partial_leading_line() {
        let set = cores_to_range_set(6, 20, GRID, false).unwrap();
        assert_eq!(set.num_cores(), 20);
        assert_eq!(
            set.to_string(),
            "{[(0, 6) - (0, 7)], [(1, 0) - (2, 7)], [(3, 0) - (3, 1)]}"
        );
    }

    #[test]
    fn zero_units() {
        let split = split_work_to_cores(GRID, 0, false).unwrap();
        assert_eq!(split.num_cores, 0);
        assert!(split.assignments(GRID).is_empty());
    }

    proptest! {
        #[test]
        fn prop_split_covers_every_unit(units in 1u32..500, gx in 1u32..9, gy in 1u32..9, row_wise: bool) {
            let grid = GridSize::new(gx, gy);
            let split = split_work_to_cores(grid, units, row_wise).unwrap();
            let assignments = split.assignments(grid);
            prop_assert_eq!(assignments.iter().map(|a| a.2).sum::<u32>(), units);
            prop_assert_eq!(split.all_cores.num_cores(), split.num_cores);
            prop_assert_eq!(
                split.core_group_1.num_cores() + split.core_group_2.num_cores(),
                split.num_cores
            );
            for (core, _, count) in assignments {
                prop_assert!(grid.contains(core));
                prop_assert!(split.all_cores.contains(core));
                let expected = if split.core_group_1.contains(core) {
                    split.units_per_core_group_1
                } else {
                    split.units_per_core_group_2
                };
                prop_assert_eq!(count, expected);
            }
        }
    }
}
