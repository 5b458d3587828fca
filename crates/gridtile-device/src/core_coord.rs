//! Logical core coordinates, rectangles and disjoint rectangle sets
//!
//! All coordinates are logical (zero-based within the compute grid). Ranges
//! are inclusive on both ends, so a `CoreRange` always covers at least one
//! core; "no cores" is expressed by the callers' own sentinels.

use crate::error::{DeviceError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of one core in the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct CoreCoord {
    pub x: u32,
    pub y: u32,
}

impl CoreCoord {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for CoreCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl From<(u32, u32)> for CoreCoord {
    fn from((x, y): (u32, u32)) -> Self {
        Self { x, y }
    }
}

/// Grid bounds: `x` columns by `y` rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridSize {
    pub x: u32,
    pub y: u32,
}

impl GridSize {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    pub const fn num_cores(&self) -> u32 {
        self.x * self.y
    }

    pub const fn contains(&self, core: CoreCoord) -> bool {
        core.x < self.x && core.y < self.y
    }

    /// Fail with `CoreOutOfGrid` unless `core` is inside the grid.
    pub fn check(&self, core: CoreCoord) -> Result<()> {
        if self.contains(core) {
            Ok(())
        } else {
            Err(DeviceError::CoreOutOfGrid {
                core,
                grid_x: self.x,
                grid_y: self.y,
            })
        }
    }
}

impl fmt::Display for GridSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.x, self.y)
    }
}

/// Inclusive axis-aligned rectangle of cores
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CoreRange {
    start: CoreCoord,
    end: CoreCoord,
}

impl CoreRange {
    pub fn new(start: CoreCoord, end: CoreCoord) -> Result<Self> {
        if start.x > end.x || start.y > end.y {
            return Err(DeviceError::InvalidCoreRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub const fn single(core: CoreCoord) -> Self {
        Self { start: core, end: core }
    }

    pub const fn start(&self) -> CoreCoord {
        self.start
    }

    pub const fn end(&self) -> CoreCoord {
        self.end
    }

    pub const fn width(&self) -> u32 {
        self.end.x - self.start.x + 1
    }

    pub const fn height(&self) -> u32 {
        self.end.y - self.start.y + 1
    }

    pub const fn num_cores(&self) -> u32 {
        self.width() * self.height()
    }

    pub const fn contains(&self, core: CoreCoord) -> bool {
        core.x >= self.start.x && core.x <= self.end.x && core.y >= self.start.y && core.y <= self.end.y
    }

    pub const fn intersects(&self, other: &CoreRange) -> bool {
        self.start.x <= other.end.x
            && other.start.x <= self.end.x
            && self.start.y <= other.end.y
            && other.start.y <= self.end.y
    }

    /// Cores in row-major order.
    pub fn cores(&self) -> impl Iterator<Item = CoreCoord> + '_ {
        (self.start.y..=self.end.y).flat_map(move |y| (self.start.x..=self.end.x).map(move |x| CoreCoord::new(x, y)))
    }
}

impl fmt::Display for CoreRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} - {}]", self.start, self.end)
    }
}

impl From<CoreCoord> for CoreRange {
    fn from(core: CoreCoord) -> Self {
        Self::single(core)
    }
}

/// Set of pairwise-disjoint core ranges
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CoreRangeSet {
    ranges: Vec<CoreRange>,
}

impl CoreRangeSet {
    /// Build a set, rejecting any pair of intersecting ranges.
    pub fn new(ranges: impl IntoIterator<Item = CoreRange>) -> Result<Self> {
        let mut set = Self::default();
        for range in ranges {
            set.insert(range)?;
        }
        Ok(set)
    }

    fn insert(&mut self, range: CoreRange) -> Result<()> {
        if let Some(existing) = self.ranges.iter().find(|existing| existing.intersects(&range)) {
            return Err(DeviceError::OverlappingRanges {
                first: *existing,
                second: range,
            });
        }
        self.ranges.push(range);
        Ok(())
    }

    pub fn ranges(&self) -> &[CoreRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn num_cores(&self) -> u32 {
        self.ranges.iter().map(CoreRange::num_cores).sum()
    }

    pub fn contains(&self, core: CoreCoord) -> bool {
        self.ranges.iter().any(|range| range.contains(core))
    }

    pub fn intersects(&self, other: &CoreRangeSet) -> bool {
        self.ranges
            .iter()
            .any(|range| other.ranges.iter().any(|theirs| range.intersects(theirs)))
    }

    /// Every core, range by range.
    pub fn cores(&self) -> impl Iterator<Item = CoreCoord> + '_ {
        self.ranges.iter().flat_map(CoreRange::cores)
    }

    /// Union with a disjoint set.
    pub fn merge(&self, other: &CoreRangeSet) -> Result<Self> {
        let mut merged = self.clone();
        for range in &other.ranges {
            merged.insert(*range)?;
        }
        Ok(merged)
    }

    /// Smallest range covering every core of the set.
    pub fn bounding_box(&self) -> Option<CoreRange> {
        let first = self.ranges.first()?;
        let (mut start, mut end) = (first.start, first.end);
        for range in &self.ranges[1..] {
            start.x = start.x.min(range.start.x);
            start.y = start.y.min(range.start.y);
            end.x = end.x.max(range.end.x);
            end.y = end.y.max(range.end.y);
        }
        Some(CoreRange { start, end })
    }
}

impl From<CoreRange> for CoreRangeSet {
    fn from(range: CoreRange) -> Self {
        Self { ranges: vec![range] }
    }
}

impl From<CoreCoord> for CoreRangeSet {
    fn from(core: CoreCoord) -> Self {
        CoreRange::single(core).into()
    }
}

impl fmt::Display for CoreRangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (index, range) in self.ranges.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{range}")?;
        }
        write!(f, "}}")
    }
}
