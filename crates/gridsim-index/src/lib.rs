//! Spatial indexing abstractions for collision-trigger queries.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;
use thiserror::Error;
use tracing::trace;

/// Integer grid point used by all index queries.
pub type Point = (i32, i32);

/// Errors emitted by collision detector implementations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Indicates configuration values that cannot be used (e.g., zero cell size).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Shape of the match region around a query point.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SearchShape {
    /// Every cell with Chebyshev distance less than or equal to the range.
    #[default]
    Area,
    /// Only the cells exactly on the perimeter of the range box.
    Boundary,
}

/// Keys matched by a search, sorted ascending for deterministic iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult<K> {
    pub keys: Vec<K>,
}

impl<K> Default for SearchResult<K> {
    fn default() -> Self {
        Self { keys: Vec::new() }
    }
}

/// Common behaviour exposed by collision detectors.
///
/// Implementations track a set of keyed points incrementally and answer
/// range queries around arbitrary points. Keys are opaque to the index; the
/// engine feeds it object handles.
pub trait CollisionDetector<K>: fmt::Debug + Send {
    /// Insert `key` at `point`, moving it if it was already indexed.
    /// Returns `true` when the key was not previously present.
    fn upsert(&mut self, key: K, point: Point) -> bool;

    /// Remove `key` from the index. Returns `false` if it was not indexed.
    fn remove(&mut self, key: K) -> bool;

    /// Collect every key whose point matches the detector's shape and range
    /// around `point`.
    fn search(&self, point: Point) -> SearchResult<K>;

    /// Number of indexed keys.
    fn len(&self) -> usize;

    /// Returns `true` when no keys are indexed.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cell-bucketed spatial hash answering Chebyshev range queries.
#[derive(Debug, Clone)]
pub struct SpatialHashCollisionDetector<K> {
    /// Edge length of each hash cell.
    pub cell_size: u32,
    /// Chebyshev radius matched by searches.
    pub range: u32,
    /// Area or boundary matching.
    pub shape: SearchShape,
    buckets: HashMap<Point, BTreeSet<K>>,
    positions: HashMap<K, Point>,
}

impl<K> SpatialHashCollisionDetector<K>
where
    K: Copy + Eq + Ord + Hash + fmt::Debug + Send,
{
    /// Create a detector with the provided cell size, range, and shape.
    pub fn new(cell_size: u32, range: u32, shape: SearchShape) -> Result<Self, IndexError> {
        if cell_size == 0 {
            return Err(IndexError::InvalidConfig("cell_size must be non-zero"));
        }
        Ok(Self {
            cell_size,
            range,
            shape,
            buckets: HashMap::new(),
            positions: HashMap::new(),
        })
    }

    #[inline]
    fn cell(&self, point: Point) -> Point {
        let size = self.cell_size as i32;
        (point.0.div_euclid(size), point.1.div_euclid(size))
    }

    fn unlink(&mut self, key: K, point: Point) {
        let cell = self.cell(point);
        if let Some(bucket) = self.buckets.get_mut(&cell) {
            bucket.remove(&key);
            if bucket.is_empty() {
                self.buckets.remove(&cell);
            }
        }
    }
}

impl<K> CollisionDetector<K> for SpatialHashCollisionDetector<K>
where
    K: Copy + Eq + Ord + Hash + fmt::Debug + Send,
{
    fn upsert(&mut self, key: K, point: Point) -> bool {
        let previous = self.positions.insert(key, point);
        if let Some(previous_point) = previous {
            if previous_point != point {
                self.unlink(key, previous_point);
            }
        }
        let cell = self.cell(point);
        self.buckets.entry(cell).or_default().insert(key);
        trace!(?key, ?point, "indexed key");
        previous.is_none()
    }

    fn remove(&mut self, key: K) -> bool {
        match self.positions.remove(&key) {
            Some(point) => {
                self.unlink(key, point);
                trace!(?key, ?point, "unindexed key");
                true
            }
            None => false,
        }
    }

    fn search(&self, point: Point) -> SearchResult<K> {
        let range = self.range as i32;
        let min_cell = self.cell((point.0 - range, point.1 - range));
        let max_cell = self.cell((point.0 + range, point.1 + range));

        let mut keys = Vec::new();
        for cell_x in min_cell.0..=max_cell.0 {
            for cell_y in min_cell.1..=max_cell.1 {
                let Some(bucket) = self.buckets.get(&(cell_x, cell_y)) else {
                    continue;
                };
                for &key in bucket {
                    let (kx, ky) = self.positions[&key];
                    let chebyshev = (kx - point.0).abs().max((ky - point.1).abs());
                    let matched = match self.shape {
                        SearchShape::Area => chebyshev <= range,
                        SearchShape::Boundary => range > 0 && chebyshev == range,
                    };
                    if matched {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort_unstable();
        SearchResult { keys }
    }

    fn len(&self) -> usize {
        self.positions.len()
    }
}
