//! Locations and discrete orientations on the grid plane.
//!
//! The coordinate system is screen-style: `x` grows rightward, `y` grows
//! downward, so [`Orientation::Up`] has unit vector `(0, -1)`.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

/// Signed 2D grid coordinate. Hashable and totally ordered so it can key
/// tile maps and deterministic sets.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct Location {
    pub x: i32,
    pub y: i32,
}

impl Location {
    /// Construct a new location.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Tuple form consumed by the spatial index.
    #[must_use]
    pub const fn as_point(self) -> (i32, i32) {
        (self.x, self.y)
    }

    /// Returns `true` when both components are zero.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.x == 0 && self.y == 0
    }
}

impl Add for Location {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Location {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl From<(i32, i32)> for Location {
    fn from((x, y): (i32, i32)) -> Self {
        Self::new(x, y)
    }
}

/// Discrete facing of an object or action.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Orientation {
    Up,
    Down,
    Left,
    Right,
    #[default]
    NoOrientation,
}

impl Orientation {
    /// Canonical unit vector for the facing. `NoOrientation` is `(0, 0)`.
    #[must_use]
    pub const fn unit_vector(self) -> Location {
        match self {
            Self::Up => Location::new(0, -1),
            Self::Down => Location::new(0, 1),
            Self::Left => Location::new(-1, 0),
            Self::Right => Location::new(1, 0),
            Self::NoOrientation => Location::new(0, 0),
        }
    }

    /// Rotate `vector` from the `Up`-facing reference frame into this
    /// facing's frame. Used for relative trigger offsets.
    #[must_use]
    pub const fn rotate(self, vector: Location) -> Location {
        match self {
            Self::Up | Self::NoOrientation => vector,
            Self::Right => Location::new(-vector.y, vector.x),
            Self::Down => Location::new(-vector.x, -vector.y),
            Self::Left => Location::new(vector.y, -vector.x),
        }
    }
}
