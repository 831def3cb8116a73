//! Shared integer cells backing variables, counters, and the tick counter.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

/// Cheaply clonable shared `i32` cell.
///
/// Rule scripts hold clones of the same cell the grid mutates, so reads
/// through any handle observe the latest write. The core is single-threaded;
/// the atomic is only the sharing vehicle that keeps the grid `Send`.
#[derive(Clone, Default)]
pub struct VariableCell(Arc<AtomicI32>);

impl VariableCell {
    /// Create a cell holding `value`.
    #[must_use]
    pub fn new(value: i32) -> Self {
        Self(Arc::new(AtomicI32::new(value)))
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> i32 {
        self.0.load(Ordering::Relaxed)
    }

    /// Overwrite the value.
    pub fn set(&self, value: i32) {
        self.0.store(value, Ordering::Relaxed);
    }

    /// Add `delta` and return the new value.
    pub fn add(&self, delta: i32) -> i32 {
        self.0.fetch_add(delta, Ordering::Relaxed) + delta
    }

    /// Returns `true` when both handles refer to the same cell.
    #[must_use]
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for VariableCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("VariableCell").field(&self.get()).finish()
    }
}

impl PartialEq for VariableCell {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}

impl Eq for VariableCell {}

impl Serialize for VariableCell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.get().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VariableCell {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i32::deserialize(deserializer).map(Self::new)
    }
}

/// Definition of one global variable, fixed at reset time.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GlobalVariableDefinition {
    /// Value every cell starts from.
    pub initial_value: i32,
    /// Per-player variables get one cell per player id plus the neutral id 0;
    /// global variables get a single cell under id 0.
    pub per_player: bool,
}
