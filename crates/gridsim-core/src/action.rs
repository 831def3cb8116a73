//! Action descriptors: named requests to change grid state.

use crate::geometry::{Location, Orientation};
use crate::object::ObjectId;
use serde::{Deserialize, Serialize};

/// A requested change, dispatched to the object at its source location.
///
/// The destination of an action is always `source + vector`. When an
/// originating object is attached, the source location re-resolves to that
/// object's current position at execution time, so delayed actions follow
/// their issuer around the map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    name: String,
    source_location: Location,
    vector: Location,
    orientation: Orientation,
    originating_object: Option<ObjectId>,
    delay: u32,
}

impl Action {
    /// Create an action at `source_location` pointing along `vector`.
    #[must_use]
    pub fn new(name: impl Into<String>, source_location: Location, vector: Location) -> Self {
        Self {
            name: name.into(),
            source_location,
            vector,
            orientation: Orientation::NoOrientation,
            originating_object: None,
            delay: 0,
        }
    }

    /// Attach a facing to the action.
    #[must_use]
    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    /// Bind the action to the object that issued it.
    #[must_use]
    pub fn with_originating_object(mut self, id: ObjectId) -> Self {
        self.originating_object = Some(id);
        self
    }

    /// Schedule the action `delay` ticks into the future.
    #[must_use]
    pub fn with_delay(mut self, delay: u32) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn source_location(&self) -> Location {
        self.source_location
    }

    #[must_use]
    pub fn vector(&self) -> Location {
        self.vector
    }

    #[must_use]
    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    #[must_use]
    pub fn originating_object(&self) -> Option<ObjectId> {
        self.originating_object
    }

    #[must_use]
    pub fn delay(&self) -> u32 {
        self.delay
    }

    /// Destination cell given the resolved source location.
    #[must_use]
    pub fn destination_from(&self, source: Location) -> Location {
        source + self.vector
    }
}
