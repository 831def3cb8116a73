//! Deterministic tick-driven grid-world simulation core.
//!
//! The [`Grid`] owns a rectangular 2D world of objects and advances it one
//! tick at a time: player actions dispatch through object-bound behaviours,
//! delayed actions drain from a priority queue, proximity triggers fire
//! between objects in range, and every mutation feeds per-player reward and
//! dirty-location accounting for incremental observers.
//!
//! Configuration errors are loud (`Result`); runtime action failures are
//! silent with zero reward, since actions failing is part of gameplay.

mod action;
mod cell;
mod event;
mod geometry;
mod grid;
mod object;
mod queue;
mod rng;

pub use action::Action;
pub use cell::{GlobalVariableDefinition, VariableCell};
pub use event::{GridEvent, RewardMap, accumulate_rewards};
pub use geometry::{Location, Orientation};
pub use grid::{
    ActionTriggerDefinition, CollisionDetectorFactory, Grid, GridConfig,
    SpatialHashCollisionDetectorFactory, TriggerType,
};
pub use gridsim_index::{
    CollisionDetector, IndexError, SearchResult, SearchShape, SpatialHashCollisionDetector,
};
pub use object::{
    ActionContext, BOUNDARY_OBJECT_NAME, Behaviour, BehaviourOutcome, EMPTY_OBJECT_NAME,
    InitialAction, Object, ObjectId, ObjectRef,
};
pub use queue::{DelayedActionItem, DelayedActionQueue};
pub use rng::RandomGenerator;

use thiserror::Error;

/// Errors raised by grid configuration and binding operations.
///
/// Runtime action failures never surface here; they resolve to zero reward.
#[derive(Debug, Error)]
pub enum GridError {
    /// A configuration value cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// An operation ran before the state it requires was established.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    /// The `(location, z_index)` slot already holds an object.
    #[error("slot at ({location:?}, z={z_index}) is already occupied")]
    SlotOccupied { location: Location, z_index: i32 },
    /// An object name was used before `init_object` registered it.
    #[error("unknown object name: {0}")]
    UnknownObjectName(String),
    /// A variable name was referenced before registration.
    #[error("unknown variable: {0}")]
    UnknownVariable(String),
    /// An object type was re-registered with a different variable set.
    #[error("object type {0} re-registered with a different variable set")]
    ObjectRedefinition(String),
    /// An object's player id exceeds the configured player count.
    #[error("player id {0} is outside the configured player range")]
    PlayerOutOfRange(u32),
    /// A spatial index rejected its configuration.
    #[error(transparent)]
    Index(#[from] gridsim_index::IndexError),
}

/// Seeds the initial object population of a freshly reset grid.
///
/// Implemented by level loaders outside the core; they drive
/// [`Grid::reset_map`] and repeated [`Grid::add_object`] calls.
pub trait LevelGenerator {
    fn reset(&mut self, grid: &mut Grid) -> Result<(), GridError>;
}
