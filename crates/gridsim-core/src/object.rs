//! Objects, their behaviour bindings, and the dispatch context.

use crate::action::Action;
use crate::cell::VariableCell;
use crate::event::RewardMap;
use crate::geometry::{Location, Orientation};
use crate::grid::Grid;
use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

new_key_type! {
    /// Stable generational handle for objects owned by the grid.
    pub struct ObjectId;
}

/// Reserved name of the per-player empty sentinel.
pub const EMPTY_OBJECT_NAME: &str = "_empty";
/// Reserved name of the per-player boundary sentinel.
pub const BOUNDARY_OBJECT_NAME: &str = "_boundary";

/// Resolved participant of an action: an on-grid object or a sentinel.
///
/// Sentinels carry the id of the player the lookup was performed for, so
/// behaviours can pattern-match "spawn into empty" uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectRef {
    Object(ObjectId),
    Empty(u32),
    Boundary(u32),
}

impl ObjectRef {
    /// The on-grid object handle, if this is not a sentinel.
    #[must_use]
    pub fn object_id(self) -> Option<ObjectId> {
        match self {
            Self::Object(id) => Some(id),
            Self::Empty(_) | Self::Boundary(_) => None,
        }
    }
}

/// Result of running one behaviour.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BehaviourOutcome {
    /// Reward deltas keyed by player id.
    pub rewards: RewardMap,
    /// When set by a destination behaviour, the source behaviours of the
    /// same dispatch are suppressed. This is how walls block movement.
    pub abort: bool,
}

impl BehaviourOutcome {
    /// Outcome with no rewards and no abort.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Outcome rewarding a single player.
    #[must_use]
    pub fn reward(player_id: u32, reward: i32) -> Self {
        Self {
            rewards: RewardMap::from([(player_id, reward)]),
            abort: false,
        }
    }

    /// Outcome aborting the rest of the dispatch.
    #[must_use]
    pub fn aborted() -> Self {
        Self {
            rewards: RewardMap::new(),
            abort: true,
        }
    }
}

/// Everything a behaviour can know about the dispatch it runs in.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub action: Action,
    pub player_id: u32,
    pub source: ObjectRef,
    pub destination: ObjectRef,
    pub source_location: Location,
    pub destination_location: Location,
}

/// A concrete rule bound to an action name on an object.
///
/// Behaviours receive the grid mutably so they can spawn, move, remove, and
/// write variables; the grid clones the behaviour handle out of the owning
/// object before invoking it.
pub trait Behaviour: Send + Sync {
    fn on_action(&self, grid: &mut Grid, ctx: &ActionContext) -> BehaviourOutcome;
}

impl<F> Behaviour for F
where
    F: Fn(&mut Grid, &ActionContext) -> BehaviourOutcome + Send + Sync,
{
    fn on_action(&self, grid: &mut Grid, ctx: &ActionContext) -> BehaviourOutcome {
        self(grid, ctx)
    }
}

/// Action an object fires on itself when it is added to the grid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InitialAction {
    pub action_name: String,
    /// Facing of the generated action; `NoOrientation` inherits the
    /// originating action's facing, falling back to the object's own.
    pub orientation: Orientation,
    pub delay: u32,
}

impl InitialAction {
    #[must_use]
    pub fn new(action_name: impl Into<String>) -> Self {
        Self {
            action_name: action_name.into(),
            orientation: Orientation::NoOrientation,
            delay: 0,
        }
    }

    #[must_use]
    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: u32) -> Self {
        self.delay = delay;
        self
    }
}

/// A per-tile entity: state cells plus the behaviours bound to its actions.
///
/// Location, z-index, and type id are grid-managed once the object is added;
/// everything else is set up front through the builder methods.
pub struct Object {
    name: String,
    type_id: u32,
    player_id: u32,
    location: Location,
    orientation: Orientation,
    z_index: i32,
    avatar: bool,
    variables: HashMap<String, VariableCell>,
    available_actions: HashSet<String>,
    initial_actions: Vec<InitialAction>,
    src_behaviours: HashMap<String, Vec<Arc<dyn Behaviour>>>,
    dst_behaviours: HashMap<String, Vec<Arc<dyn Behaviour>>>,
    counter: VariableCell,
}

impl Object {
    /// Create an object of type `name` owned by `player_id` (0 = neutral).
    #[must_use]
    pub fn new(name: impl Into<String>, player_id: u32) -> Self {
        Self {
            name: name.into(),
            type_id: 0,
            player_id,
            location: Location::default(),
            orientation: Orientation::NoOrientation,
            z_index: 0,
            avatar: false,
            variables: HashMap::new(),
            available_actions: HashSet::new(),
            initial_actions: Vec::new(),
            src_behaviours: HashMap::new(),
            dst_behaviours: HashMap::new(),
            counter: VariableCell::default(),
        }
    }

    /// Layer the object at `z_index` within its tile.
    #[must_use]
    pub fn with_z_index(mut self, z_index: i32) -> Self {
        self.z_index = z_index;
        self
    }

    /// Give the object an initial facing.
    #[must_use]
    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    /// Mark the object as its player's avatar.
    #[must_use]
    pub fn as_avatar(mut self) -> Self {
        self.avatar = true;
        self
    }

    /// Attach a named variable cell initialised to `value`.
    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, value: i32) -> Self {
        self.variables.insert(name.into(), VariableCell::new(value));
        self
    }

    /// Declare an action name the object may initiate, without binding a
    /// source behaviour (the action may still be received or vetoed).
    #[must_use]
    pub fn with_action(mut self, action_name: impl Into<String>) -> Self {
        self.available_actions.insert(action_name.into());
        self
    }

    /// Bind a behaviour run when this object is the action's source. Also
    /// declares the action as available.
    #[must_use]
    pub fn with_src_behaviour(
        mut self,
        action_name: impl Into<String>,
        behaviour: Arc<dyn Behaviour>,
    ) -> Self {
        let action_name = action_name.into();
        self.available_actions.insert(action_name.clone());
        self.src_behaviours
            .entry(action_name)
            .or_default()
            .push(behaviour);
        self
    }

    /// Bind a behaviour run when this object is the action's destination.
    #[must_use]
    pub fn with_dst_behaviour(
        mut self,
        action_name: impl Into<String>,
        behaviour: Arc<dyn Behaviour>,
    ) -> Self {
        self.dst_behaviours
            .entry(action_name.into())
            .or_default()
            .push(behaviour);
        self
    }

    /// Register an action the object fires on itself when added.
    #[must_use]
    pub fn with_initial_action(mut self, initial_action: InitialAction) -> Self {
        self.initial_actions.push(initial_action);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dense type id assigned by [`Grid::init_object`](crate::Grid::init_object).
    #[must_use]
    pub fn type_id(&self) -> u32 {
        self.type_id
    }

    #[must_use]
    pub fn player_id(&self) -> u32 {
        self.player_id
    }

    #[must_use]
    pub fn location(&self) -> Location {
        self.location
    }

    #[must_use]
    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Rotating in place changes how the tile renders; callers should follow
    /// up with [`Grid::invalidate_location`](crate::Grid::invalidate_location).
    pub fn set_orientation(&mut self, orientation: Orientation) {
        self.orientation = orientation;
    }

    #[must_use]
    pub fn z_index(&self) -> i32 {
        self.z_index
    }

    #[must_use]
    pub fn is_avatar(&self) -> bool {
        self.avatar
    }

    /// Shared cell counting on-grid objects of this name for this player.
    #[must_use]
    pub fn counter(&self) -> &VariableCell {
        &self.counter
    }

    /// Look up a variable cell by name.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&VariableCell> {
        self.variables.get(name)
    }

    #[must_use]
    pub fn variables(&self) -> &HashMap<String, VariableCell> {
        &self.variables
    }

    /// Whether the object may initiate the named action.
    #[must_use]
    pub fn can_perform_action(&self, action_name: &str) -> bool {
        self.available_actions.contains(action_name)
    }

    #[must_use]
    pub fn initial_actions(&self) -> &[InitialAction] {
        &self.initial_actions
    }

    /// Behaviours triggered when this object is the source of `action_name`.
    #[must_use]
    pub fn src_behaviours(&self, action_name: &str) -> &[Arc<dyn Behaviour>] {
        match self.src_behaviours.get(action_name) {
            Some(behaviours) => behaviours.as_slice(),
            None => &[],
        }
    }

    /// Behaviours triggered when this object is the destination of `action_name`.
    #[must_use]
    pub fn dst_behaviours(&self, action_name: &str) -> &[Arc<dyn Behaviour>] {
        match self.dst_behaviours.get(action_name) {
            Some(behaviours) => behaviours.as_slice(),
            None => &[],
        }
    }

    pub(crate) fn set_type_id(&mut self, type_id: u32) {
        self.type_id = type_id;
    }

    pub(crate) fn set_location(&mut self, location: Location) {
        self.location = location;
    }

    pub(crate) fn set_counter(&mut self, counter: VariableCell) {
        self.counter = counter;
    }

    pub(crate) fn ensure_variable(&mut self, name: &str) {
        if !self.variables.contains_key(name) {
            self.variables.insert(name.to_string(), VariableCell::new(0));
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("name", &self.name)
            .field("type_id", &self.type_id)
            .field("player_id", &self.player_id)
            .field("location", &self.location)
            .field("orientation", &self.orientation)
            .field("z_index", &self.z_index)
            .field("avatar", &self.avatar)
            .field("variables", &self.variables)
            .finish_non_exhaustive()
    }
}
