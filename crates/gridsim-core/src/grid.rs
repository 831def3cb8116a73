//! The authoritative tick-driven grid state machine.

use crate::action::Action;
use crate::cell::{GlobalVariableDefinition, VariableCell};
use crate::event::{GridEvent, RewardMap, accumulate_rewards};
use crate::geometry::{Location, Orientation};
use crate::object::{
    ActionContext, BOUNDARY_OBJECT_NAME, Behaviour, EMPTY_OBJECT_NAME, Object, ObjectId, ObjectRef,
};
use crate::queue::DelayedActionQueue;
use crate::rng::RandomGenerator;
use crate::GridError;
use gridsim_index::{CollisionDetector, SearchShape, SpatialHashCollisionDetector};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Shape of the region that fires a collision trigger.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TriggerType {
    #[default]
    None,
    RangeBoxBoundary,
    RangeBoxArea,
}

/// Which object names trigger which action on proximity, and how.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionTriggerDefinition {
    pub source_object_names: BTreeSet<String>,
    pub destination_object_names: BTreeSet<String>,
    pub trigger_type: TriggerType,
    /// Chebyshev radius of the range box.
    pub range: u32,
    /// Interpret `offset` in the source object's facing frame.
    pub relative: bool,
    /// When non-zero, restricts matches to the single cell `source + offset`.
    pub offset: Location,
}

impl Default for ActionTriggerDefinition {
    fn default() -> Self {
        Self {
            source_object_names: BTreeSet::new(),
            destination_object_names: BTreeSet::new(),
            trigger_type: TriggerType::RangeBoxArea,
            range: 1,
            relative: false,
            offset: Location::default(),
        }
    }
}

/// Builds the spatial index backing one registered trigger.
pub trait CollisionDetectorFactory: Send {
    fn create(
        &self,
        definition: &ActionTriggerDefinition,
    ) -> Result<Box<dyn CollisionDetector<ObjectId>>, GridError>;
}

/// Default factory producing spatial-hash detectors sized to the trigger range.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpatialHashCollisionDetectorFactory;

impl CollisionDetectorFactory for SpatialHashCollisionDetectorFactory {
    fn create(
        &self,
        definition: &ActionTriggerDefinition,
    ) -> Result<Box<dyn CollisionDetector<ObjectId>>, GridError> {
        let shape = match definition.trigger_type {
            TriggerType::RangeBoxArea => SearchShape::Area,
            TriggerType::RangeBoxBoundary => SearchShape::Boundary,
            TriggerType::None => {
                return Err(GridError::InvalidConfig(
                    "trigger type none has no detector",
                ));
            }
        };
        let cell_size = definition.range.max(1);
        let detector = SpatialHashCollisionDetector::new(cell_size, definition.range, shape)?;
        Ok(Box::new(detector))
    }
}

/// Static configuration for a grid instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GridConfig {
    /// Number of players (at least 1); player id 0 is the neutral observer.
    pub player_count: u32,
    /// Optional RNG seed for reproducible runs.
    pub rng_seed: Option<u64>,
    /// Record a [`GridEvent`] per executed action.
    pub record_history: bool,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            player_count: 1,
            rng_seed: None,
            record_history: false,
        }
    }
}

impl GridConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), GridError> {
        if self.player_count == 0 {
            return Err(GridError::InvalidConfig("player_count must be at least 1"));
        }
        Ok(())
    }
}

/// The aggregate simulation state machine.
///
/// Owns every object, the tile index, global variables, the delayed-action
/// queue, collision triggers, dirty-location tracking, event history, and the
/// random source. Single-threaded: one logical owner per grid at a time, with
/// parallelism achieved by running independent grids.
pub struct Grid {
    width: u32,
    height: u32,
    initialized: bool,
    player_count: u32,
    game_ticks: VariableCell,
    random: RandomGenerator,

    updated_locations: Vec<HashSet<Location>>,

    object_ids: HashMap<String, u32>,
    object_variable_ids: HashMap<String, u32>,
    object_variable_map: HashMap<String, Vec<String>>,

    objects: SlotMap<ObjectId, Object>,
    occupied_locations: HashMap<Location, BTreeMap<i32, ObjectId>>,
    object_counters: HashMap<String, BTreeMap<u32, VariableCell>>,
    player_avatars: BTreeMap<u32, ObjectId>,
    global_variables: BTreeMap<String, BTreeMap<u32, VariableCell>>,

    delayed_actions: DelayedActionQueue,
    behaviour_probabilities: HashMap<String, Vec<f32>>,

    record_events: bool,
    event_history: Vec<GridEvent>,

    collision_object_action_names: HashMap<String, BTreeSet<String>>,
    collision_source_object_action_names: HashMap<String, BTreeSet<String>>,
    collision_source_objects: BTreeSet<ObjectId>,
    collision_detector_factory: Box<dyn CollisionDetectorFactory>,
    collision_detectors: BTreeMap<String, Box<dyn CollisionDetector<ObjectId>>>,
    action_trigger_definitions: BTreeMap<String, ActionTriggerDefinition>,

    empty_objects: BTreeMap<u32, Object>,
    boundary_objects: BTreeMap<u32, Object>,

    // Returned by reference when a lookup misses.
    empty_locations: HashSet<Location>,
    empty_tile: BTreeMap<i32, ObjectId>,
}

impl Default for Grid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grid")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("player_count", &self.player_count)
            .field("tick", &self.game_ticks.get())
            .field("object_count", &self.objects.len())
            .field("delayed_actions", &self.delayed_actions.len())
            .finish_non_exhaustive()
    }
}

impl Grid {
    /// Create a grid with the default configuration (one player, entropy seed).
    #[must_use]
    pub fn new() -> Self {
        Self::build(GridConfig::default())
    }

    /// Create a grid from a validated configuration.
    pub fn with_config(config: GridConfig) -> Result<Self, GridError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Replace the factory used to build trigger detectors.
    #[must_use]
    pub fn with_collision_detector_factory(
        mut self,
        factory: Box<dyn CollisionDetectorFactory>,
    ) -> Self {
        self.collision_detector_factory = factory;
        self
    }

    fn build(config: GridConfig) -> Self {
        let random = match config.rng_seed {
            Some(seed) => RandomGenerator::seeded(seed),
            None => RandomGenerator::new(),
        };
        Self {
            width: 0,
            height: 0,
            initialized: false,
            player_count: config.player_count.max(1),
            game_ticks: VariableCell::new(0),
            random,
            updated_locations: Vec::new(),
            object_ids: HashMap::new(),
            object_variable_ids: HashMap::new(),
            object_variable_map: HashMap::new(),
            objects: SlotMap::with_key(),
            occupied_locations: HashMap::new(),
            object_counters: HashMap::new(),
            player_avatars: BTreeMap::new(),
            global_variables: BTreeMap::new(),
            delayed_actions: DelayedActionQueue::new(),
            behaviour_probabilities: HashMap::new(),
            record_events: config.record_history,
            event_history: Vec::new(),
            collision_object_action_names: HashMap::new(),
            collision_source_object_action_names: HashMap::new(),
            collision_source_objects: BTreeSet::new(),
            collision_detector_factory: Box::new(SpatialHashCollisionDetectorFactory),
            collision_detectors: BTreeMap::new(),
            action_trigger_definitions: BTreeMap::new(),
            empty_objects: BTreeMap::new(),
            boundary_objects: BTreeMap::new(),
            empty_locations: HashSet::new(),
            empty_tile: BTreeMap::new(),
        }
    }

    /// Set the number of players; takes effect at the next `reset_map`.
    pub fn set_player_count(&mut self, player_count: u32) {
        self.player_count = player_count.max(1);
    }

    #[must_use]
    pub fn player_count(&self) -> u32 {
        self.player_count
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Shared tick counter cell. Delayed actions and rule scripts observe
    /// the live value through their own clones.
    #[must_use]
    pub fn tick_cell(&self) -> VariableCell {
        self.game_ticks.clone()
    }

    pub fn set_tick_count(&mut self, tick_count: i32) {
        self.game_ticks.set(tick_count);
    }

    /// Reseed the random source.
    pub fn seed_random_generator(&mut self, seed: u32) {
        self.random.seed(seed);
    }

    /// Mutable access to the random source for rule scripts.
    #[must_use]
    pub fn random_generator_mut(&mut self) -> &mut RandomGenerator {
        &mut self.random
    }

    /// Discard all objects and per-map state and size the grid to
    /// `width * height`. Dirty-location sets are reallocated to
    /// `player_count + 1` entries (index 0 is the neutral observer).
    pub fn reset_map(&mut self, width: u32, height: u32) {
        debug!(width, height, "resetting map");
        self.width = width;
        self.height = height;
        let ids: Vec<ObjectId> = self.objects.keys().collect();
        for detector in self.collision_detectors.values_mut() {
            for &id in &ids {
                detector.remove(id);
            }
        }
        self.objects.clear();
        self.occupied_locations.clear();
        self.object_counters.clear();
        self.player_avatars.clear();
        self.collision_source_objects.clear();
        self.delayed_actions.clear();
        self.event_history.clear();
        self.updated_locations =
            vec![HashSet::new(); (self.player_count + 1) as usize];
        self.game_ticks.set(0);
        self.install_default_sentinels();
        self.initialized = true;
    }

    /// Full reset back to a freshly constructed grid: also clears type
    /// registries, global variables, triggers, sentinels, and history.
    pub fn reset(&mut self) {
        debug!("resetting grid");
        self.width = 0;
        self.height = 0;
        self.initialized = false;
        self.objects.clear();
        self.occupied_locations.clear();
        self.object_counters.clear();
        self.player_avatars.clear();
        self.object_ids.clear();
        self.object_variable_ids.clear();
        self.object_variable_map.clear();
        self.global_variables.clear();
        self.delayed_actions.clear();
        self.behaviour_probabilities.clear();
        self.event_history.clear();
        self.collision_object_action_names.clear();
        self.collision_source_object_action_names.clear();
        self.collision_source_objects.clear();
        self.collision_detectors.clear();
        self.action_trigger_definitions.clear();
        self.empty_objects.clear();
        self.boundary_objects.clear();
        self.updated_locations.clear();
        self.game_ticks.set(0);
    }

    /// Instantiate global variable cells from their definitions.
    ///
    /// Per-player definitions get one cell per player id plus the neutral
    /// id 0; globals get a single cell under id 0. Fails while objects are
    /// on the grid: variables are fixed at reset.
    pub fn reset_global_variables(
        &mut self,
        definitions: &BTreeMap<String, GlobalVariableDefinition>,
    ) -> Result<(), GridError> {
        if !self.objects.is_empty() {
            return Err(GridError::InvalidState(
                "global variables cannot be redefined while objects exist",
            ));
        }
        self.global_variables.clear();
        for (name, definition) in definitions {
            let mut cells = BTreeMap::new();
            if definition.per_player {
                for player_id in 0..=self.player_count {
                    cells.insert(player_id, VariableCell::new(definition.initial_value));
                }
            } else {
                cells.insert(0, VariableCell::new(definition.initial_value));
            }
            self.global_variables.insert(name.clone(), cells);
        }
        Ok(())
    }

    /// Assign values to already-defined global variable cells.
    pub fn set_global_variables(
        &mut self,
        values: &HashMap<String, HashMap<u32, i32>>,
    ) -> Result<(), GridError> {
        for (name, per_player) in values {
            let Some(cells) = self.global_variables.get(name) else {
                return Err(GridError::UnknownVariable(name.clone()));
            };
            for (&player_id, &value) in per_player {
                let Some(cell) = cells.get(&player_id) else {
                    return Err(GridError::UnknownVariable(format!("{name}[{player_id}]")));
                };
                cell.set(value);
            }
        }
        Ok(())
    }

    /// Register an object type, assigning it a dense id in registration
    /// order. Idempotent when repeated with the same variable set.
    pub fn init_object(
        &mut self,
        name: impl Into<String>,
        variable_names: Vec<String>,
    ) -> Result<(), GridError> {
        let name = name.into();
        if let Some(existing) = self.object_variable_map.get(&name) {
            let mut registered = existing.clone();
            registered.sort();
            let mut requested = variable_names.clone();
            requested.sort();
            if registered == requested {
                return Ok(());
            }
            return Err(GridError::ObjectRedefinition(name));
        }
        let type_id = u32::try_from(self.object_ids.len()).unwrap_or(u32::MAX);
        self.object_ids.insert(name.clone(), type_id);
        for variable_name in &variable_names {
            if !self.object_variable_ids.contains_key(variable_name) {
                let variable_id =
                    u32::try_from(self.object_variable_ids.len()).unwrap_or(u32::MAX);
                self.object_variable_ids
                    .insert(variable_name.clone(), variable_id);
            }
        }
        debug!(name = %name, variables = ?variable_names, "registered object type");
        self.object_variable_map.insert(name, variable_names);
        Ok(())
    }

    /// Bind `object` onto the grid at `location`.
    ///
    /// Ensures the type's declared variables exist on the object, bumps the
    /// owner's object counter, indexes the object for collisions, marks the
    /// location dirty for every player, and (optionally) fires the object's
    /// initial actions.
    pub fn add_object(
        &mut self,
        location: Location,
        mut object: Object,
        apply_initial_actions: bool,
        originating_action: Option<&Action>,
        orientation: Orientation,
    ) -> Result<ObjectId, GridError> {
        if !self.initialized {
            return Err(GridError::InvalidState(
                "reset_map must complete before objects are added",
            ));
        }
        let Some(&type_id) = self.object_ids.get(object.name()) else {
            return Err(GridError::UnknownObjectName(object.name().to_string()));
        };
        if object.player_id() > self.player_count {
            return Err(GridError::PlayerOutOfRange(object.player_id()));
        }
        let z_index = object.z_index();
        if self
            .occupied_locations
            .get(&location)
            .is_some_and(|tile| tile.contains_key(&z_index))
        {
            return Err(GridError::SlotOccupied { location, z_index });
        }

        object.set_type_id(type_id);
        object.set_location(location);
        if orientation != Orientation::NoOrientation {
            object.set_orientation(orientation);
        }
        let variable_names = self
            .object_variable_map
            .get(object.name())
            .cloned()
            .unwrap_or_default();
        for variable_name in &variable_names {
            object.ensure_variable(variable_name);
        }

        let name = object.name().to_string();
        let player_id = object.player_id();
        let avatar = object.is_avatar();
        let object_orientation = object.orientation();
        let counter = self.counter_cell(&name, player_id);
        counter.add(1);
        object.set_counter(counter);

        let id = self.objects.insert(object);
        self.occupied_locations
            .entry(location)
            .or_default()
            .insert(z_index, id);
        if avatar && player_id > 0 {
            self.player_avatars.insert(player_id, id);
        }
        self.index_object_for_collisions(id, &name, location);
        self.mark_dirty(location);
        debug!(name = %name, ?location, player_id, "added object");
        self.debug_assert_coherent();

        if apply_initial_actions {
            let templates = self
                .objects
                .get(id)
                .map(|object| object.initial_actions().to_vec())
                .unwrap_or_default();
            for template in templates {
                let orientation = if template.orientation != Orientation::NoOrientation {
                    template.orientation
                } else if let Some(origin) =
                    originating_action.filter(|action| action.orientation() != Orientation::NoOrientation)
                {
                    origin.orientation()
                } else {
                    object_orientation
                };
                let action =
                    Action::new(template.action_name.clone(), location, orientation.unit_vector())
                        .with_orientation(orientation)
                        .with_originating_object(id)
                        .with_delay(template.delay);
                if template.delay > 0 {
                    self.delay_action(player_id, action);
                } else {
                    let rewards = self.execute_and_record(player_id, &action);
                    trace!(action = %template.action_name, ?rewards, "applied initial action");
                }
            }
        }
        Ok(id)
    }

    /// Unbind an object from every index. Returns the detached object, or
    /// `None` when it was not on the grid.
    pub fn remove_object(&mut self, id: ObjectId) -> Option<Object> {
        let object = self.objects.remove(id)?;
        let location = object.location();
        let z_index = object.z_index();
        if let Some(tile) = self.occupied_locations.get_mut(&location) {
            tile.remove(&z_index);
            if tile.is_empty() {
                self.occupied_locations.remove(&location);
            }
        }
        object.counter().add(-1);
        if self.player_avatars.get(&object.player_id()) == Some(&id) {
            self.player_avatars.remove(&object.player_id());
        }
        self.unindex_object_for_collisions(id, object.name());
        self.mark_dirty(location);
        debug!(name = %object.name(), ?location, "removed object");
        self.debug_assert_coherent();
        Some(object)
    }

    /// Atomic move. Verifies the object sits at `previous_location` and the
    /// target slot is free; on success marks both locations dirty. Returns
    /// `false` without mutating otherwise.
    pub fn update_location(
        &mut self,
        id: ObjectId,
        previous_location: Location,
        new_location: Location,
    ) -> bool {
        let Some(object) = self.objects.get(id) else {
            return false;
        };
        if object.location() != previous_location {
            return false;
        }
        let z_index = object.z_index();
        if self
            .occupied_locations
            .get(&new_location)
            .is_some_and(|tile| tile.contains_key(&z_index))
        {
            return false;
        }
        let name = object.name().to_string();
        if let Some(tile) = self.occupied_locations.get_mut(&previous_location) {
            tile.remove(&z_index);
            if tile.is_empty() {
                self.occupied_locations.remove(&previous_location);
            }
        }
        self.occupied_locations
            .entry(new_location)
            .or_default()
            .insert(z_index, id);
        if let Some(object) = self.objects.get_mut(id) {
            object.set_location(new_location);
        }
        self.reindex_object_location(id, &name, new_location);
        self.mark_dirty(previous_location);
        self.mark_dirty(new_location);
        trace!(?previous_location, ?new_location, "moved object");
        self.debug_assert_coherent();
        true
    }

    /// Mark `location` dirty for every player without moving anything.
    pub fn invalidate_location(&mut self, location: Location) -> bool {
        self.mark_dirty(location);
        true
    }

    /// Locations dirtied for `player_id` since its last purge.
    #[must_use]
    pub fn updated_locations(&self, player_id: u32) -> &HashSet<Location> {
        self.updated_locations
            .get(player_id as usize)
            .unwrap_or(&self.empty_locations)
    }

    /// Clear the dirty set for `player_id`. The grid never purges on its own.
    pub fn purge_updated_locations(&mut self, player_id: u32) {
        if let Some(set) = self.updated_locations.get_mut(player_id as usize) {
            set.clear();
        }
    }

    /// Execute `actions` for `player_id` in submission order.
    ///
    /// Actions whose source does not exist, is not owned by the player, or
    /// does not implement the action are silently skipped with zero reward.
    /// Actions carrying a delay are enqueued instead of executed; their
    /// rewards surface from the `update` that fires them.
    pub fn perform_actions(&mut self, player_id: u32, actions: &[Action]) -> RewardMap {
        debug!(player_id, count = actions.len(), "performing actions");
        let mut rewards = RewardMap::new();
        for action in actions {
            if !self.action_allowed(player_id, action) {
                trace!(player_id, action = action.name(), "action not allowed; skipping");
                continue;
            }
            if action.delay() > 0 {
                self.delay_action(player_id, action.clone());
                continue;
            }
            let executed = self.execute_and_record(player_id, action);
            accumulate_rewards(&mut rewards, &executed);
        }
        rewards
    }

    /// Enqueue `action` to fire `action.delay()` ticks from now.
    pub fn delay_action(&mut self, player_id: u32, action: Action) {
        let due_tick = self.game_ticks.get() + action.delay() as i32;
        trace!(player_id, action = action.name(), due_tick, "delaying action");
        self.delayed_actions.push(due_tick, player_id, action);
    }

    /// One tick: advance the tick counter, drain delayed actions now due,
    /// then fire collision triggers. Returns the summed rewards.
    ///
    /// The counter moves first so that, once the call returns, every entry
    /// left in the delayed queue is strictly in the future.
    pub fn update(&mut self) -> RewardMap {
        self.game_ticks.add(1);
        trace!(tick = self.game_ticks.get(), "advancing tick");
        let mut rewards = self.process_delayed_actions();
        let collision_rewards = self.process_collisions();
        accumulate_rewards(&mut rewards, &collision_rewards);
        rewards
    }

    /// Pop and execute every delayed action due at the current tick,
    /// including actions enqueued during processing with zero delay.
    pub fn process_delayed_actions(&mut self) -> RewardMap {
        let mut rewards = RewardMap::new();
        loop {
            let current_tick = self.game_ticks.get();
            let Some(item) = self.delayed_actions.pop_due(current_tick) else {
                break;
            };
            trace!(
                player_id = item.player_id,
                action = item.action.name(),
                "executing delayed action"
            );
            let executed = self.execute_and_record(item.player_id, &item.action);
            accumulate_rewards(&mut rewards, &executed);
        }
        rewards
    }

    /// Fire one triggered action per (source, in-range target) pair.
    ///
    /// Iteration is over an ordered source set, so execution order is
    /// deterministic. No dedup across targets: each pair yields one action.
    pub fn process_collisions(&mut self) -> RewardMap {
        let mut rewards = RewardMap::new();
        if self.collision_source_objects.is_empty() {
            return rewards;
        }
        let source_ids: Vec<ObjectId> = self.collision_source_objects.iter().copied().collect();
        for source_id in source_ids {
            let Some(source) = self.objects.get(source_id) else {
                continue;
            };
            let source_name = source.name().to_string();
            let Some(action_names) = self.collision_source_object_action_names.get(&source_name)
            else {
                continue;
            };
            let action_names: Vec<String> = action_names.iter().cloned().collect();
            for action_name in action_names {
                // Re-resolve: an earlier trigger may have moved or removed us.
                let Some(source) = self.objects.get(source_id) else {
                    break;
                };
                let source_location = source.location();
                let source_orientation = source.orientation();
                let definition = self.action_trigger_definitions.get(&action_name).cloned();
                let Some(search_result) = self
                    .collision_detectors
                    .get(&action_name)
                    .map(|detector| detector.search(source_location.as_point()))
                else {
                    continue;
                };
                let offset_cell = definition.as_ref().and_then(|definition| {
                    if definition.offset.is_zero() {
                        None
                    } else {
                        let offset = if definition.relative {
                            source_orientation.rotate(definition.offset)
                        } else {
                            definition.offset
                        };
                        Some(source_location + offset)
                    }
                });
                for target_id in search_result.keys {
                    if target_id == source_id {
                        continue;
                    }
                    let Some(target) = self.objects.get(target_id) else {
                        continue;
                    };
                    if let Some(definition) = &definition {
                        if !definition.destination_object_names.contains(target.name()) {
                            continue;
                        }
                    }
                    let target_location = target.location();
                    if offset_cell.is_some_and(|cell| target_location != cell) {
                        continue;
                    }
                    let action = Action::new(
                        action_name.clone(),
                        source_location,
                        target_location - source_location,
                    )
                    .with_orientation(source_orientation)
                    .with_originating_object(source_id);
                    trace!(
                        action = %action_name,
                        ?source_location,
                        ?target_location,
                        "collision trigger fired"
                    );
                    let triggered = self.execute_and_record(0, &action);
                    accumulate_rewards(&mut rewards, &triggered);
                }
            }
        }
        rewards
    }

    /// Execute a single action, bypassing player-ownership filtering.
    ///
    /// Used by rule scripts and delayed dispatch. Missing sources, sources
    /// that cannot perform the action, and probability-filtered-out
    /// dispatches all yield zero reward.
    pub fn execute_action(&mut self, player_id: u32, action: &Action) -> RewardMap {
        let Some((source, source_location)) = self.resolve_source(player_id, action) else {
            trace!(action = action.name(), "source object no longer exists; dropping action");
            return RewardMap::new();
        };
        let can_perform = self
            .resolve_ref(source)
            .is_some_and(|object| object.can_perform_action(action.name()));
        if !can_perform {
            trace!(action = action.name(), "source cannot perform action; dropping");
            return RewardMap::new();
        }
        let destination_location = action.destination_from(source_location);
        let destination = match self.object_at(destination_location) {
            Some(id) => ObjectRef::Object(id),
            None => self.sentinel_ref(player_id, destination_location),
        };

        // Candidate behaviours: destination reactions first, then source
        // behaviours, matching execution order.
        let mut candidates: Vec<Arc<dyn Behaviour>> = Vec::new();
        if let Some(destination_object) = self.resolve_ref(destination) {
            candidates.extend(destination_object.dst_behaviours(action.name()).iter().cloned());
        }
        if let Some(source_object) = self.resolve_ref(source) {
            candidates.extend(source_object.src_behaviours(action.name()).iter().cloned());
        }

        if let Some(weights) = self.behaviour_probabilities.get(action.name()) {
            if weights.len() != candidates.len() {
                error!(
                    action = action.name(),
                    candidates = candidates.len(),
                    weights = weights.len(),
                    "behaviour probability vector does not match candidate behaviours; dropping action"
                );
                debug_assert!(
                    false,
                    "behaviour probability vector length mismatch for {}",
                    action.name()
                );
                return RewardMap::new();
            }
            let weights = weights.clone();
            candidates = match self.random.sample_weighted(&weights) {
                Some(index) => vec![candidates.swap_remove(index)],
                None => Vec::new(),
            };
        }

        let ctx = ActionContext {
            action: action.clone(),
            player_id,
            source,
            destination,
            source_location,
            destination_location,
        };
        let mut rewards = RewardMap::new();
        for behaviour in candidates {
            let outcome = behaviour.on_action(self, &ctx);
            accumulate_rewards(&mut rewards, &outcome.rewards);
            if outcome.abort {
                trace!(action = action.name(), "dispatch aborted by behaviour");
                break;
            }
        }
        rewards
    }

    /// Register a proximity trigger: when a source-named object comes into
    /// range of a destination-named object, `action_name` fires between them.
    pub fn add_action_trigger(
        &mut self,
        action_name: impl Into<String>,
        definition: ActionTriggerDefinition,
    ) -> Result<(), GridError> {
        let action_name = action_name.into();
        if definition.trigger_type == TriggerType::None {
            return Err(GridError::InvalidConfig(
                "action triggers require a range box trigger type",
            ));
        }
        debug!(action = %action_name, ?definition, "registering action trigger");
        let detector = self.collision_detector_factory.create(&definition)?;
        for name in &definition.source_object_names {
            self.collision_source_object_action_names
                .entry(name.clone())
                .or_default()
                .insert(action_name.clone());
            self.collision_object_action_names
                .entry(name.clone())
                .or_default()
                .insert(action_name.clone());
        }
        for name in &definition.destination_object_names {
            self.collision_object_action_names
                .entry(name.clone())
                .or_default()
                .insert(action_name.clone());
        }
        self.collision_detectors.insert(action_name.clone(), detector);

        // Index objects already on the grid.
        let mut indexed = Vec::new();
        let mut sources = Vec::new();
        for (id, object) in &self.objects {
            let is_source = definition.source_object_names.contains(object.name());
            let is_destination = definition.destination_object_names.contains(object.name());
            if is_source {
                sources.push(id);
            }
            if is_source || is_destination {
                indexed.push((id, object.location().as_point()));
            }
        }
        if let Some(detector) = self.collision_detectors.get_mut(&action_name) {
            for (id, point) in indexed {
                detector.upsert(id, point);
            }
        }
        self.collision_source_objects.extend(sources);
        self.action_trigger_definitions.insert(action_name, definition);
        Ok(())
    }

    /// Install a detector for `action_name` tracking the named objects.
    /// Objects already on the grid are indexed immediately.
    pub fn add_collision_detector(
        &mut self,
        object_names: BTreeSet<String>,
        action_name: impl Into<String>,
        mut detector: Box<dyn CollisionDetector<ObjectId>>,
    ) {
        let action_name = action_name.into();
        for name in &object_names {
            self.collision_object_action_names
                .entry(name.clone())
                .or_default()
                .insert(action_name.clone());
        }
        for (id, object) in &self.objects {
            if object_names.contains(object.name()) {
                detector.upsert(id, object.location().as_point());
            }
        }
        self.collision_detectors.insert(action_name, detector);
    }

    /// Configure per-action behaviour selection weights.
    pub fn set_behaviour_probabilities(&mut self, probabilities: HashMap<String, Vec<f32>>) {
        self.behaviour_probabilities = probabilities;
    }

    /// Override the empty sentinel for the object's player id.
    pub fn add_player_default_empty_object(&mut self, object: Object) {
        self.empty_objects.insert(object.player_id(), object);
    }

    /// Override the boundary sentinel for the object's player id.
    pub fn add_player_default_boundary_object(&mut self, object: Object) {
        self.boundary_objects.insert(object.player_id(), object);
    }

    #[must_use]
    pub fn player_default_empty_object(&self, player_id: u32) -> Option<&Object> {
        self.empty_objects.get(&player_id)
    }

    #[must_use]
    pub fn player_default_boundary_object(&self, player_id: u32) -> Option<&Object> {
        self.boundary_objects.get(&player_id)
    }

    /// Iterate all on-grid objects with their handles.
    pub fn objects(&self) -> impl Iterator<Item = (ObjectId, &Object)> {
        self.objects.iter()
    }

    #[must_use]
    pub fn object(&self, id: ObjectId) -> Option<&Object> {
        self.objects.get(id)
    }

    #[must_use]
    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut Object> {
        self.objects.get_mut(id)
    }

    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Handle of the highest-z object at `location`, if any.
    #[must_use]
    pub fn object_at(&self, location: Location) -> Option<ObjectId> {
        self.occupied_locations
            .get(&location)
            .and_then(|tile| tile.last_key_value())
            .map(|(_, &id)| id)
    }

    /// The object rendered at `location` from `player_id`'s point of view:
    /// the highest-z object, the player's empty sentinel for an unoccupied
    /// in-bounds cell, or the boundary sentinel outside the map.
    #[must_use]
    pub fn get_object(&self, player_id: u32, location: Location) -> Option<&Object> {
        match self.object_at(location) {
            Some(id) => self.objects.get(id),
            None => self.resolve_ref(self.sentinel_ref(player_id, location)),
        }
    }

    /// The z-ordered stack of objects at `location`.
    #[must_use]
    pub fn get_objects_at(&self, location: Location) -> &BTreeMap<i32, ObjectId> {
        self.occupied_locations
            .get(&location)
            .unwrap_or(&self.empty_tile)
    }

    /// Registered object type ids, dense in registration order.
    #[must_use]
    pub fn object_ids(&self) -> &HashMap<String, u32> {
        &self.object_ids
    }

    /// Registered object variable ids, dense in registration order.
    #[must_use]
    pub fn object_variable_ids(&self) -> &HashMap<String, u32> {
        &self.object_variable_ids
    }

    /// Object type names ordered by type id.
    #[must_use]
    pub fn object_names(&self) -> Vec<String> {
        let mut names: Vec<(&String, u32)> =
            self.object_ids.iter().map(|(name, &id)| (name, id)).collect();
        names.sort_by_key(|&(_, id)| id);
        names.into_iter().map(|(name, _)| name.clone()).collect()
    }

    /// Variable names ordered by variable id.
    #[must_use]
    pub fn object_variable_names(&self) -> Vec<String> {
        let mut names: Vec<(&String, u32)> = self
            .object_variable_ids
            .iter()
            .map(|(name, &id)| (name, id))
            .collect();
        names.sort_by_key(|&(_, id)| id);
        names.into_iter().map(|(name, _)| name.clone()).collect()
    }

    /// Mapping of object type name to its declared variable names.
    #[must_use]
    pub fn object_variable_map(&self) -> &HashMap<String, Vec<String>> {
        &self.object_variable_map
    }

    /// Avatar object per player id.
    #[must_use]
    pub fn player_avatar_objects(&self) -> &BTreeMap<u32, ObjectId> {
        &self.player_avatars
    }

    /// Counter cells for `name`, one per player id (created on demand).
    /// Clones share storage with the cells the grid maintains.
    pub fn object_counter(&mut self, name: &str) -> BTreeMap<u32, VariableCell> {
        let player_count = self.player_count;
        let cells = self.object_counters.entry(name.to_string()).or_default();
        for player_id in 0..=player_count {
            cells
                .entry(player_id)
                .or_insert_with(|| VariableCell::new(0));
        }
        cells.clone()
    }

    /// All global variable cells, keyed by name then player id.
    #[must_use]
    pub fn global_variables(&self) -> &BTreeMap<String, BTreeMap<u32, VariableCell>> {
        &self.global_variables
    }

    /// Pending delayed actions.
    #[must_use]
    pub fn delayed_actions(&self) -> &DelayedActionQueue {
        &self.delayed_actions
    }

    /// Toggle event recording.
    pub fn enable_history(&mut self, enable: bool) {
        self.record_events = enable;
    }

    /// Recorded events since the last purge.
    #[must_use]
    pub fn history(&self) -> &[GridEvent] {
        &self.event_history
    }

    pub fn purge_history(&mut self) {
        self.event_history.clear();
    }

    /// Installed collision detectors keyed by action name.
    #[must_use]
    pub fn collision_detectors(&self) -> &BTreeMap<String, Box<dyn CollisionDetector<ObjectId>>> {
        &self.collision_detectors
    }

    /// Registered trigger definitions keyed by action name.
    #[must_use]
    pub fn action_trigger_definitions(&self) -> &BTreeMap<String, ActionTriggerDefinition> {
        &self.action_trigger_definitions
    }

    /// Reverse index: object name to trigger actions it may initiate.
    #[must_use]
    pub fn collision_source_object_action_names(&self) -> &HashMap<String, BTreeSet<String>> {
        &self.collision_source_object_action_names
    }

    /// Reverse index: object name to trigger actions it participates in.
    #[must_use]
    pub fn collision_object_action_names(&self) -> &HashMap<String, BTreeSet<String>> {
        &self.collision_object_action_names
    }

    fn counter_cell(&mut self, name: &str, player_id: u32) -> VariableCell {
        let player_count = self.player_count;
        let cells = self.object_counters.entry(name.to_string()).or_default();
        for id in 0..=player_count {
            cells.entry(id).or_insert_with(|| VariableCell::new(0));
        }
        cells
            .entry(player_id)
            .or_insert_with(|| VariableCell::new(0))
            .clone()
    }

    fn install_default_sentinels(&mut self) {
        for player_id in 0..=self.player_count {
            self.empty_objects
                .entry(player_id)
                .or_insert_with(|| Object::new(EMPTY_OBJECT_NAME, player_id));
            self.boundary_objects
                .entry(player_id)
                .or_insert_with(|| Object::new(BOUNDARY_OBJECT_NAME, player_id));
        }
    }

    fn mark_dirty(&mut self, location: Location) {
        for set in &mut self.updated_locations {
            set.insert(location);
        }
    }

    fn in_bounds(&self, location: Location) -> bool {
        location.x >= 0
            && location.y >= 0
            && (location.x as u32) < self.width
            && (location.y as u32) < self.height
    }

    fn sentinel_ref(&self, player_id: u32, location: Location) -> ObjectRef {
        if self.in_bounds(location) {
            ObjectRef::Empty(player_id)
        } else {
            ObjectRef::Boundary(player_id)
        }
    }

    fn resolve_ref(&self, reference: ObjectRef) -> Option<&Object> {
        match reference {
            ObjectRef::Object(id) => self.objects.get(id),
            ObjectRef::Empty(player_id) => self.empty_objects.get(&player_id),
            ObjectRef::Boundary(player_id) => self.boundary_objects.get(&player_id),
        }
    }

    /// Resolve the acting object of `action`. `None` means the originating
    /// object has been removed and the action must be dropped.
    fn resolve_source(&self, player_id: u32, action: &Action) -> Option<(ObjectRef, Location)> {
        if let Some(id) = action.originating_object() {
            let object = self.objects.get(id)?;
            return Some((ObjectRef::Object(id), object.location()));
        }
        let location = action.source_location();
        match self.object_at(location) {
            Some(id) => Some((ObjectRef::Object(id), location)),
            None => Some((self.sentinel_ref(player_id, location), location)),
        }
    }

    fn action_allowed(&self, player_id: u32, action: &Action) -> bool {
        let Some((source, _)) = self.resolve_source(player_id, action) else {
            return false;
        };
        let Some(object) = self.resolve_ref(source) else {
            return false;
        };
        if !object.can_perform_action(action.name()) {
            return false;
        }
        match source {
            ObjectRef::Object(_) => player_id == 0 || object.player_id() == player_id,
            ObjectRef::Empty(_) | ObjectRef::Boundary(_) => true,
        }
    }

    /// Every executed action funnels through here so history capture and
    /// reward accounting cannot drift apart.
    fn execute_and_record(&mut self, player_id: u32, action: &Action) -> RewardMap {
        if !self.record_events {
            return self.execute_action(player_id, action);
        }
        let event = self.build_grid_event(player_id, action);
        let rewards = self.execute_action(player_id, action);
        if let Some(mut event) = event {
            event.rewards = rewards.clone();
            self.event_history.push(event);
        }
        rewards
    }

    fn build_grid_event(&self, player_id: u32, action: &Action) -> Option<GridEvent> {
        let (source, source_location) = self.resolve_source(player_id, action)?;
        let destination_location = action.destination_from(source_location);
        let destination = match self.object_at(destination_location) {
            Some(id) => ObjectRef::Object(id),
            None => self.sentinel_ref(player_id, destination_location),
        };
        let (source_object_name, source_object_player_id) = self.describe_ref(source, player_id);
        let (dest_object_name, destination_object_player_id) =
            self.describe_ref(destination, player_id);
        Some(GridEvent {
            tick: u32::try_from(self.game_ticks.get().max(0)).unwrap_or(0),
            player_id,
            action_name: action.name().to_string(),
            delay: action.delay(),
            source_object_name,
            dest_object_name,
            source_object_player_id,
            destination_object_player_id,
            source_location,
            dest_location: destination_location,
            rewards: RewardMap::new(),
        })
    }

    fn describe_ref(&self, reference: ObjectRef, fallback_player: u32) -> (String, u32) {
        match self.resolve_ref(reference) {
            Some(object) => (object.name().to_string(), object.player_id()),
            None => match reference {
                ObjectRef::Object(_) => (String::new(), fallback_player),
                ObjectRef::Empty(_) => (EMPTY_OBJECT_NAME.to_string(), fallback_player),
                ObjectRef::Boundary(_) => (BOUNDARY_OBJECT_NAME.to_string(), fallback_player),
            },
        }
    }

    fn index_object_for_collisions(&mut self, id: ObjectId, name: &str, location: Location) {
        self.reindex_object_location(id, name, location);
        if self.collision_source_object_action_names.contains_key(name) {
            self.collision_source_objects.insert(id);
        }
    }

    fn reindex_object_location(&mut self, id: ObjectId, name: &str, location: Location) {
        let Some(action_names) = self.collision_object_action_names.get(name) else {
            return;
        };
        for action_name in action_names {
            if let Some(detector) = self.collision_detectors.get_mut(action_name) {
                detector.upsert(id, location.as_point());
            }
        }
    }

    fn unindex_object_for_collisions(&mut self, id: ObjectId, name: &str) {
        if let Some(action_names) = self.collision_object_action_names.get(name) {
            for action_name in action_names {
                if let Some(detector) = self.collision_detectors.get_mut(action_name) {
                    detector.remove(id);
                }
            }
        }
        self.collision_source_objects.remove(&id);
    }

    #[cfg(debug_assertions)]
    fn debug_assert_coherent(&self) {
        for (id, object) in &self.objects {
            let slot = self
                .occupied_locations
                .get(&object.location())
                .and_then(|tile| tile.get(&object.z_index()));
            debug_assert_eq!(slot, Some(&id), "object {id:?} missing from its tile slot");
        }
        let indexed: usize = self.occupied_locations.values().map(BTreeMap::len).sum();
        debug_assert_eq!(indexed, self.objects.len(), "tile index out of sync");
        let mut counts: HashMap<(&str, u32), i32> = HashMap::new();
        for object in self.objects.values() {
            *counts.entry((object.name(), object.player_id())).or_insert(0) += 1;
        }
        for (name, cells) in &self.object_counters {
            for (&player_id, cell) in cells {
                let expected = counts.get(&(name.as_str(), player_id)).copied().unwrap_or(0);
                debug_assert_eq!(
                    cell.get(),
                    expected,
                    "object counter for ({name}, {player_id}) out of sync"
                );
            }
        }
    }

    #[cfg(not(debug_assertions))]
    fn debug_assert_coherent(&self) {}
}
