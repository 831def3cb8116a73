//! Event history records and reward accounting.

use crate::geometry::Location;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-player reward deltas produced by action execution.
pub type RewardMap = HashMap<u32, i32>;

/// Merge `from` into `into`, summing rewards per player.
pub fn accumulate_rewards(into: &mut RewardMap, from: &RewardMap) {
    for (&player_id, &reward) in from {
        *into.entry(player_id).or_insert(0) += reward;
    }
}

/// One executed action, as recorded when history is enabled.
///
/// Source and destination fields capture the pre-execution view; rewards are
/// attached after the behaviours have run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GridEvent {
    pub tick: u32,
    pub player_id: u32,
    pub action_name: String,
    pub delay: u32,
    pub source_object_name: String,
    pub dest_object_name: String,
    pub source_object_player_id: u32,
    pub destination_object_player_id: u32,
    pub source_location: Location,
    pub dest_location: Location,
    pub rewards: RewardMap,
}
