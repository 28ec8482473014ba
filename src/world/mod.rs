//! Collaborators the dungeon finder drives but does not own
//!
//! Player sessions, real parties, auras, teleports and quest rewards live in
//! the surrounding world server. The engine sees them only through these
//! traits, which keeps it testable against [`InMemoryWorld`].

pub mod memory;

pub use memory::InMemoryWorld;

use crate::dungeon::catalog::{Holiday, Position};
use crate::types::{Difficulty, GroupId, PlayerClass, PlayerId, Roles, Team};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Saved instance a player is locked to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceBind {
    pub map_id: u32,
    pub difficulty: Difficulty,
    pub instance_id: u32,
}

/// Everything the engine needs to know about a player at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub name: String,
    pub level: u8,
    pub class: PlayerClass,
    pub team: Team,
    /// Highest expansion the account owns
    pub expansion: u8,
    pub online: bool,
    pub group: Option<GroupId>,
    pub map_id: u32,
    pub position: Position,
    pub can_join_dungeon_finder: bool,
    pub in_battleground: bool,
    pub deserter: bool,
    pub random_cooldown: bool,
    pub frozen: bool,
    pub alive: bool,
    pub falling: bool,
    pub fatigued: bool,
    pub in_vehicle: bool,
    pub charming: bool,
    pub average_item_level: f32,
    pub achievements: BTreeSet<u32>,
    pub rewarded_quests: BTreeSet<u32>,
    pub items: BTreeSet<u32>,
    pub instance_binds: Vec<InstanceBind>,
}

impl Default for PlayerSnapshot {
    fn default() -> Self {
        Self {
            id: PlayerId(0),
            name: String::new(),
            level: 80,
            class: PlayerClass::Warrior,
            team: Team::Alliance,
            expansion: 2,
            online: true,
            group: None,
            map_id: 0,
            position: Position::default(),
            can_join_dungeon_finder: true,
            in_battleground: false,
            deserter: false,
            random_cooldown: false,
            frozen: false,
            alive: true,
            falling: false,
            fatigued: false,
            in_vehicle: false,
            charming: false,
            average_item_level: 0.0,
            achievements: BTreeSet::new(),
            rewarded_quests: BTreeSet::new(),
            items: BTreeSet::new(),
            instance_binds: Vec::new(),
        }
    }
}

impl PlayerSnapshot {
    /// Instance id the player is saved to for a map and difficulty
    pub fn bound_instance(&self, map_id: u32, difficulty: Difficulty) -> Option<u32> {
        self.instance_binds
            .iter()
            .find(|bind| bind.map_id == map_id && bind.difficulty == difficulty)
            .map(|bind| bind.instance_id)
    }
}

/// A real party as seen by the group system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub id: GroupId,
    pub leader: PlayerId,
    pub members: Vec<PlayerId>,
    pub is_lfg: bool,
}

/// Read access to sessions and world state
pub trait PlayerDirectory {
    fn player(&self, id: PlayerId) -> Option<PlayerSnapshot>;

    fn group(&self, id: GroupId) -> Option<GroupSnapshot>;

    /// True when either player ignores the other
    fn has_ignore(&self, a: PlayerId, b: PlayerId) -> bool;

    fn is_holiday_active(&self, holiday: Holiday) -> bool;

    /// Members that follow this player's answers (companions without a session)
    fn controlled_members(&self, _player: PlayerId) -> Vec<PlayerId> {
        Vec::new()
    }
}

/// Mutations on real parties
pub trait GroupService {
    fn create_lfg_group(&mut self, leader: PlayerId) -> GroupId;

    fn add_member(&mut self, group: GroupId, player: PlayerId);

    fn remove_member(&mut self, group: GroupId, player: PlayerId);

    fn set_roles(&mut self, group: GroupId, player: PlayerId, roles: Roles);

    fn set_dungeon_difficulty(&mut self, group: GroupId, difficulty: Difficulty);
}

/// Side effects on players: auras, movement and rewards
pub trait WorldActions {
    fn apply_random_cooldown(&mut self, player: PlayerId);

    fn remove_random_cooldown(&mut self, player: PlayerId);

    /// Move a player; false when the destination was rejected
    fn teleport(&mut self, player: PlayerId, map_id: u32, position: Position) -> bool;

    /// Send a player back to where they entered the dungeon from
    fn teleport_to_entry_point(&mut self, player: PlayerId);

    fn can_reward_quest(&self, player: PlayerId, quest_id: u32) -> bool;

    fn reward_quest(&mut self, player: PlayerId, quest_id: u32);

    /// Achievement credit for grouping with `strangers` players through the finder
    fn credit_grouped_with_strangers(&mut self, player: PlayerId, strangers: u8);
}

/// The full set of collaborators the engine needs
pub trait World: PlayerDirectory + GroupService + WorldActions {}

impl<T: PlayerDirectory + GroupService + WorldActions> World for T {}
