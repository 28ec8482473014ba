//! Per-player and per-group matchmaking state
//!
//! Entering a stable state (`None`, `Dungeon`, `FinishedDungeon`) records it
//! as the restore point; transient states leave the restore point alone, so a
//! failed role check or proposal rolls back to where the entity last rested.

use crate::types::{DungeonId, DungeonSet, EntityId, GroupId, LfgState, PlayerId, Roles, Team};
use std::collections::{BTreeSet, HashMap};
use tracing::trace;

/// Dungeon finder data kept for a player
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerData {
    pub state: LfgState,
    pub old_state: LfgState,
    pub roles: Roles,
    pub selected_dungeons: DungeonSet,
    pub comment: String,
    pub team: Team,
    pub group: Option<GroupId>,
    /// Party size when the proposal succeeded, for achievement credit
    pub party_size_at_join: u8,
}

impl Default for PlayerData {
    fn default() -> Self {
        Self {
            state: LfgState::None,
            old_state: LfgState::None,
            roles: Roles::NONE,
            selected_dungeons: DungeonSet::new(),
            comment: String::new(),
            team: Team::Alliance,
            group: None,
            party_size_at_join: 0,
        }
    }
}

impl PlayerData {
    pub fn set_state(&mut self, state: LfgState) {
        if state == LfgState::None {
            self.roles = Roles::NONE;
            self.selected_dungeons.clear();
            self.comment.clear();
        }
        if state.is_stable() {
            self.old_state = state;
        }
        self.state = state;
    }

    pub fn restore_state(&mut self) {
        if self.old_state == LfgState::None {
            self.selected_dungeons.clear();
            self.roles = Roles::NONE;
        }
        self.state = self.old_state;
    }
}

/// Dungeon finder data kept for a group
#[derive(Debug, Clone, PartialEq)]
pub struct GroupData {
    pub state: LfgState,
    pub old_state: LfgState,
    pub leader: Option<PlayerId>,
    pub players: BTreeSet<PlayerId>,
    pub dungeon: Option<DungeonId>,
    pub kicks_left: u8,
    pub vote_kick_active: bool,
    /// Group was formed by the dungeon finder
    pub is_lfg: bool,
    max_kicks: u8,
}

impl GroupData {
    pub fn new(max_kicks: u8) -> Self {
        Self {
            state: LfgState::None,
            old_state: LfgState::None,
            leader: None,
            players: BTreeSet::new(),
            dungeon: None,
            kicks_left: max_kicks,
            vote_kick_active: false,
            is_lfg: false,
            max_kicks,
        }
    }

    pub fn set_state(&mut self, state: LfgState) {
        if state == LfgState::None {
            self.dungeon = None;
            self.kicks_left = self.max_kicks;
        }
        if state.is_stable() {
            self.old_state = state;
        }
        self.state = state;
    }

    pub fn restore_state(&mut self) {
        self.state = self.old_state;
    }

    pub fn decrease_kicks_left(&mut self) {
        self.kicks_left = self.kicks_left.saturating_sub(1);
    }
}

/// Keyed store of player and group state
///
/// Lookups never create entries; writers go through `player_entry` and
/// `group_entry`, which create default state on first use.
#[derive(Debug, Clone)]
pub struct StateStore {
    players: HashMap<PlayerId, PlayerData>,
    groups: HashMap<GroupId, GroupData>,
    max_kicks: u8,
}

impl StateStore {
    pub fn new(max_kicks: u8) -> Self {
        Self {
            players: HashMap::new(),
            groups: HashMap::new(),
            max_kicks,
        }
    }

    pub fn player(&self, id: PlayerId) -> Option<&PlayerData> {
        self.players.get(&id)
    }

    pub fn group(&self, id: GroupId) -> Option<&GroupData> {
        self.groups.get(&id)
    }

    pub fn player_entry(&mut self, id: PlayerId) -> &mut PlayerData {
        self.players.entry(id).or_default()
    }

    pub fn group_entry(&mut self, id: GroupId) -> &mut GroupData {
        let max_kicks = self.max_kicks;
        self.groups
            .entry(id)
            .or_insert_with(|| GroupData::new(max_kicks))
    }

    pub fn state(&self, entity: EntityId) -> LfgState {
        match entity {
            EntityId::Player(id) => self.player(id).map(|p| p.state),
            EntityId::Group(id) => self.group(id).map(|g| g.state),
        }
        .unwrap_or_default()
    }

    pub fn old_state(&self, entity: EntityId) -> LfgState {
        match entity {
            EntityId::Player(id) => self.player(id).map(|p| p.old_state),
            EntityId::Group(id) => self.group(id).map(|g| g.old_state),
        }
        .unwrap_or_default()
    }

    pub fn set_state(&mut self, entity: EntityId, state: LfgState) {
        trace!("{}: state {} -> {}", entity, self.state(entity), state);
        match entity {
            EntityId::Player(id) => self.player_entry(id).set_state(state),
            EntityId::Group(id) => self.group_entry(id).set_state(state),
        }
    }

    pub fn restore_state(&mut self, entity: EntityId) {
        trace!(
            "{}: restore {} -> {}",
            entity,
            self.state(entity),
            self.old_state(entity)
        );
        match entity {
            EntityId::Player(id) => {
                if let Some(player) = self.players.get_mut(&id) {
                    player.restore_state();
                }
            }
            EntityId::Group(id) => {
                if let Some(group) = self.groups.get_mut(&id) {
                    group.restore_state();
                }
            }
        }
    }

    pub fn roles(&self, player: PlayerId) -> Roles {
        self.player(player).map(|p| p.roles).unwrap_or_default()
    }

    pub fn set_roles(&mut self, player: PlayerId, roles: Roles) {
        self.player_entry(player).roles = roles;
    }

    pub fn comment(&self, player: PlayerId) -> &str {
        self.player(player).map(|p| p.comment.as_str()).unwrap_or("")
    }

    pub fn set_comment(&mut self, player: PlayerId, comment: &str) {
        self.player_entry(player).comment = comment.to_string();
    }

    pub fn selected_dungeons(&self, player: PlayerId) -> DungeonSet {
        self.player(player)
            .map(|p| p.selected_dungeons.clone())
            .unwrap_or_default()
    }

    pub fn set_selected_dungeons(&mut self, player: PlayerId, dungeons: DungeonSet) {
        self.player_entry(player).selected_dungeons = dungeons;
    }

    pub fn team(&self, player: PlayerId) -> Option<Team> {
        self.player(player).map(|p| p.team)
    }

    pub fn set_team(&mut self, player: PlayerId, team: Team) {
        self.player_entry(player).team = team;
    }

    pub fn group_of(&self, player: PlayerId) -> Option<GroupId> {
        self.player(player).and_then(|p| p.group)
    }

    pub fn members(&self, group: GroupId) -> Vec<PlayerId> {
        self.group(group)
            .map(|g| g.players.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn leader(&self, group: GroupId) -> Option<PlayerId> {
        self.group(group).and_then(|g| g.leader)
    }

    pub fn set_leader(&mut self, group: GroupId, leader: PlayerId) {
        self.group_entry(group).leader = Some(leader);
    }

    pub fn group_dungeon(&self, group: GroupId) -> Option<DungeonId> {
        self.group(group).and_then(|g| g.dungeon)
    }

    pub fn set_group_dungeon(&mut self, group: GroupId, dungeon: DungeonId) {
        self.group_entry(group).dungeon = Some(dungeon);
    }

    pub fn is_lfg_group(&self, group: GroupId) -> bool {
        self.group(group).map(|g| g.is_lfg).unwrap_or(false)
    }

    /// Put a player in a group, leaving any previous group first
    pub fn add_player_to_group(&mut self, group: GroupId, player: PlayerId) {
        if let Some(previous) = self.group_of(player) {
            if previous != group {
                self.remove_player_from_group(previous, player);
            }
        }
        self.group_entry(group).players.insert(player);
        self.player_entry(player).group = Some(group);
    }

    /// Take a player out of a group; returns the members left behind
    pub fn remove_player_from_group(&mut self, group: GroupId, player: PlayerId) -> usize {
        if let Some(data) = self.players.get_mut(&player) {
            if data.group == Some(group) {
                data.group = None;
            }
        }
        match self.groups.get_mut(&group) {
            Some(data) => {
                data.players.remove(&player);
                data.players.len()
            }
            None => 0,
        }
    }

    /// Forget a player, detaching it from its group
    pub fn remove_player(&mut self, player: PlayerId) -> Option<PlayerData> {
        if let Some(group) = self.group_of(player) {
            self.remove_player_from_group(group, player);
        }
        self.players.remove(&player)
    }

    /// Forget a group, clearing its members' back-references
    pub fn remove_group(&mut self, group: GroupId) -> Option<GroupData> {
        let data = self.groups.remove(&group)?;
        for player in &data.players {
            if let Some(member) = self.players.get_mut(player) {
                if member.group == Some(group) {
                    member.group = None;
                }
            }
        }
        Some(data)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}
