//! In-memory world used by the service and by tests
//!
//! Keeps player snapshots and parties in plain maps and records every side
//! effect the engine requests, so callers can inspect what happened.

use super::{GroupService, GroupSnapshot, PlayerDirectory, PlayerSnapshot, WorldActions};
use crate::dungeon::catalog::{Holiday, Position};
use crate::types::{Difficulty, GroupId, PlayerId, Roles};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// A teleport the engine asked for
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TeleportRecord {
    pub player_id: PlayerId,
    pub map_id: u32,
    pub position: Position,
}

#[derive(Debug, Default)]
pub struct InMemoryWorld {
    players: BTreeMap<PlayerId, PlayerSnapshot>,
    groups: BTreeMap<GroupId, GroupSnapshot>,
    ignores: BTreeSet<(PlayerId, PlayerId)>,
    holidays: BTreeSet<Holiday>,
    controlled: BTreeMap<PlayerId, Vec<PlayerId>>,
    lfg_roles: BTreeMap<(GroupId, PlayerId), Roles>,
    difficulties: BTreeMap<GroupId, Difficulty>,
    teleports: Vec<TeleportRecord>,
    rewarded: Vec<(PlayerId, u32)>,
    stranger_credits: Vec<(PlayerId, u8)>,
    next_group_id: u64,
}

impl InMemoryWorld {
    pub fn new() -> Self {
        Self {
            next_group_id: 1,
            ..Default::default()
        }
    }

    /// Insert or replace a player snapshot
    ///
    /// The stored group back-reference is kept so that a snapshot coming from
    /// a session layer cannot desynchronize party membership.
    pub fn upsert_player(&mut self, mut snapshot: PlayerSnapshot) {
        if let Some(existing) = self.players.get(&snapshot.id) {
            snapshot.group = existing.group;
        }
        self.players.insert(snapshot.id, snapshot);
    }

    pub fn player_mut(&mut self, id: PlayerId) -> Option<&mut PlayerSnapshot> {
        self.players.get_mut(&id)
    }

    pub fn set_online(&mut self, id: PlayerId, online: bool) {
        if let Some(player) = self.players.get_mut(&id) {
            player.online = online;
        }
    }

    /// Create a regular (non dungeon finder) party
    pub fn create_group(&mut self, leader: PlayerId, members: &[PlayerId]) -> GroupId {
        let id = self.allocate_group_id();
        let mut roster = vec![leader];
        roster.extend(members.iter().copied().filter(|m| *m != leader));
        for member in &roster {
            self.detach_from_current_group(*member);
            if let Some(player) = self.players.get_mut(member) {
                player.group = Some(id);
            }
        }
        self.groups.insert(
            id,
            GroupSnapshot {
                id,
                leader,
                members: roster,
                is_lfg: false,
            },
        );
        id
    }

    /// Replace a party wholesale, fixing up member back-references
    pub fn upsert_group(&mut self, snapshot: GroupSnapshot) {
        if let Some(previous) = self.groups.get(&snapshot.id) {
            for member in previous.members.clone() {
                if !snapshot.members.contains(&member) {
                    if let Some(player) = self.players.get_mut(&member) {
                        player.group = None;
                    }
                }
            }
        }
        for member in &snapshot.members {
            if let Some(player) = self.players.get_mut(member) {
                player.group = Some(snapshot.id);
            }
        }
        self.next_group_id = self.next_group_id.max(snapshot.id.0 + 1);
        self.groups.insert(snapshot.id, snapshot);
    }

    pub fn set_ignore(&mut self, who: PlayerId, ignored: PlayerId) {
        self.ignores.insert((who, ignored));
    }

    pub fn set_holiday(&mut self, holiday: Holiday, active: bool) {
        if active {
            self.holidays.insert(holiday);
        } else {
            self.holidays.remove(&holiday);
        }
    }

    pub fn set_controlled_members(&mut self, owner: PlayerId, members: Vec<PlayerId>) {
        self.controlled.insert(owner, members);
    }

    pub fn teleports(&self) -> &[TeleportRecord] {
        &self.teleports
    }

    pub fn rewarded_quests(&self) -> &[(PlayerId, u32)] {
        &self.rewarded
    }

    pub fn stranger_credits(&self) -> &[(PlayerId, u8)] {
        &self.stranger_credits
    }

    pub fn lfg_roles(&self, group: GroupId, player: PlayerId) -> Option<Roles> {
        self.lfg_roles.get(&(group, player)).copied()
    }

    pub fn dungeon_difficulty(&self, group: GroupId) -> Option<Difficulty> {
        self.difficulties.get(&group).copied()
    }

    fn allocate_group_id(&mut self) -> GroupId {
        self.next_group_id = self.next_group_id.max(1);
        let id = GroupId(self.next_group_id);
        self.next_group_id += 1;
        id
    }

    fn detach_from_current_group(&mut self, player: PlayerId) {
        let current = self.players.get(&player).and_then(|p| p.group);
        if let Some(group) = current {
            self.remove_member(group, player);
        }
    }
}

impl PlayerDirectory for InMemoryWorld {
    fn player(&self, id: PlayerId) -> Option<PlayerSnapshot> {
        self.players.get(&id).cloned()
    }

    fn group(&self, id: GroupId) -> Option<GroupSnapshot> {
        self.groups.get(&id).cloned()
    }

    fn has_ignore(&self, a: PlayerId, b: PlayerId) -> bool {
        self.ignores.contains(&(a, b)) || self.ignores.contains(&(b, a))
    }

    fn is_holiday_active(&self, holiday: Holiday) -> bool {
        self.holidays.contains(&holiday)
    }

    fn controlled_members(&self, player: PlayerId) -> Vec<PlayerId> {
        self.controlled.get(&player).cloned().unwrap_or_default()
    }
}

impl GroupService for InMemoryWorld {
    fn create_lfg_group(&mut self, leader: PlayerId) -> GroupId {
        let id = self.create_group(leader, &[]);
        if let Some(group) = self.groups.get_mut(&id) {
            group.is_lfg = true;
        }
        debug!("Created dungeon finder group {} led by {}", id, leader);
        id
    }

    fn add_member(&mut self, group: GroupId, player: PlayerId) {
        if !self.groups.contains_key(&group) {
            return;
        }
        let current = self.players.get(&player).and_then(|p| p.group);
        if current == Some(group) {
            return;
        }
        self.detach_from_current_group(player);
        if let Some(snapshot) = self.groups.get_mut(&group) {
            snapshot.members.push(player);
        }
        if let Some(snapshot) = self.players.get_mut(&player) {
            snapshot.group = Some(group);
        }
    }

    fn remove_member(&mut self, group: GroupId, player: PlayerId) {
        let Some(snapshot) = self.groups.get_mut(&group) else {
            return;
        };
        snapshot.members.retain(|member| *member != player);
        if snapshot.leader == player {
            if let Some(next) = snapshot.members.first() {
                snapshot.leader = *next;
            }
        }
        let disband = snapshot.members.is_empty();

        if let Some(member) = self.players.get_mut(&player) {
            if member.group == Some(group) {
                member.group = None;
            }
        }
        self.lfg_roles.remove(&(group, player));

        if disband {
            self.groups.remove(&group);
            self.difficulties.remove(&group);
        }
    }

    fn set_roles(&mut self, group: GroupId, player: PlayerId, roles: Roles) {
        self.lfg_roles.insert((group, player), roles);
    }

    fn set_dungeon_difficulty(&mut self, group: GroupId, difficulty: Difficulty) {
        self.difficulties.insert(group, difficulty);
    }
}

impl WorldActions for InMemoryWorld {
    fn apply_random_cooldown(&mut self, player: PlayerId) {
        if let Some(snapshot) = self.players.get_mut(&player) {
            snapshot.random_cooldown = true;
        }
    }

    fn remove_random_cooldown(&mut self, player: PlayerId) {
        if let Some(snapshot) = self.players.get_mut(&player) {
            snapshot.random_cooldown = false;
        }
    }

    fn teleport(&mut self, player: PlayerId, map_id: u32, position: Position) -> bool {
        let Some(snapshot) = self.players.get_mut(&player) else {
            return false;
        };
        if !snapshot.online {
            return false;
        }
        snapshot.map_id = map_id;
        snapshot.position = position;
        self.teleports.push(TeleportRecord {
            player_id: player,
            map_id,
            position,
        });
        true
    }

    fn teleport_to_entry_point(&mut self, player: PlayerId) {
        if let Some(snapshot) = self.players.get_mut(&player) {
            snapshot.map_id = 0;
            snapshot.position = Position::default();
            self.teleports.push(TeleportRecord {
                player_id: player,
                map_id: 0,
                position: Position::default(),
            });
        }
    }

    fn can_reward_quest(&self, player: PlayerId, quest_id: u32) -> bool {
        self.players
            .get(&player)
            .map(|snapshot| !snapshot.rewarded_quests.contains(&quest_id))
            .unwrap_or(false)
    }

    fn reward_quest(&mut self, player: PlayerId, quest_id: u32) {
        if let Some(snapshot) = self.players.get_mut(&player) {
            snapshot.rewarded_quests.insert(quest_id);
        }
        self.rewarded.push((player, quest_id));
    }

    fn credit_grouped_with_strangers(&mut self, player: PlayerId, strangers: u8) {
        self.stranger_credits.push((player, strangers));
    }
}
