//! Dungeon finder engine
//!
//! `LfgManager` owns every piece of matchmaking state and is driven from a
//! single logical thread: request handlers call into it, and a periodic
//! `update` expires deadlines and runs the matcher. Outbound notifications
//! collect in an outbox that the caller drains after each call.

use super::boot::PlayerBoot;
use super::proposal::{Proposal, ProposalPlayer};
use super::queue::{LfgQueue, MatchContext, QueueKey};
use super::role_check::RoleCheck;
use super::roles::RoleComposition;
use super::state::StateStore;
use crate::config::{LfgConfig, OPTION_ENABLE_DUNGEON_FINDER, OPTION_ENABLE_RAID_BROWSER};
use crate::dungeon::{locked_dungeons, DungeonCatalog, LockMap, LockReason};
use crate::persistence::{GroupRecord, LfgStore};
use crate::types::{
    Difficulty, DungeonId, DungeonSet, EntityId, GroupId, LfgAnswer, LfgEvent, LfgJoinResult,
    LfgState, LfgType, LfgUpdateType, PlayerId, ProposalState, RoleCheckState, Roles, Team,
};
use crate::utils::{concatenate_dungeons, dungeon_id_from_entry, Clock};
use crate::world::{PlayerSnapshot, World};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened during one `update` call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub expired_role_checks: usize,
    pub expired_proposals: usize,
    pub expired_boots: usize,
    /// Ids of proposals formed by this tick's matching pass
    pub new_proposals: Vec<u32>,
    pub queue_status_sent: bool,
}

/// Matchmaking outcomes, drained by the service for metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LfgOutcome {
    Join(LfgJoinResult),
    RoleCheck(RoleCheckState),
    ProposalCreated,
    ProposalSucceeded,
    ProposalFailed(LfgUpdateType),
    Boot { passed: bool },
    Reward { repeat: bool },
}

/// Current dungeon finder status of a player
#[derive(Debug, Clone, PartialEq)]
pub struct LfgStatus {
    pub update_type: LfgUpdateType,
    pub state: LfgState,
    pub dungeons: DungeonSet,
}

/// Queue snapshot for health and stats endpoints
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct QueueSizes {
    pub entries: usize,
    pub players: usize,
    pub role_checks: usize,
    pub proposals: usize,
    pub boots: usize,
}

pub struct LfgManager<W: World> {
    pub(super) config: LfgConfig,
    pub(super) composition: RoleComposition,
    pub(super) catalog: Arc<DungeonCatalog>,
    pub(super) world: W,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) store: StateStore,
    pub(super) queues: BTreeMap<QueueKey, LfgQueue>,
    pub(super) role_checks: BTreeMap<GroupId, RoleCheck>,
    pub(super) proposals: BTreeMap<u32, Proposal>,
    pub(super) boots: BTreeMap<GroupId, PlayerBoot>,
    pub(super) last_proposal_id: u32,
    queue_timer: u64,
    options: u32,
    persistence: Option<Arc<dyn LfgStore>>,
    events: Vec<LfgEvent>,
    outcomes: Vec<LfgOutcome>,
}

/// Read-only view handed to the queue matcher
struct MatchView<'a, W: World> {
    store: &'a StateStore,
    world: &'a W,
    catalog: &'a DungeonCatalog,
}

impl<W: World> MatchContext for MatchView<'_, W> {
    fn is_queued(&self, entity: EntityId) -> bool {
        if self.store.state(entity) != LfgState::Queued {
            return false;
        }
        match entity {
            EntityId::Player(_) => true,
            EntityId::Group(group) => self
                .store
                .members(group)
                .iter()
                .all(|member| self.store.state((*member).into()) == LfgState::Queued),
        }
    }

    fn has_ignore(&self, a: PlayerId, b: PlayerId) -> bool {
        self.world.has_ignore(a, b)
    }

    fn is_random(&self, dungeon: DungeonId) -> bool {
        self.catalog
            .get_dungeon(dungeon)
            .map_or(true, |definition| definition.is_random())
    }

    fn continuing_dungeon(&self, entity: EntityId) -> Option<(GroupId, DungeonId)> {
        let group = entity.as_group()?;
        if !self.store.is_lfg_group(group) || self.store.old_state(entity) != LfgState::Dungeon {
            return None;
        }
        self.store.group_dungeon(group).map(|dungeon| (group, dungeon))
    }
}

impl<W: World> LfgManager<W> {
    pub fn new(
        config: LfgConfig,
        catalog: Arc<DungeonCatalog>,
        world: W,
        clock: Arc<dyn Clock>,
    ) -> Self {
        info!(
            "Dungeon finder started with {} dungeons, group size {}",
            catalog.len(),
            config.max_group_size()
        );
        Self {
            composition: RoleComposition::from_config(&config),
            store: StateStore::new(config.max_kicks),
            options: config.options,
            config,
            catalog,
            world,
            clock,
            queues: BTreeMap::new(),
            role_checks: BTreeMap::new(),
            proposals: BTreeMap::new(),
            boots: BTreeMap::new(),
            last_proposal_id: 0,
            queue_timer: 0,
            persistence: None,
            events: Vec::new(),
            outcomes: Vec::new(),
        }
    }

    /// Persist group progress through `store`
    pub fn with_store(mut self, store: Arc<dyn LfgStore>) -> Self {
        self.persistence = Some(store);
        self
    }

    pub fn config(&self) -> &LfgConfig {
        &self.config
    }

    pub fn catalog(&self) -> &DungeonCatalog {
        &self.catalog
    }

    pub fn world(&self) -> &W {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut W {
        &mut self.world
    }

    pub(super) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Take every notification produced since the last drain
    pub fn drain_events(&mut self) -> Vec<LfgEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn drain_outcomes(&mut self) -> Vec<LfgOutcome> {
        std::mem::take(&mut self.outcomes)
    }

    pub(super) fn emit(&mut self, event: LfgEvent) {
        self.events.push(event);
    }

    pub(super) fn record(&mut self, outcome: LfgOutcome) {
        self.outcomes.push(outcome);
    }

    pub(super) fn send_update(
        &mut self,
        recipient: PlayerId,
        party: bool,
        update_type: LfgUpdateType,
        dungeons: DungeonSet,
        comment: String,
    ) {
        self.emit(LfgEvent::Update {
            recipient,
            party,
            update_type,
            dungeons,
            comment,
        });
    }

    pub(super) fn send_join_result(
        &mut self,
        recipient: PlayerId,
        result: LfgJoinResult,
        role_check: Option<RoleCheckState>,
        locks: BTreeMap<PlayerId, LockMap>,
    ) {
        self.emit(LfgEvent::JoinResult {
            recipient,
            result,
            role_check,
            locks,
        });
    }

    // ---------------------------------------------------------------------
    // Join / leave
    // ---------------------------------------------------------------------

    /// Join the dungeon finder as a solo player or, when grouped, start a
    /// role check for the whole group
    pub fn join_lfg(
        &mut self,
        player_id: PlayerId,
        roles: Roles,
        mut dungeons: DungeonSet,
        comment: &str,
    ) -> LfgJoinResult {
        let Some(player) = self.world.player(player_id) else {
            debug!("{} tried to join but is not in the world", player_id);
            return LfgJoinResult::Failed;
        };
        if !player.online || dungeons.is_empty() {
            return LfgJoinResult::Failed;
        }

        let roles = player.class.filter_roles(Roles::from_bits_truncate(roles.bits()));
        if !roles.has_combat_role() {
            debug!("{} tried to join without a role", player_id);
            return LfgJoinResult::Failed;
        }

        self.store.set_team(player_id, player.team);
        let group = player.group.and_then(|id| self.world.group(id));
        if let Some(group) = &group {
            self.sync_group(group.id);
        }

        let entity: EntityId = match &group {
            Some(group) => group.id.into(),
            None => player_id.into(),
        };
        let is_continue = group.as_ref().is_some_and(|g| g.is_lfg)
            && self.store.state(entity) != LfgState::FinishedDungeon;

        if is_continue {
            dungeons = entity
                .as_group()
                .and_then(|g| self.store.group_dungeon(g))
                .into_iter()
                .collect();
        }

        if self.store.state(entity) == LfgState::Queued {
            self.remove_from_queue(entity);
        }

        let mut members: BTreeSet<PlayerId> = BTreeSet::new();
        let mut result = self.check_requester(&player, is_continue, &dungeons);
        if result == LfgJoinResult::Ok {
            match &group {
                Some(group) => {
                    result = self.check_members(&group.members, is_continue, &mut members);
                }
                None => {
                    members.insert(player_id);
                }
            }
        }

        let mut random_id = None;
        let mut is_raid = false;
        let mut locks = BTreeMap::new();
        if result == LfgJoinResult::Ok {
            let validated = self.check_dungeon_types(&dungeons);
            result = validated.0;
            random_id = validated.1;
            is_raid = validated.2;

            if result == LfgJoinResult::Ok {
                if let Some(random) = random_id {
                    dungeons = self.catalog.dungeons_by_random(random);
                }
                locks = self.compatible_dungeons(&mut dungeons, &members, is_continue);
                if dungeons.is_empty() {
                    result = if group.is_some() {
                        LfgJoinResult::PartyNotMeetReqs
                    } else {
                        LfgJoinResult::NotMeetReqs
                    };
                }
            }
        }

        if result != LfgJoinResult::Ok {
            debug!(
                "{} joining with {} members. Result: {}, Dungeons: {}",
                player_id,
                group.as_ref().map_or(1, |g| g.members.len()),
                result,
                concatenate_dungeons(&dungeons)
            );
            if !dungeons.is_empty() {
                locks.clear();
            }
            self.send_join_result(player_id, result, None, locks);
            self.record(LfgOutcome::Join(result));
            return result;
        }

        self.store.set_comment(player_id, comment);

        if is_raid {
            debug!("{} tried to join the raid browser, which is not available", player_id);
            self.send_join_result(player_id, LfgJoinResult::Failed, None, BTreeMap::new());
            self.record(LfgOutcome::Join(LfgJoinResult::Failed));
            return LfgJoinResult::Failed;
        }

        let display: DungeonSet = match random_id {
            Some(random) => [random].into_iter().collect(),
            None => dungeons.clone(),
        };

        match group {
            Some(group) => {
                let group_id = group.id;
                let check = RoleCheck {
                    cancel_time: self.now() + self.role_check_timeout(),
                    state: RoleCheckState::Initializing,
                    leader: player_id,
                    dungeons: dungeons.clone(),
                    random_id,
                    roles: members.iter().map(|member| (*member, Roles::NONE)).collect(),
                };
                self.role_checks.insert(group_id, check);
                self.store.set_state(entity, LfgState::RoleCheck);

                for member in &members {
                    self.send_update(
                        *member,
                        true,
                        LfgUpdateType::JoinQueue,
                        display.clone(),
                        comment.to_string(),
                    );
                    self.store.set_state((*member).into(), LfgState::RoleCheck);
                    if !is_continue {
                        self.store.set_selected_dungeons(*member, display.clone());
                    }
                }

                debug!(
                    "{} started a role check for {} ({} members). Dungeons: {}",
                    player_id,
                    group_id,
                    members.len(),
                    concatenate_dungeons(&dungeons)
                );
                self.update_role_check(group_id, Some(player_id), roles);
            }
            None => {
                let now = self.now();
                let key = self.queue_key(entity);
                self.queues.entry(key).or_default().add_queue_data(
                    entity,
                    now,
                    dungeons.clone(),
                    [(player_id, roles)].into_iter().collect(),
                );
                self.store.set_selected_dungeons(player_id, display.clone());
                self.send_join_result(player_id, LfgJoinResult::Ok, None, BTreeMap::new());
                self.send_update(
                    player_id,
                    false,
                    LfgUpdateType::JoinQueue,
                    display,
                    comment.to_string(),
                );
                self.store.set_state(entity, LfgState::Queued);
                self.store.set_roles(player_id, roles);

                debug!(
                    "{} joined queue {} as {}. Dungeons ({}): {}",
                    player_id,
                    key,
                    roles,
                    dungeons.len(),
                    concatenate_dungeons(&dungeons)
                );
            }
        }

        self.record(LfgOutcome::Join(LfgJoinResult::Ok));
        LfgJoinResult::Ok
    }

    fn check_requester(
        &self,
        player: &PlayerSnapshot,
        is_continue: bool,
        dungeons: &DungeonSet,
    ) -> LfgJoinResult {
        if !player.can_join_dungeon_finder {
            LfgJoinResult::NotMeetReqs
        } else if player.in_battleground {
            LfgJoinResult::UsingBgSystem
        } else if player.deserter {
            LfgJoinResult::Deserter
        } else if !is_continue && player.random_cooldown {
            LfgJoinResult::RandomCooldown
        } else if dungeons.is_empty() || player.frozen {
            LfgJoinResult::NotMeetReqs
        } else {
            LfgJoinResult::Ok
        }
    }

    fn check_members(
        &self,
        roster: &[PlayerId],
        is_continue: bool,
        members: &mut BTreeSet<PlayerId>,
    ) -> LfgJoinResult {
        if roster.len() > self.composition.group_size() {
            return LfgJoinResult::TooManyMembers;
        }

        for member_id in roster {
            let Some(member) = self.world.player(*member_id).filter(|m| m.online) else {
                continue;
            };
            let result = if !member.can_join_dungeon_finder {
                LfgJoinResult::PartyNotMeetReqs
            } else if member.deserter {
                LfgJoinResult::PartyDeserter
            } else if !is_continue && member.random_cooldown {
                LfgJoinResult::PartyRandomCooldown
            } else if member.in_battleground {
                LfgJoinResult::UsingBgSystem
            } else if member.frozen {
                LfgJoinResult::PartyNotMeetReqs
            } else {
                LfgJoinResult::Ok
            };
            if result != LfgJoinResult::Ok {
                return result;
            }
            members.insert(*member_id);
        }

        if members.len() != roster.len() {
            return LfgJoinResult::Disconnected;
        }
        LfgJoinResult::Ok
    }

    /// Result, random dungeon id and raid flag for a selection
    fn check_dungeon_types(
        &self,
        dungeons: &DungeonSet,
    ) -> (LfgJoinResult, Option<DungeonId>, bool) {
        let mut is_raid = false;
        let mut is_dungeon = false;
        let mut random_id = None;

        for id in dungeons {
            let result = match self.catalog.dungeon_type(*id) {
                Some(LfgType::Random) if dungeons.len() > 1 => LfgJoinResult::DungeonInvalid,
                Some(lfg_type @ (LfgType::Random | LfgType::Heroic | LfgType::Dungeon)) => {
                    if lfg_type == LfgType::Random {
                        random_id = Some(*id);
                    }
                    is_dungeon = true;
                    if is_raid {
                        LfgJoinResult::MixedRaidDungeon
                    } else {
                        LfgJoinResult::Ok
                    }
                }
                Some(LfgType::Raid) => {
                    is_raid = true;
                    if is_dungeon {
                        LfgJoinResult::MixedRaidDungeon
                    } else {
                        LfgJoinResult::Ok
                    }
                }
                None => LfgJoinResult::DungeonInvalid,
            };
            if result != LfgJoinResult::Ok {
                return (result, random_id, is_raid);
            }
        }
        (LfgJoinResult::Ok, random_id, is_raid)
    }

    /// Drop dungeons any member is locked out of
    ///
    /// A continuing group keeps an instance-bound dungeon as long as every
    /// bound member is saved to the same instance. The lock map is only
    /// returned when nothing is left.
    pub fn compatible_dungeons(
        &self,
        dungeons: &mut DungeonSet,
        members: &BTreeSet<PlayerId>,
        is_continue: bool,
    ) -> BTreeMap<PlayerId, LockMap> {
        let mut lock_map: BTreeMap<PlayerId, LockMap> = BTreeMap::new();
        let mut bound_instances: BTreeMap<DungeonId, u32> = BTreeMap::new();

        for member in members {
            if dungeons.is_empty() {
                break;
            }
            let Some(snapshot) = self.world.player(*member) else {
                continue;
            };

            for (entry, reason) in self.locks_for(&snapshot) {
                if dungeons.is_empty() {
                    break;
                }
                let dungeon_id = dungeon_id_from_entry(entry);
                if !dungeons.contains(&dungeon_id) {
                    continue;
                }

                let mut erase = true;
                if reason == LockReason::InstanceBound && is_continue {
                    let instance = self.catalog.get_dungeon(dungeon_id).and_then(|dungeon| {
                        snapshot.bound_instance(dungeon.map_id, dungeon.difficulty)
                    });
                    if let Some(instance) = instance {
                        if bound_instances
                            .get(&dungeon_id)
                            .map_or(true, |seen| *seen == instance)
                        {
                            erase = false;
                        }
                        bound_instances.insert(dungeon_id, instance);
                    }
                }

                if erase {
                    dungeons.remove(&dungeon_id);
                }
                lock_map.entry(*member).or_default().insert(entry, reason);
            }
        }

        if !dungeons.is_empty() {
            lock_map.clear();
        }
        lock_map
    }

    /// Leave the queue, role check or proposal the entity is part of
    pub fn leave_lfg(&mut self, entity: EntityId, disconnected: bool) {
        let group = match entity {
            EntityId::Group(group) => Some(group),
            EntityId::Player(player) => self.store.group_of(player),
        };
        debug!(
            "{} left ({})",
            entity,
            if entity.is_group() { "group" } else { "player" }
        );

        match self.store.state(entity) {
            LfgState::Queued => match group {
                Some(group) => {
                    let group_entity: EntityId = group.into();
                    let old_state = self.store.old_state(group_entity);
                    let new_state = if self.store.is_lfg_group(group)
                        && self.store.group_dungeon(group).is_some()
                        && matches!(old_state, LfgState::Dungeon | LfgState::FinishedDungeon)
                    {
                        old_state
                    } else {
                        LfgState::None
                    };

                    self.remove_from_queue(group_entity);
                    self.store.set_state(group_entity, new_state);
                    for member in self.store.members(group) {
                        self.store.set_state(member.into(), new_state);
                        self.send_update(
                            member,
                            true,
                            LfgUpdateType::RemovedFromQueue,
                            DungeonSet::new(),
                            String::new(),
                        );
                    }
                }
                None => {
                    if let Some(player) = entity.as_player() {
                        self.remove_from_queue(entity);
                        self.send_update(
                            player,
                            false,
                            LfgUpdateType::RemovedFromQueue,
                            DungeonSet::new(),
                            String::new(),
                        );
                        self.store.set_state(entity, LfgState::None);
                    }
                }
            },
            LfgState::RoleCheck => {
                if let Some(group) = group {
                    self.update_role_check(group, None, Roles::NONE);
                }
            }
            LfgState::Proposal => {
                let answering = match entity {
                    EntityId::Group(group) => self.store.leader(group),
                    EntityId::Player(player) => Some(player),
                };
                let Some(answering) = answering else {
                    return;
                };
                let found = self.proposals.iter_mut().find_map(|(id, proposal)| {
                    proposal.players.get_mut(&answering).map(|member| {
                        member.answer = LfgAnswer::Deny;
                        *id
                    })
                });
                if let Some(id) = found {
                    self.remove_proposal(id, LfgUpdateType::ProposalDeclined);
                }
            }
            LfgState::Dungeon | LfgState::FinishedDungeon => {
                if !entity.is_group() && !disconnected {
                    self.store.set_state(entity, LfgState::None);
                }
            }
            LfgState::None | LfgState::RaidBrowser => {}
        }
    }

    // ---------------------------------------------------------------------
    // Tick
    // ---------------------------------------------------------------------

    /// Expire deadlines, run the matcher and broadcast queue status
    pub fn update(&mut self, diff_ms: u64) -> TickReport {
        let mut report = TickReport::default();
        if !self.is_option_enabled(OPTION_ENABLE_DUNGEON_FINDER | OPTION_ENABLE_RAID_BROWSER) {
            return report;
        }

        let now = self.now();

        let expired: Vec<GroupId> = self
            .role_checks
            .iter()
            .filter(|(_, check)| now >= check.cancel_time)
            .map(|(group, _)| *group)
            .collect();
        report.expired_role_checks = expired.len();
        for group in expired {
            self.expire_role_check(group);
        }

        let expired: Vec<u32> = self
            .proposals
            .iter()
            .filter(|(_, proposal)| proposal.cancel_time < now)
            .map(|(id, _)| *id)
            .collect();
        report.expired_proposals = expired.len();
        for id in expired {
            self.remove_proposal(id, LfgUpdateType::ProposalFailed);
        }

        let expired: Vec<GroupId> = self
            .boots
            .iter()
            .filter(|(_, boot)| boot.cancel_time < now)
            .map(|(group, _)| *group)
            .collect();
        report.expired_boots = expired.len();
        for group in expired {
            self.expire_boot(group);
        }

        report.new_proposals = self.find_groups();
        for id in &report.new_proposals {
            self.begin_proposal(*id);
        }

        if self.queue_timer > self.config.queue_update_interval_ms {
            self.queue_timer = 0;
            self.send_queue_status(now);
            report.queue_status_sent = true;
        } else {
            self.queue_timer += diff_ms;
        }

        report
    }

    /// Run the matcher over every queue and register the proposals it forms
    pub fn find_groups(&mut self) -> Vec<u32> {
        let now = self.now();
        let keys: Vec<QueueKey> = self.queues.keys().copied().collect();
        let mut created = Vec::new();

        for key in keys {
            let matches = {
                let view = MatchView {
                    store: &self.store,
                    world: &self.world,
                    catalog: &self.catalog,
                };
                match self.queues.get_mut(&key) {
                    Some(queue) => queue.find_groups(self.composition, &view),
                    None => continue,
                }
            };
            if !matches.is_empty() {
                debug!("Found {} new groups in queue {}", matches.len(), key);
            }

            for found in matches {
                let leader = found
                    .continuing
                    .and_then(|group| self.store.leader(group))
                    .filter(|leader| found.roles.contains_key(leader))
                    .or_else(|| {
                        found
                            .roles
                            .iter()
                            .find(|(_, roles)| roles.is_leader())
                            .map(|(player, _)| *player)
                    })
                    .or_else(|| {
                        found
                            .entries
                            .first()
                            .and_then(|entry| entry.roles.keys().next().copied())
                    });
                let Some(leader) = leader else {
                    continue;
                };

                let auto_accept = found.continuing.is_some() && found.entries.len() == 1;
                let answer = if auto_accept {
                    LfgAnswer::Agree
                } else {
                    LfgAnswer::Pending
                };

                let mut players = BTreeMap::new();
                for entry in &found.entries {
                    for player in entry.roles.keys() {
                        players.insert(
                            *player,
                            ProposalPlayer {
                                role: found.roles.get(player).copied().unwrap_or_default(),
                                group: entry.entity.as_group(),
                                answer,
                            },
                        );
                    }
                }

                let proposal = Proposal {
                    id: 0,
                    dungeon_id: found.dungeon_id,
                    state: if auto_accept {
                        ProposalState::Success
                    } else {
                        ProposalState::Initiated
                    },
                    group: found.continuing,
                    leader,
                    cancel_time: now + self.proposal_timeout(),
                    is_new: found.continuing.is_none(),
                    players,
                    queues: found.entries,
                    queue_key: key,
                };
                created.push(self.add_proposal(proposal));
                self.record(LfgOutcome::ProposalCreated);
            }
        }

        created
    }

    fn send_queue_status(&mut self, now: DateTime<Utc>) {
        let mut statuses = Vec::new();
        for queue in self.queues.values() {
            statuses.extend(queue.queue_status(self.composition, now));
        }

        for (entity, status) in statuses {
            let recipients = match entity {
                EntityId::Player(player) => vec![player],
                EntityId::Group(group) => self.store.members(group),
            };
            for recipient in recipients {
                self.emit(LfgEvent::QueueStatus {
                    recipient,
                    status: status.clone(),
                });
            }
        }
    }

    // ---------------------------------------------------------------------
    // Queue plumbing
    // ---------------------------------------------------------------------

    pub(super) fn queue_key(&self, entity: EntityId) -> QueueKey {
        if self.config.cross_faction {
            return QueueKey::CrossFaction;
        }
        let player = match entity {
            EntityId::Player(player) => Some(player),
            EntityId::Group(group) => self.store.members(group).first().copied(),
        };
        QueueKey::Faction(
            player
                .and_then(|player| self.store.team(player))
                .unwrap_or(Team::Alliance),
        )
    }

    pub(super) fn remove_from_queue(&mut self, entity: EntityId) {
        for queue in self.queues.values_mut() {
            queue.remove_from_queue(entity);
        }
    }

    pub(super) fn role_check_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.config.role_check_timeout_seconds as i64)
    }

    pub(super) fn proposal_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.config.proposal_timeout_seconds as i64)
    }

    pub(super) fn boot_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.config.boot_timeout_seconds as i64)
    }

    /// Drop every queue; debugging aid
    pub fn clean(&mut self) {
        self.queues.clear();
    }

    pub fn queue_sizes(&self) -> QueueSizes {
        QueueSizes {
            entries: self.queues.values().map(LfgQueue::len).sum(),
            players: self.queues.values().map(LfgQueue::player_count).sum(),
            role_checks: self.role_checks.len(),
            proposals: self.proposals.len(),
            boots: self.boots.len(),
        }
    }

    /// Queue sizes per partition, for metrics
    pub fn queue_lengths(&self) -> Vec<(QueueKey, usize)> {
        self.queues
            .iter()
            .map(|(key, queue)| (*key, queue.player_count()))
            .collect()
    }

    pub fn get_join_time(&self, entity: EntityId) -> Option<DateTime<Utc>> {
        self.queues
            .values()
            .find_map(|queue| queue.get_join_time(entity))
    }

    pub fn dump_queue_info(&self, full: bool) -> String {
        let mut out = format!("Number of Queues: {}\n", self.queues.len());
        for (key, queue) in &self.queues {
            out.push_str(&format!("Queue {}: {}", key, queue.dump(full)));
        }
        out
    }

    // ---------------------------------------------------------------------
    // Locks and catalog helpers
    // ---------------------------------------------------------------------

    fn locks_for(&self, player: &PlayerSnapshot) -> LockMap {
        locked_dungeons(&self.catalog, player, |holiday| {
            self.world.is_holiday_active(holiday)
        })
    }

    /// Lock map for a player; empty for unknown players
    pub fn get_locks(&self, player: PlayerId) -> LockMap {
        self.world
            .player(player)
            .map(|snapshot| self.locks_for(&snapshot))
            .unwrap_or_default()
    }

    /// Random and in-season seasonal entries a player may pick
    pub fn random_and_seasonal_dungeons(&self, level: u8, expansion: u8) -> BTreeSet<u32> {
        self.catalog
            .random_and_seasonal_dungeons(level, expansion, |id| {
                crate::dungeon::is_season_active(id, |holiday| {
                    self.world.is_holiday_active(holiday)
                })
            })
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    pub fn state(&self, entity: EntityId) -> LfgState {
        self.store.state(entity)
    }

    pub fn old_state(&self, entity: EntityId) -> LfgState {
        self.store.old_state(entity)
    }

    pub fn set_state(&mut self, entity: EntityId, state: LfgState) {
        self.store.set_state(entity, state);
    }

    pub fn restore_state(&mut self, entity: EntityId) {
        self.store.restore_state(entity);
    }

    pub fn selected_dungeons(&self, player: PlayerId) -> DungeonSet {
        self.store.selected_dungeons(player)
    }

    pub fn roles(&self, player: PlayerId) -> Roles {
        self.store.roles(player)
    }

    pub fn comment(&self, player: PlayerId) -> String {
        self.store.comment(player).to_string()
    }

    pub fn group_of(&self, player: PlayerId) -> Option<GroupId> {
        self.store.group_of(player)
    }

    pub fn group_members(&self, group: GroupId) -> Vec<PlayerId> {
        self.store.members(group)
    }

    pub fn group_leader(&self, group: GroupId) -> Option<PlayerId> {
        self.store.leader(group)
    }

    pub fn group_dungeon(&self, group: GroupId) -> Option<DungeonId> {
        self.store.group_dungeon(group)
    }

    /// Map of the dungeon a group was sent to
    pub fn group_dungeon_map(&self, group: GroupId) -> Option<u32> {
        self.group_dungeon(group)
            .and_then(|id| self.catalog.get_dungeon(id))
            .map(|dungeon| dungeon.map_id)
    }

    pub fn kicks_left(&self, group: GroupId) -> u8 {
        self.store
            .group(group)
            .map_or(self.config.max_kicks, |data| data.kicks_left)
    }

    pub fn is_vote_kick_active(&self, group: GroupId) -> bool {
        self.store
            .group(group)
            .is_some_and(|data| data.vote_kick_active)
    }

    pub fn is_lfg_group(&self, group: GroupId) -> bool {
        self.store.is_lfg_group(group)
    }

    pub fn party_size_at_join(&self, player: PlayerId) -> u8 {
        self.store
            .player(player)
            .map_or(0, |data| data.party_size_at_join)
    }

    pub fn lfg_status(&self, player: PlayerId) -> LfgStatus {
        LfgStatus {
            update_type: LfgUpdateType::UpdateStatus,
            state: self.store.state(player.into()),
            dungeons: self.store.selected_dungeons(player),
        }
    }

    /// Player is doing the dungeon finder through a random or seasonal entry
    pub fn selected_random_dungeon(&self, player: PlayerId) -> bool {
        if self.store.state(player.into()) == LfgState::None {
            return false;
        }
        self.store
            .selected_dungeons(player)
            .first()
            .and_then(|id| self.catalog.get_dungeon(*id))
            .is_some_and(|dungeon| dungeon.is_rewarding())
    }

    /// The entity's group dungeon is on `map_id` at `difficulty`
    pub fn in_lfg_dungeon_map(
        &self,
        entity: EntityId,
        map_id: u32,
        difficulty: Difficulty,
    ) -> bool {
        let group = match entity {
            EntityId::Group(group) => Some(group),
            EntityId::Player(player) => self.store.group_of(player),
        };
        group
            .and_then(|group| self.store.group_dungeon(group))
            .and_then(|id| self.catalog.get_dungeon(id))
            .is_some_and(|dungeon| dungeon.map_id == map_id && dungeon.difficulty == difficulty)
    }

    pub fn options(&self) -> u32 {
        self.options
    }

    pub fn set_options(&mut self, options: u32) {
        self.options = options;
    }

    pub fn is_option_enabled(&self, option: u32) -> bool {
        self.options & option != 0
    }

    pub fn proposal(&self, id: u32) -> Option<&Proposal> {
        self.proposals.get(&id)
    }

    pub fn proposal_ids(&self) -> Vec<u32> {
        self.proposals.keys().copied().collect()
    }

    pub fn role_check(&self, group: GroupId) -> Option<&RoleCheck> {
        self.role_checks.get(&group)
    }

    pub fn boot(&self, group: GroupId) -> Option<&PlayerBoot> {
        self.boots.get(&group)
    }

    // ---------------------------------------------------------------------
    // Membership maintenance
    // ---------------------------------------------------------------------

    /// Mirror a party's roster, leader and LFG flag from the world
    ///
    /// A party that no longer exists is treated as disbanded.
    pub fn sync_group(&mut self, group: GroupId) {
        let Some(snapshot) = self.world.group(group) else {
            self.remove_group_data(group);
            return;
        };

        for member in self.store.members(group) {
            if !snapshot.members.contains(&member) {
                self.store.remove_player_from_group(group, member);
            }
        }
        for member in &snapshot.members {
            self.store.add_player_to_group(group, *member);
            if let Some(player) = self.world.player(*member) {
                self.store.set_team(*member, player.team);
            }
        }
        self.store.set_leader(group, snapshot.leader);
        self.store.group_entry(group).is_lfg = snapshot.is_lfg;
    }

    /// Player joined an existing dungeon finder group mid-run
    pub fn setup_group_member(&mut self, player: PlayerId, group: GroupId) {
        let dungeons: DungeonSet = self.store.group_dungeon(group).into_iter().collect();
        self.store.set_selected_dungeons(player, dungeons);
        let state = self.store.state(group.into());
        self.store.set_state(player.into(), state);
        self.store.add_player_to_group(group, player);
    }

    pub fn remove_player_data(&mut self, player: PlayerId) {
        debug!("Removing dungeon finder data of {}", player);
        self.store.remove_player(player);
    }

    /// Forget a disbanded group
    ///
    /// Members are reset and told they left the queue, unless the group is
    /// being replaced by a freshly formed one mid-proposal.
    pub fn remove_group_data(&mut self, group: GroupId) {
        let state = self.store.state(group.into());
        let Some(data) = self.store.remove_group(group) else {
            return;
        };
        debug!("Removing dungeon finder data of {}", group);

        for member in data.players {
            if state != LfgState::Proposal {
                self.store.set_state(member.into(), LfgState::None);
                self.send_update(
                    member,
                    true,
                    LfgUpdateType::RemovedFromQueue,
                    DungeonSet::new(),
                    String::new(),
                );
            }
        }
        self.remove_from_queue(group.into());
        self.role_checks.remove(&group);
        self.boots.remove(&group);

        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.delete_group(group) {
                warn!("Failed to delete stored data of {}: {}", group, e);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------------

    pub(super) fn save_group_data(&self, group: GroupId) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        let Some(dungeon) = self.store.group_dungeon(group) else {
            return;
        };
        let record = GroupRecord::new(group, dungeon, self.store.state(group.into()));
        if let Err(e) = persistence.save_group(record) {
            warn!("Failed to save dungeon finder data of {}: {}", group, e);
        }
    }

    /// Restore a group's dungeon and progress from the store
    ///
    /// Only `Dungeon` and `FinishedDungeon` states are restored.
    pub fn load_group_data(&mut self, group: GroupId) -> bool {
        let Some(persistence) = self.persistence.clone() else {
            return false;
        };
        let record = match persistence.load_group(group) {
            Ok(Some(record)) => record,
            Ok(None) => return false,
            Err(e) => {
                warn!("Failed to load dungeon finder data of {}: {}", group, e);
                return false;
            }
        };
        if record.dungeon_id == 0 || record.state == LfgState::None {
            return false;
        }

        if let Some(snapshot) = self.world.group(group) {
            self.store.set_leader(group, snapshot.leader);
        }
        self.store.set_group_dungeon(group, record.dungeon_id);
        if matches!(record.state, LfgState::Dungeon | LfgState::FinishedDungeon) {
            self.store.set_state(group.into(), record.state);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dungeon::{DungeonDefinition, Position};
    use crate::persistence::InMemoryLfgStore;
    use crate::types::{Difficulty, PlayerClass};
    use crate::utils::ManualClock;
    use crate::world::InMemoryWorld;

    fn create_test_dungeon(id: DungeonId, lfg_type: LfgType, group: u32) -> DungeonDefinition {
        DungeonDefinition {
            id,
            name: format!("Dungeon {}", id),
            map_id: 500 + id,
            lfg_type,
            expansion: 2,
            group,
            min_level: 70,
            max_level: 80,
            difficulty: Difficulty::Heroic,
            seasonal: false,
            entrance: Position {
                x: 1.0,
                y: 2.0,
                z: 3.0,
                orientation: 0.0,
            },
        }
    }

    fn create_test_player(id: u64, class: PlayerClass) -> PlayerSnapshot {
        PlayerSnapshot {
            id: PlayerId(id),
            name: format!("player{}", id),
            class,
            ..Default::default()
        }
    }

    fn create_test_manager() -> (LfgManager<InMemoryWorld>, Arc<ManualClock>) {
        let catalog = DungeonCatalog::new(vec![
            create_test_dungeon(42, LfgType::Random, 7),
            create_test_dungeon(43, LfgType::Heroic, 7),
            create_test_dungeon(44, LfgType::Heroic, 7),
            create_test_dungeon(90, LfgType::Raid, 0),
        ]);
        let mut world = InMemoryWorld::new();
        for id in 1..=6 {
            world.upsert_player(create_test_player(id, PlayerClass::Druid));
        }
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = LfgManager::new(
            LfgConfig::default(),
            Arc::new(catalog),
            world,
            clock.clone(),
        );
        (manager, clock)
    }

    fn dungeons(ids: &[DungeonId]) -> DungeonSet {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_solo_join_expands_random() {
        let (mut manager, _) = create_test_manager();
        let result = manager.join_lfg(PlayerId(1), Roles::DAMAGE, dungeons(&[42]), "hi");

        assert_eq!(result, LfgJoinResult::Ok);
        assert_eq!(manager.state(PlayerId(1).into()), LfgState::Queued);
        assert_eq!(manager.selected_dungeons(PlayerId(1)), dungeons(&[42]));
        assert_eq!(manager.roles(PlayerId(1)), Roles::DAMAGE);
        assert_eq!(manager.comment(PlayerId(1)), "hi");

        let queue = manager.queues.values().next().unwrap();
        let entry = queue.get_entry(PlayerId(1).into()).unwrap();
        assert_eq!(entry.dungeons, dungeons(&[42, 43, 44]));

        let events = manager.drain_events();
        assert!(matches!(
            events[0],
            LfgEvent::JoinResult {
                result: LfgJoinResult::Ok,
                ..
            }
        ));
        assert!(matches!(
            events[1],
            LfgEvent::Update {
                update_type: LfgUpdateType::JoinQueue,
                party: false,
                ..
            }
        ));
    }

    #[test]
    fn test_join_without_role_is_ignored() {
        let (mut manager, _) = create_test_manager();
        let result = manager.join_lfg(PlayerId(1), Roles::LEADER, dungeons(&[43]), "");
        assert_eq!(result, LfgJoinResult::Failed);
        assert!(manager.drain_events().is_empty());
        assert_eq!(manager.state(PlayerId(1).into()), LfgState::None);
    }

    #[test]
    fn test_class_filter_strips_roles() {
        let (mut manager, _) = create_test_manager();
        manager
            .world_mut()
            .upsert_player(create_test_player(1, PlayerClass::Mage));
        let result = manager.join_lfg(PlayerId(1), Roles::TANK, dungeons(&[43]), "");
        assert_eq!(result, LfgJoinResult::Failed);

        manager.join_lfg(PlayerId(1), Roles::TANK | Roles::DAMAGE, dungeons(&[43]), "");
        assert_eq!(manager.roles(PlayerId(1)), Roles::DAMAGE);
    }

    #[test]
    fn test_join_validation_results() {
        let (mut manager, _) = create_test_manager();
        manager.world_mut().player_mut(PlayerId(1)).unwrap().deserter = true;
        assert_eq!(
            manager.join_lfg(PlayerId(1), Roles::DAMAGE, dungeons(&[43]), ""),
            LfgJoinResult::Deserter
        );

        assert_eq!(
            manager.join_lfg(PlayerId(2), Roles::DAMAGE, dungeons(&[43, 90]), ""),
            LfgJoinResult::MixedRaidDungeon
        );
        assert_eq!(
            manager.join_lfg(PlayerId(2), Roles::DAMAGE, dungeons(&[42, 43]), ""),
            LfgJoinResult::DungeonInvalid
        );
        assert_eq!(
            manager.join_lfg(PlayerId(2), Roles::DAMAGE, dungeons(&[7777]), ""),
            LfgJoinResult::DungeonInvalid
        );

        manager.world_mut().player_mut(PlayerId(3)).unwrap().level = 60;
        let result = manager.join_lfg(PlayerId(3), Roles::DAMAGE, dungeons(&[43]), "");
        assert_eq!(result, LfgJoinResult::NotMeetReqs);
        let locks = manager
            .drain_events()
            .into_iter()
            .rev()
            .find_map(|event| match event {
                LfgEvent::JoinResult { locks, .. } => Some(locks),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            locks[&PlayerId(3)].get(&manager.catalog().entry(43)),
            Some(&LockReason::TooLowLevel)
        );
        assert_eq!(manager.state(PlayerId(3).into()), LfgState::None);
    }

    #[test]
    fn test_raid_selection_is_refused() {
        let (mut manager, _) = create_test_manager();
        let result = manager.join_lfg(PlayerId(1), Roles::DAMAGE, dungeons(&[90]), "raid");
        assert_eq!(result, LfgJoinResult::Failed);
        assert_eq!(manager.state(PlayerId(1).into()), LfgState::None);
    }

    #[test]
    fn test_rejoin_replaces_queue_entry() {
        let (mut manager, _) = create_test_manager();
        manager.join_lfg(PlayerId(1), Roles::DAMAGE, dungeons(&[43]), "");
        manager.join_lfg(PlayerId(1), Roles::HEALER, dungeons(&[44]), "");

        assert_eq!(manager.queue_sizes().entries, 1);
        let entry = manager
            .queues
            .values()
            .find_map(|queue| queue.get_entry(PlayerId(1).into()))
            .unwrap();
        assert_eq!(entry.dungeons, dungeons(&[44]));
        assert_eq!(entry.roles[&PlayerId(1)], Roles::HEALER);
    }

    #[test]
    fn test_solo_leave() {
        let (mut manager, _) = create_test_manager();
        manager.join_lfg(PlayerId(1), Roles::DAMAGE, dungeons(&[43]), "");
        manager.drain_events();

        manager.leave_lfg(PlayerId(1).into(), false);
        assert_eq!(manager.state(PlayerId(1).into()), LfgState::None);
        assert!(manager.selected_dungeons(PlayerId(1)).is_empty());
        assert_eq!(manager.queue_sizes().entries, 0);
        assert!(matches!(
            manager.drain_events()[0],
            LfgEvent::Update {
                update_type: LfgUpdateType::RemovedFromQueue,
                ..
            }
        ));
    }

    #[test]
    fn test_update_is_gated_by_options() {
        let (mut manager, _) = create_test_manager();
        manager.set_options(0);
        for id in 1..=5 {
            manager.join_lfg(PlayerId(id), Roles::ANY, dungeons(&[43]), "");
        }
        assert_eq!(manager.update(100), TickReport::default());
        assert!(!manager.is_option_enabled(OPTION_ENABLE_DUNGEON_FINDER));

        manager.set_options(OPTION_ENABLE_DUNGEON_FINDER);
        assert_eq!(manager.update(100).new_proposals, vec![1]);
    }

    #[test]
    fn test_queue_status_follows_interval() {
        let (mut manager, _) = create_test_manager();
        manager.join_lfg(PlayerId(1), Roles::DAMAGE, dungeons(&[43]), "");
        manager.drain_events();

        assert!(!manager.update(15_000).queue_status_sent);
        assert!(!manager.update(1).queue_status_sent);
        assert!(manager.update(1).queue_status_sent);

        let status = manager
            .drain_events()
            .into_iter()
            .find_map(|event| match event {
                LfgEvent::QueueStatus { recipient, status } => Some((recipient, status)),
                _ => None,
            })
            .unwrap();
        assert_eq!(status.0, PlayerId(1));
        assert_eq!(status.1.dungeon_id, 43);
        assert_eq!(status.1.dps_needed, 2);
        assert_eq!(status.1.wait_time_avg, -1);
    }

    #[test]
    fn test_cross_faction_queue_key() {
        let (mut manager, _) = create_test_manager();
        let mut horde = create_test_player(2, PlayerClass::Druid);
        horde.team = Team::Horde;
        manager.world_mut().upsert_player(horde);

        manager.join_lfg(PlayerId(1), Roles::DAMAGE, dungeons(&[43]), "");
        manager.join_lfg(PlayerId(2), Roles::DAMAGE, dungeons(&[43]), "");
        assert_eq!(manager.queue_lengths().len(), 2);

        let (mut manager, _) = create_test_manager();
        manager.config.cross_faction = true;
        let mut horde = create_test_player(2, PlayerClass::Druid);
        horde.team = Team::Horde;
        manager.world_mut().upsert_player(horde);
        manager.join_lfg(PlayerId(1), Roles::DAMAGE, dungeons(&[43]), "");
        manager.join_lfg(PlayerId(2), Roles::DAMAGE, dungeons(&[43]), "");
        assert_eq!(manager.queue_lengths(), vec![(QueueKey::CrossFaction, 2)]);
    }

    #[test]
    fn test_group_data_persistence() {
        let (manager, _) = create_test_manager();
        let store = Arc::new(InMemoryLfgStore::new());
        let mut manager = manager.with_store(store.clone());

        let group = GroupId(77);
        manager.store.set_group_dungeon(group, 43);
        manager.set_state(group.into(), LfgState::Dungeon);
        manager.save_group_data(group);
        assert_eq!(store.group_count().unwrap(), 1);

        manager.store.remove_group(group);
        assert!(manager.load_group_data(group));
        assert_eq!(manager.group_dungeon(group), Some(43));
        assert_eq!(manager.state(group.into()), LfgState::Dungeon);
        assert_eq!(manager.group_dungeon_map(group), Some(543));

        manager.remove_group_data(group);
        assert_eq!(store.group_count().unwrap(), 0);
        assert!(!manager.load_group_data(group));
    }

    #[test]
    fn test_random_and_seasonal_listing() {
        let (manager, _) = create_test_manager();
        let entries = manager.random_and_seasonal_dungeons(80, 2);
        assert_eq!(entries.len(), 1);
        assert!(entries.contains(&manager.catalog().entry(42)));
    }
}
