//! Matchmaking queue
//!
//! One queue per faction (or a single shared queue when cross-faction play is
//! enabled). Entries keep join order; the matcher walks them oldest first and
//! greedily grows a candidate group around each anchor. When the greedy pass
//! stalls, a bounded depth-first search retries the anchor with other
//! combinations of the later entries.

use super::roles::{assign_roles, RoleComposition};
use crate::types::{
    DungeonId, DungeonSet, EntityId, GroupId, PlayerId, QueueStatusData, Roles, Team,
};
use crate::utils::seconds_between;
use crate::wait_time::{StatsKey, WaitRole, WaitTimeTracker};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Extension attempts the fallback search may spend on one anchor
const SEARCH_BUDGET: usize = 4096;

/// Partition of the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QueueKey {
    Faction(Team),
    CrossFaction,
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueKey::Faction(team) => write!(f, "{:?}", team),
            QueueKey::CrossFaction => write!(f, "CrossFaction"),
        }
    }
}

/// A solo player or group waiting for a match
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub entity: EntityId,
    pub join_time: DateTime<Utc>,
    pub dungeons: DungeonSet,
    /// Roles offered by each member
    pub roles: BTreeMap<PlayerId, Roles>,
}

impl QueueEntry {
    pub fn size(&self) -> usize {
        self.roles.len()
    }
}

/// What the matcher needs to know beyond the queue itself
pub trait MatchContext {
    /// Entity is still in the `Queued` state
    fn is_queued(&self, entity: EntityId) -> bool;

    fn has_ignore(&self, a: PlayerId, b: PlayerId) -> bool;

    fn is_random(&self, dungeon: DungeonId) -> bool;

    /// Dungeon an LFG group is already running, if the entry is one
    fn continuing_dungeon(&self, entity: EntityId) -> Option<(GroupId, DungeonId)>;
}

/// A full, role-solvable set of entries
#[derive(Debug, Clone)]
pub struct QueueMatch {
    pub entries: Vec<QueueEntry>,
    pub dungeon_id: DungeonId,
    /// Assigned role per player, leader flag kept
    pub roles: BTreeMap<PlayerId, Roles>,
    /// LFG group the match continues, if any
    pub continuing: Option<GroupId>,
}

struct Candidate {
    indices: Vec<usize>,
    dungeons: DungeonSet,
    roles: BTreeMap<PlayerId, Roles>,
    continuing: Option<(GroupId, DungeonId)>,
}

#[derive(Debug, Default)]
pub struct LfgQueue {
    entries: Vec<QueueEntry>,
    wait_times: WaitTimeTracker,
}

impl LfgQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry; a replaced entry moves to the back
    ///
    /// Returns false, leaving the queue untouched, for an empty selection.
    pub fn add_queue_data(
        &mut self,
        entity: EntityId,
        join_time: DateTime<Utc>,
        dungeons: DungeonSet,
        roles: BTreeMap<PlayerId, Roles>,
    ) -> bool {
        if dungeons.is_empty() {
            return false;
        }
        self.remove_from_queue(entity);
        self.entries.push(QueueEntry {
            entity,
            join_time,
            dungeons,
            roles,
        });
        true
    }

    /// Put a previously dequeued entry back at its join-time position
    pub fn requeue(&mut self, entry: QueueEntry) {
        self.remove_from_queue(entry.entity);
        let at = self
            .entries
            .partition_point(|queued| queued.join_time <= entry.join_time);
        self.entries.insert(at, entry);
    }

    pub fn remove_from_queue(&mut self, entity: EntityId) -> Option<QueueEntry> {
        let at = self.entries.iter().position(|e| e.entity == entity)?;
        Some(self.entries.remove(at))
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.entries.iter().any(|e| e.entity == entity)
    }

    pub fn get_entry(&self, entity: EntityId) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.entity == entity)
    }

    pub fn get_join_time(&self, entity: EntityId) -> Option<DateTime<Utc>> {
        self.get_entry(entity).map(|e| e.join_time)
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn player_count(&self) -> usize {
        self.entries.iter().map(QueueEntry::size).sum()
    }

    /// Form every full group the queue currently allows
    ///
    /// Matched entries leave the queue and are handed back inside the
    /// matches. Entries no longer in the `Queued` state are skipped.
    pub fn find_groups(
        &mut self,
        composition: RoleComposition,
        ctx: &impl MatchContext,
    ) -> Vec<QueueMatch> {
        let group_size = composition.group_size();
        let mut used = vec![false; self.entries.len()];
        let mut found: Vec<Candidate> = Vec::new();

        for anchor in 0..self.entries.len() {
            if used[anchor] || !ctx.is_queued(self.entries[anchor].entity) {
                continue;
            }
            let Some(mut candidate) = self.start_candidate(anchor, composition, ctx) else {
                continue;
            };

            for next in anchor + 1..self.entries.len() {
                if candidate.roles.len() >= group_size {
                    break;
                }
                if used[next] || !ctx.is_queued(self.entries[next].entity) {
                    continue;
                }
                if let Some(grown) = self.try_extend(&candidate, next, composition, ctx) {
                    candidate = grown;
                }
            }

            if candidate.roles.len() < group_size {
                let mut budget = SEARCH_BUDGET;
                let searched = self
                    .start_candidate(anchor, composition, ctx)
                    .and_then(|start| {
                        self.search_candidate(
                            start,
                            anchor + 1,
                            &used,
                            composition,
                            ctx,
                            &mut budget,
                        )
                    });
                match searched {
                    Some(full) => candidate = full,
                    None => continue,
                }
            }

            if candidate.roles.len() == group_size {
                for index in &candidate.indices {
                    used[*index] = true;
                }
                found.push(candidate);
            }
        }

        if found.is_empty() {
            return Vec::new();
        }

        let mut taken: Vec<Option<QueueEntry>> = self.entries.drain(..).map(Some).collect();
        let matches = found
            .into_iter()
            .map(|candidate| {
                let dungeon_id = match candidate.continuing {
                    Some((_, dungeon)) => dungeon,
                    None => first_concrete(&candidate.dungeons, ctx).unwrap_or_default(),
                };
                let entries = candidate
                    .indices
                    .iter()
                    .filter_map(|index| taken[*index].take())
                    .collect();
                QueueMatch {
                    entries,
                    dungeon_id,
                    roles: candidate.roles,
                    continuing: candidate.continuing.map(|(group, _)| group),
                }
            })
            .collect::<Vec<_>>();
        self.entries = taken.into_iter().flatten().collect();

        debug!(
            "Matched {} groups, {} entries left in queue",
            matches.len(),
            self.entries.len()
        );
        matches
    }

    fn start_candidate(
        &self,
        index: usize,
        composition: RoleComposition,
        ctx: &impl MatchContext,
    ) -> Option<Candidate> {
        let entry = &self.entries[index];
        let continuing = ctx.continuing_dungeon(entry.entity);
        let dungeons = match continuing {
            Some((_, dungeon)) => [dungeon].into_iter().collect(),
            None => entry.dungeons.clone(),
        };
        first_concrete(&dungeons, ctx)?;
        let roles = assign_roles(&entry.roles, composition)?;
        Some(Candidate {
            indices: vec![index],
            dungeons,
            roles,
            continuing,
        })
    }

    /// Depth-first completion of `candidate` from entries at `from` onwards
    fn search_candidate(
        &self,
        candidate: Candidate,
        from: usize,
        used: &[bool],
        composition: RoleComposition,
        ctx: &impl MatchContext,
        budget: &mut usize,
    ) -> Option<Candidate> {
        if candidate.roles.len() == composition.group_size() {
            return Some(candidate);
        }
        for next in from..self.entries.len() {
            if *budget == 0 {
                return None;
            }
            if used[next] || !ctx.is_queued(self.entries[next].entity) {
                continue;
            }
            *budget -= 1;
            let Some(grown) = self.try_extend(&candidate, next, composition, ctx) else {
                continue;
            };
            let full = self.search_candidate(grown, next + 1, used, composition, ctx, budget);
            if full.is_some() {
                return full;
            }
        }
        None
    }

    fn try_extend(
        &self,
        candidate: &Candidate,
        index: usize,
        composition: RoleComposition,
        ctx: &impl MatchContext,
    ) -> Option<Candidate> {
        let entry = &self.entries[index];
        if candidate.roles.len() + entry.size() > composition.group_size() {
            return None;
        }

        let mut continuing = candidate.continuing;
        if let Some(found) = ctx.continuing_dungeon(entry.entity) {
            if continuing.is_some() {
                return None;
            }
            continuing = Some(found);
        }

        let dungeons: DungeonSet = candidate
            .dungeons
            .intersection(&entry.dungeons)
            .copied()
            .collect();
        first_concrete(&dungeons, ctx)?;

        for player in entry.roles.keys() {
            if candidate.roles.contains_key(player) {
                return None;
            }
            if candidate.roles.keys().any(|other| ctx.has_ignore(*player, *other)) {
                return None;
            }
        }

        let mut offered: BTreeMap<PlayerId, Roles> = BTreeMap::new();
        for member in candidate.indices.iter().copied().chain(Some(index)) {
            offered.extend(self.entries[member].roles.iter().map(|(p, r)| (*p, *r)));
        }
        let roles = assign_roles(&offered, composition)?;

        let mut indices = candidate.indices.clone();
        indices.push(index);
        Some(Candidate {
            indices,
            dungeons,
            roles,
            continuing,
        })
    }

    /// Record how long a matched player waited
    ///
    /// Single-role players feed their role's bucket; flexible players feed
    /// the average.
    pub fn update_wait_time(&mut self, roles: Roles, dungeon_id: DungeonId, waited: Duration) {
        let role = WaitRole::from_roles(roles);
        self.wait_times
            .record_wait_time(StatsKey::new(role, dungeon_id), waited);
    }

    pub fn wait_times(&self) -> &WaitTimeTracker {
        &self.wait_times
    }

    /// Status line for every queued entity
    pub fn queue_status(
        &self,
        composition: RoleComposition,
        now: DateTime<Utc>,
    ) -> Vec<(EntityId, QueueStatusData)> {
        self.entries
            .iter()
            .filter_map(|entry| {
                let dungeon_id = *entry.dungeons.iter().next()?;
                let estimate = |role| self.wait_times.estimate_seconds(role, dungeon_id);
                let wait_time_avg = estimate(WaitRole::Average);
                let wait_time_tank = estimate(WaitRole::Tank);
                let wait_time_healer = estimate(WaitRole::Healer);
                let wait_time_dps = estimate(WaitRole::Damage);

                let (tanks_needed, healers_needed, dps_needed) =
                    composition.still_needed(entry.roles.values().copied());

                Some((
                    entry.entity,
                    QueueStatusData {
                        dungeon_id,
                        wait_time_avg,
                        wait_time_tank,
                        wait_time_healer,
                        wait_time_dps,
                        queued_seconds: seconds_between(entry.join_time, now),
                        tanks_needed,
                        healers_needed,
                        dps_needed,
                    },
                ))
            })
            .collect()
    }

    /// Human readable queue contents
    pub fn dump(&self, full: bool) -> String {
        let mut out = format!(
            "{} entries, {} players\n",
            self.entries.len(),
            self.player_count()
        );
        if full {
            for entry in &self.entries {
                out.push_str(&format!(
                    "  {} since {} roles [{}] dungeons [{}]\n",
                    entry.entity,
                    entry.join_time.format("%H:%M:%S"),
                    entry
                        .roles
                        .iter()
                        .map(|(player, roles)| format!("{}={}", player, roles))
                        .collect::<Vec<_>>()
                        .join(", "),
                    crate::utils::concatenate_dungeons(&entry.dungeons)
                ));
            }
        }
        out
    }
}

/// Lowest dungeon in the set a group can actually be sent to
fn first_concrete(dungeons: &DungeonSet, ctx: &impl MatchContext) -> Option<DungeonId> {
    dungeons.iter().copied().find(|id| !ctx.is_random(*id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashSet};

    #[derive(Default)]
    struct TestContext {
        not_queued: HashSet<EntityId>,
        ignores: HashSet<(PlayerId, PlayerId)>,
        continuing: BTreeMap<EntityId, (GroupId, DungeonId)>,
    }

    impl MatchContext for TestContext {
        fn is_queued(&self, entity: EntityId) -> bool {
            !self.not_queued.contains(&entity)
        }

        fn has_ignore(&self, a: PlayerId, b: PlayerId) -> bool {
            self.ignores.contains(&(a, b)) || self.ignores.contains(&(b, a))
        }

        fn is_random(&self, dungeon: DungeonId) -> bool {
            dungeon == 42
        }

        fn continuing_dungeon(&self, entity: EntityId) -> Option<(GroupId, DungeonId)> {
            self.continuing.get(&entity).copied()
        }
    }

    fn create_test_time(offset: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + offset, 0).unwrap()
    }

    fn dungeons(ids: &[DungeonId]) -> DungeonSet {
        ids.iter().copied().collect::<BTreeSet<_>>()
    }

    fn solo(queue: &mut LfgQueue, id: u64, roles: Roles, ids: &[DungeonId]) {
        queue.add_queue_data(
            PlayerId(id).into(),
            create_test_time(id as i64),
            dungeons(ids),
            [(PlayerId(id), roles)].into_iter().collect(),
        );
    }

    fn fill_standard(queue: &mut LfgQueue, ids: &[DungeonId]) {
        solo(queue, 1, Roles::TANK, ids);
        solo(queue, 2, Roles::HEALER, ids);
        solo(queue, 3, Roles::DAMAGE, ids);
        solo(queue, 4, Roles::DAMAGE, ids);
        solo(queue, 5, Roles::DAMAGE, ids);
    }

    #[test]
    fn test_upsert_replaces_and_moves_to_back() {
        let mut queue = LfgQueue::new();
        solo(&mut queue, 1, Roles::TANK, &[43]);
        solo(&mut queue, 2, Roles::HEALER, &[43]);
        solo(&mut queue, 1, Roles::DAMAGE, &[44]);

        assert_eq!(queue.len(), 2);
        let entry = queue.entries().last().unwrap();
        assert_eq!(entry.entity, PlayerId(1).into());
        assert_eq!(entry.dungeons, dungeons(&[44]));
        assert_eq!(entry.roles[&PlayerId(1)], Roles::DAMAGE);
    }

    #[test]
    fn test_empty_selection_is_not_queued() {
        let mut queue = LfgQueue::new();
        let added = queue.add_queue_data(
            PlayerId(1).into(),
            create_test_time(0),
            DungeonSet::new(),
            BTreeMap::new(),
        );
        assert!(!added);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut queue = LfgQueue::new();
        solo(&mut queue, 1, Roles::TANK, &[43]);
        assert!(queue.remove_from_queue(PlayerId(1).into()).is_some());
        assert!(queue.remove_from_queue(PlayerId(1).into()).is_none());
    }

    #[test]
    fn test_full_group_matches() {
        let mut queue = LfgQueue::new();
        fill_standard(&mut queue, &[42, 43, 44]);
        solo(&mut queue, 6, Roles::DAMAGE, &[43]);

        let matches = queue.find_groups(RoleComposition::default(), &TestContext::default());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].dungeon_id, 43);
        assert_eq!(matches[0].entries.len(), 5);
        assert_eq!(queue.len(), 1);
        assert!(queue.contains(PlayerId(6).into()));
    }

    #[test]
    fn test_no_match_without_shared_concrete_dungeon() {
        let mut queue = LfgQueue::new();
        fill_standard(&mut queue, &[42]);
        let matches = queue.find_groups(RoleComposition::default(), &TestContext::default());
        assert!(matches.is_empty());
        assert_eq!(queue.len(), 5);
    }

    #[test]
    fn test_unqueued_and_ignored_entries_are_skipped() {
        let mut queue = LfgQueue::new();
        fill_standard(&mut queue, &[43]);
        solo(&mut queue, 6, Roles::DAMAGE, &[43]);

        let mut ctx = TestContext::default();
        ctx.ignores.insert((PlayerId(1), PlayerId(3)));
        let matches = queue.find_groups(RoleComposition::default(), &ctx);
        assert_eq!(matches.len(), 1);
        assert!(!matches[0].roles.contains_key(&PlayerId(3)));

        let mut queue = LfgQueue::new();
        fill_standard(&mut queue, &[43]);
        let mut ctx = TestContext::default();
        ctx.not_queued.insert(PlayerId(2).into());
        assert!(queue.find_groups(RoleComposition::default(), &ctx).is_empty());
    }

    #[test]
    fn test_continuing_group_sets_dungeon() {
        let mut queue = LfgQueue::new();
        let group: EntityId = GroupId(9).into();
        queue.add_queue_data(
            group,
            create_test_time(0),
            dungeons(&[44]),
            [
                (PlayerId(1), Roles::TANK | Roles::LEADER),
                (PlayerId(2), Roles::HEALER),
                (PlayerId(3), Roles::DAMAGE),
                (PlayerId(4), Roles::DAMAGE),
            ]
            .into_iter()
            .collect(),
        );
        solo(&mut queue, 5, Roles::DAMAGE, &[43, 44]);

        let mut ctx = TestContext::default();
        ctx.continuing.insert(group, (GroupId(9), 44));
        let matches = queue.find_groups(RoleComposition::default(), &ctx);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].dungeon_id, 44);
        assert_eq!(matches[0].continuing, Some(GroupId(9)));
        assert_eq!(matches[0].roles[&PlayerId(1)], Roles::TANK | Roles::LEADER);
    }

    #[test]
    fn test_requeue_keeps_join_order() {
        let mut queue = LfgQueue::new();
        solo(&mut queue, 1, Roles::TANK, &[43]);
        solo(&mut queue, 3, Roles::TANK, &[43]);
        let entry = QueueEntry {
            entity: PlayerId(2).into(),
            join_time: create_test_time(2),
            dungeons: dungeons(&[43]),
            roles: [(PlayerId(2), Roles::DAMAGE)].into_iter().collect(),
        };
        queue.requeue(entry);

        let order: Vec<EntityId> = queue.entries().iter().map(|e| e.entity).collect();
        assert_eq!(
            order,
            vec![PlayerId(1).into(), PlayerId(2).into(), PlayerId(3).into()]
        );
        assert_eq!(queue.get_join_time(PlayerId(2).into()), Some(create_test_time(2)));
    }

    #[test]
    fn test_queue_status_estimates() {
        let mut queue = LfgQueue::new();
        solo(&mut queue, 1, Roles::DAMAGE, &[43]);
        queue.update_wait_time(Roles::DAMAGE, 43, Duration::from_secs(120));

        let status = queue.queue_status(RoleComposition::default(), create_test_time(31));
        assert_eq!(status.len(), 1);
        let (entity, data) = &status[0];
        assert_eq!(*entity, PlayerId(1).into());
        assert_eq!(data.wait_time_dps, 120);
        assert_eq!(data.wait_time_avg, -1);
        assert_eq!(data.wait_time_tank, -1);
        assert_eq!(data.queued_seconds, 30);
        assert_eq!((data.tanks_needed, data.healers_needed, data.dps_needed), (1, 1, 2));
    }

    #[test]
    fn test_average_bucket_only_takes_flexible_players() {
        let mut queue = LfgQueue::new();
        solo(&mut queue, 1, Roles::DAMAGE, &[43]);
        queue.update_wait_time(Roles::TANK, 43, Duration::from_secs(300));
        queue.update_wait_time(Roles::HEALER | Roles::DAMAGE, 43, Duration::from_secs(60));
        queue.update_wait_time(Roles::TANK | Roles::HEALER, 43, Duration::from_secs(180));

        let tracker = queue.wait_times();
        assert_eq!(tracker.estimate_seconds(WaitRole::Tank, 43), 300);
        assert_eq!(tracker.estimate_seconds(WaitRole::Average, 43), 120);
        assert_eq!(tracker.estimate_seconds(WaitRole::Healer, 43), -1);
    }

    #[test]
    fn test_party_fits_after_greedy_pass_stalls() {
        let mut queue = LfgQueue::new();
        solo(&mut queue, 1, Roles::TANK, &[43]);
        solo(&mut queue, 2, Roles::DAMAGE, &[43]);
        solo(&mut queue, 3, Roles::DAMAGE, &[43]);
        let party: EntityId = GroupId(7).into();
        queue.add_queue_data(
            party,
            create_test_time(4),
            dungeons(&[43]),
            [
                (PlayerId(4), Roles::HEALER | Roles::LEADER),
                (PlayerId(5), Roles::DAMAGE),
                (PlayerId(6), Roles::DAMAGE),
            ]
            .into_iter()
            .collect(),
        );

        let matches = queue.find_groups(RoleComposition::default(), &TestContext::default());
        assert_eq!(matches.len(), 1);
        let matched: Vec<EntityId> = matches[0].entries.iter().map(|e| e.entity).collect();
        assert_eq!(matched, vec![PlayerId(1).into(), PlayerId(2).into(), party]);
        assert_eq!(matches[0].roles[&PlayerId(1)], Roles::TANK);
        assert_eq!(matches[0].roles[&PlayerId(4)], Roles::HEALER | Roles::LEADER);

        assert_eq!(queue.len(), 1);
        assert!(queue.contains(PlayerId(3).into()));
    }
}
