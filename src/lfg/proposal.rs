//! Group proposals
//!
//! A proposal is a matched group waiting for every member to accept. One
//! decline, or a timeout with pending answers, dissolves it: the entities
//! responsible are dropped from the queue and everyone else goes back in with
//! their original join time.

use super::manager::{LfgManager, LfgOutcome};
use super::queue::{QueueEntry, QueueKey};
use crate::types::{
    DungeonId, DungeonSet, EntityId, GroupId, LfgAnswer, LfgEvent, LfgState, LfgUpdateType,
    PlayerId, ProposalMemberView, ProposalState, Roles,
};
use crate::utils::seconds_between;
use crate::world::World;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::debug;

/// One member of a proposal
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProposalPlayer {
    /// Role assigned by the matcher, leader flag kept
    pub role: Roles,
    /// Group the member queued with
    pub group: Option<GroupId>,
    pub answer: LfgAnswer,
}

impl ProposalPlayer {
    /// Queue entity the member came from
    pub fn origin(&self, player: PlayerId) -> EntityId {
        match self.group {
            Some(group) => group.into(),
            None => player.into(),
        }
    }
}

/// A matched group waiting for acceptance
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub id: u32,
    pub dungeon_id: DungeonId,
    pub state: ProposalState,
    /// Dungeon finder group being refilled, if any
    pub group: Option<GroupId>,
    pub leader: PlayerId,
    pub cancel_time: DateTime<Utc>,
    /// True unless the proposal continues an existing dungeon group
    pub is_new: bool,
    pub players: BTreeMap<PlayerId, ProposalPlayer>,
    /// Queue entries the proposal was built from
    pub queues: Vec<QueueEntry>,
    pub queue_key: QueueKey,
}

impl Proposal {
    pub fn all_agreed(&self) -> bool {
        self.players
            .values()
            .all(|player| player.answer == LfgAnswer::Agree)
    }

    /// Client view of the proposal for one recipient
    pub fn member_views(&self, recipient: PlayerId) -> Vec<ProposalMemberView> {
        let recipient_group = self.players.get(&recipient).and_then(|p| p.group);
        self.players
            .iter()
            .map(|(player_id, player)| ProposalMemberView {
                player_id: *player_id,
                role: player.role,
                answer: player.answer,
                same_group: player.group.is_some() && player.group == recipient_group,
            })
            .collect()
    }
}

impl<W: World> LfgManager<W> {
    /// Register a proposal under the next id
    pub fn add_proposal(&mut self, mut proposal: Proposal) -> u32 {
        self.last_proposal_id += 1;
        proposal.id = self.last_proposal_id;
        self.proposals.insert(proposal.id, proposal);
        self.last_proposal_id
    }

    fn send_proposal_update(&mut self, proposal: &Proposal, recipient: PlayerId) {
        self.emit(LfgEvent::ProposalUpdate {
            recipient,
            proposal_id: proposal.id,
            state: proposal.state,
            dungeon_id: proposal.dungeon_id,
            members: proposal.member_views(recipient),
        });
    }

    /// Move the members of a fresh proposal into the `Proposal` state and
    /// ask them to answer
    pub(super) fn begin_proposal(&mut self, id: u32) {
        let Some(proposal) = self.proposals.get(&id).cloned() else {
            return;
        };

        for (player, member) in &proposal.players {
            self.store.set_state((*player).into(), LfgState::Proposal);
            let dungeons = self.store.selected_dungeons(*player);
            let comment = self.store.comment(*player).to_string();
            let party = match self.store.group_of(*player) {
                Some(group) => {
                    self.store.set_state(group.into(), LfgState::Proposal);
                    true
                }
                None => false,
            };
            self.send_update(
                *player,
                party || member.group.is_some(),
                LfgUpdateType::ProposalBegin,
                dungeons,
                comment,
            );
            self.send_proposal_update(&proposal, *player);
        }

        if proposal.state == ProposalState::Success {
            if let Some(last) = proposal.players.keys().next_back() {
                self.update_proposal(id, *last, true);
            }
        }
    }

    /// Record a member's answer
    ///
    /// A decline dissolves the proposal at once. Once everyone accepted the
    /// group is formed and the proposal removed.
    pub fn update_proposal(&mut self, id: u32, player: PlayerId, accept: bool) {
        let controlled = self.world.controlled_members(player);
        let Some(proposal) = self.proposals.get_mut(&id) else {
            return;
        };
        if !proposal.players.contains_key(&player) {
            return;
        }

        let answer = LfgAnswer::from(accept);
        for member in controlled {
            if let Some(entry) = proposal.players.get_mut(&member) {
                entry.answer = answer;
            }
        }
        if let Some(entry) = proposal.players.get_mut(&player) {
            entry.answer = answer;
        }
        debug!("Proposal {}: {} answered {:?}", id, player, answer);

        if !accept {
            self.remove_proposal(id, LfgUpdateType::ProposalDeclined);
            return;
        }

        if !proposal.all_agreed() {
            let snapshot = proposal.clone();
            for member in snapshot.players.keys() {
                self.send_proposal_update(&snapshot, *member);
            }
            return;
        }

        let Some(mut proposal) = self.proposals.remove(&id) else {
            return;
        };
        let send_update = proposal.state != ProposalState::Success;
        proposal.state = ProposalState::Success;
        let now = self.now();

        let join_times: BTreeMap<EntityId, DateTime<Utc>> = proposal
            .queues
            .iter()
            .map(|entry| (entry.entity, entry.join_time))
            .collect();

        for (player, member) in &proposal.players {
            let dungeons = self.store.selected_dungeons(*player);
            if send_update {
                self.send_proposal_update(&proposal, *player);
            }

            let waited = join_times
                .get(&member.origin(*player))
                .map(|joined| seconds_between(*joined, now))
                .unwrap_or(0);

            let party = member.group.is_some();
            self.send_update(
                *player,
                party,
                LfgUpdateType::GroupFound,
                dungeons.clone(),
                String::new(),
            );
            self.send_update(
                *player,
                false,
                LfgUpdateType::RemovedFromQueue,
                DungeonSet::new(),
                String::new(),
            );
            if party {
                self.send_update(
                    *player,
                    true,
                    LfgUpdateType::RemovedFromQueue,
                    DungeonSet::new(),
                    String::new(),
                );
            }

            let mut roles = self.store.roles(*player);
            roles.remove(Roles::LEADER);
            let wait_dungeon = dungeons.first().copied().unwrap_or(proposal.dungeon_id);
            self.queues
                .entry(proposal.queue_key)
                .or_default()
                .update_wait_time(roles, wait_dungeon, Duration::from_secs(waited as u64));

            let party_size = self
                .world
                .player(*player)
                .and_then(|snapshot| snapshot.group)
                .and_then(|group| self.world.group(group))
                .map_or(0, |group| group.members.len() as u8);
            self.store.player_entry(*player).party_size_at_join = party_size;
            self.store.set_state((*player).into(), LfgState::Dungeon);
        }

        for entry in &proposal.queues {
            self.remove_from_queue(entry.entity);
        }

        debug!(
            "Proposal {} accepted, forming group for dungeon {}",
            id, proposal.dungeon_id
        );
        self.record(LfgOutcome::ProposalSucceeded);
        self.make_new_group(&proposal);
    }

    /// Dissolve a proposal
    ///
    /// Members that declined, or with `ProposalFailed` also those that never
    /// answered, take their whole queue entry out with them. Everyone else is
    /// requeued with the original join time.
    pub fn remove_proposal(&mut self, id: u32, update_type: LfgUpdateType) {
        let Some(mut proposal) = self.proposals.remove(&id) else {
            return;
        };
        proposal.state = ProposalState::Failed;
        debug!("Proposal {} removed: {:?}", id, update_type);

        if update_type == LfgUpdateType::ProposalFailed {
            for member in proposal.players.values_mut() {
                if member.answer == LfgAnswer::Pending {
                    member.answer = LfgAnswer::Deny;
                }
            }
        }

        let mut to_remove: BTreeSet<EntityId> = BTreeSet::new();
        for (player, member) in proposal.players.iter_mut() {
            if member.answer == LfgAnswer::Agree {
                continue;
            }
            if member.answer == LfgAnswer::Deny || update_type == LfgUpdateType::ProposalFailed {
                member.answer = LfgAnswer::Deny;
                to_remove.insert(member.origin(*player));
            }
        }

        for (player, member) in &proposal.players {
            self.send_proposal_update(&proposal, *player);

            if to_remove.contains(&member.origin(*player)) {
                let kind = if member.answer == LfgAnswer::Deny {
                    update_type
                } else {
                    LfgUpdateType::RemovedFromQueue
                };
                self.store.restore_state((*player).into());
                match member.group {
                    Some(group) => {
                        self.store.restore_state(group.into());
                        self.send_update(*player, true, kind, DungeonSet::new(), String::new());
                    }
                    None => {
                        self.send_update(*player, false, kind, DungeonSet::new(), String::new());
                    }
                }
            } else {
                let dungeons = self.store.selected_dungeons(*player);
                let comment = self.store.comment(*player).to_string();
                self.store.set_state((*player).into(), LfgState::Queued);
                match member.group {
                    Some(group) => {
                        self.store.set_state(group.into(), LfgState::Queued);
                        self.send_update(
                            *player,
                            true,
                            LfgUpdateType::AddedToQueue,
                            dungeons,
                            comment,
                        );
                    }
                    None => {
                        self.send_update(
                            *player,
                            false,
                            LfgUpdateType::AddedToQueue,
                            dungeons,
                            comment,
                        );
                    }
                }
            }
        }

        let queue = self.queues.entry(proposal.queue_key).or_default();
        for entry in proposal.queues {
            if to_remove.contains(&entry.entity) {
                queue.remove_from_queue(entry.entity);
            } else {
                queue.requeue(entry);
            }
        }

        self.record(LfgOutcome::ProposalFailed(update_type));
    }
}
