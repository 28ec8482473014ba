//! Vote kicks inside dungeon finder groups

use super::manager::{LfgManager, LfgOutcome};
use crate::types::{GroupId, LfgAnswer, LfgEvent, PlayerId};
use crate::utils::seconds_between;
use crate::world::World;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;

/// Running vote to remove a member
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerBoot {
    pub cancel_time: DateTime<Utc>,
    pub in_progress: bool,
    pub votes: BTreeMap<PlayerId, LfgAnswer>,
    pub victim: PlayerId,
    pub reason: String,
}

impl PlayerBoot {
    pub fn agree_count(&self) -> usize {
        self.votes
            .values()
            .filter(|vote| **vote == LfgAnswer::Agree)
            .count()
    }

    pub fn deny_count(&self) -> usize {
        self.votes
            .values()
            .filter(|vote| **vote == LfgAnswer::Deny)
            .count()
    }
}

/// Why a vote kick did or did not start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStart {
    Started,
    AlreadyInProgress,
    NoKicksLeft,
    NotInGroup,
    NotLfgGroup,
    InvalidTarget,
}

impl<W: World> LfgManager<W> {
    /// Open a vote kick against `victim`
    ///
    /// The kicker's vote counts as agree and the victim's as deny.
    pub fn init_boot(
        &mut self,
        group: GroupId,
        kicker: PlayerId,
        victim: PlayerId,
        reason: &str,
    ) -> BootStart {
        if !self.store.is_lfg_group(group) {
            return BootStart::NotLfgGroup;
        }
        let members = self.store.members(group);
        if !members.contains(&kicker) {
            return BootStart::NotInGroup;
        }
        if kicker == victim || !members.contains(&victim) {
            return BootStart::InvalidTarget;
        }
        if self.boots.contains_key(&group) {
            return BootStart::AlreadyInProgress;
        }
        if self.kicks_left(group) == 0 {
            return BootStart::NoKicksLeft;
        }

        self.store.group_entry(group).vote_kick_active = true;

        let mut votes: BTreeMap<PlayerId, LfgAnswer> = members
            .iter()
            .map(|member| (*member, LfgAnswer::Pending))
            .collect();
        votes.insert(victim, LfgAnswer::Deny);
        votes.insert(kicker, LfgAnswer::Agree);

        let boot = PlayerBoot {
            cancel_time: self.now() + self.boot_timeout(),
            in_progress: true,
            votes,
            victim,
            reason: reason.to_string(),
        };

        debug!("{} started a vote kick against {} in {}", kicker, victim, group);
        for member in &members {
            self.send_boot_update(group, &boot, *member);
        }
        self.boots.insert(group, boot);
        BootStart::Started
    }

    /// Cast a vote
    ///
    /// Returns `Some(passed)` once the vote concluded with this ballot.
    pub fn update_boot(&mut self, player: PlayerId, accept: bool) -> Option<bool> {
        let group = self.store.group_of(player)?;
        let boot = self.boots.get_mut(&group)?;
        if boot.votes.get(&player) != Some(&LfgAnswer::Pending) {
            return None;
        }
        boot.votes.insert(player, LfgAnswer::from(accept));

        let needed = self.config.kick_votes_needed as usize;
        let agree = boot.agree_count();
        let deny = boot.deny_count();
        if agree < needed && boot.votes.len() - deny >= needed {
            return None;
        }

        let mut boot = self.boots.remove(&group)?;
        boot.in_progress = false;
        let passed = agree >= needed;
        self.finish_boot(group, &boot);

        if passed {
            self.kick_member(group, boot.victim);
        }
        debug!(
            "Vote kick against {} in {} {}",
            boot.victim,
            group,
            if passed { "passed" } else { "failed" }
        );
        self.record(LfgOutcome::Boot { passed });
        Some(passed)
    }

    /// Vote kick ran out of time
    pub(super) fn expire_boot(&mut self, group: GroupId) {
        let Some(mut boot) = self.boots.remove(&group) else {
            return;
        };
        boot.in_progress = false;
        self.finish_boot(group, &boot);
        debug!("Vote kick against {} in {} timed out", boot.victim, group);
        self.record(LfgOutcome::Boot { passed: false });
    }

    fn finish_boot(&mut self, group: GroupId, boot: &PlayerBoot) {
        for voter in boot.votes.keys() {
            if *voter != boot.victim {
                self.send_boot_update(group, boot, *voter);
            }
        }
        self.store.group_entry(group).vote_kick_active = false;
    }

    fn kick_member(&mut self, group: GroupId, victim: PlayerId) {
        if self.store.group_dungeon(group).is_some() {
            let _ = self.teleport_player(victim, true, false);
        }
        self.world.remove_member(group, victim);
        self.store.remove_player_from_group(group, victim);
        self.store.set_state(victim.into(), crate::types::LfgState::None);
        self.store.group_entry(group).decrease_kicks_left();
    }

    fn send_boot_update(&mut self, group: GroupId, boot: &PlayerBoot, recipient: PlayerId) {
        let seconds_left = if boot.in_progress {
            seconds_between(self.now(), boot.cancel_time)
        } else {
            0
        };
        self.emit(LfgEvent::BootUpdate {
            recipient,
            group_id: group,
            victim: boot.victim,
            in_progress: boot.in_progress,
            my_vote: boot.votes.get(&recipient).copied().unwrap_or_default(),
            agree_votes: boot.agree_count() as u8,
            total_votes: (boot.agree_count() + boot.deny_count()) as u8,
            votes_needed: self.config.kick_votes_needed,
            seconds_left,
            reason: boot.reason.clone(),
        });
    }
}
