//! Group role checks
//!
//! Before a group enters the queue every member confirms the roles they are
//! willing to take. The check finishes once all answers are in and the
//! answers fit the dungeon composition; anything else sends the group back.

use super::manager::{LfgManager, LfgOutcome};
use super::roles::check_group_roles;
use crate::types::{
    DungeonId, DungeonSet, GroupId, LfgEvent, LfgJoinResult, LfgState, LfgUpdateType, PlayerId,
    RoleCheckState, Roles,
};
use crate::world::World;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;

/// Pending role confirmation of a group
#[derive(Debug, Clone, PartialEq)]
pub struct RoleCheck {
    pub cancel_time: DateTime<Utc>,
    pub state: RoleCheckState,
    pub leader: PlayerId,
    /// Expanded dungeon selection the group will queue for
    pub dungeons: DungeonSet,
    /// Random entry the selection came from
    pub random_id: Option<DungeonId>,
    /// Answer per member; `Roles::NONE` until the member answered
    pub roles: BTreeMap<PlayerId, Roles>,
}

impl RoleCheck {
    /// Dungeons as presented to the members
    pub fn display_dungeons(&self) -> DungeonSet {
        match self.random_id {
            Some(random) => [random].into_iter().collect(),
            None => self.dungeons.clone(),
        }
    }

    pub fn all_answered(&self) -> bool {
        self.roles.values().all(|roles| !roles.is_empty())
    }
}

impl<W: World> LfgManager<W> {
    /// Record a member's role answer, or abort the check when `player` is None
    pub fn update_role_check(&mut self, group: GroupId, player: Option<PlayerId>, roles: Roles) {
        let Some(mut check) = self.role_checks.remove(&group) else {
            return;
        };

        let mut roles = Roles::from_bits_truncate(roles.bits());
        if let Some(player) = player {
            let known = check.roles.contains_key(&player);
            match self.world.player(player) {
                Some(snapshot) if known => roles = snapshot.class.filter_roles(roles),
                _ => {
                    self.role_checks.insert(group, check);
                    return;
                }
            }
        }

        let send_role_chosen = check.state != RoleCheckState::Default && player.is_some();

        match player {
            None => check.state = RoleCheckState::Aborted,
            Some(_) if !roles.has_combat_role() => check.state = RoleCheckState::NoRole,
            Some(player) => {
                check.roles.insert(player, roles);
                if check.all_answered() {
                    check.state = if check_group_roles(&check.roles, self.composition).is_some() {
                        RoleCheckState::Finished
                    } else {
                        RoleCheckState::WrongRoles
                    };
                }
            }
        }

        let dungeons = check.display_dungeons();
        let answers = check.roles.clone();
        for (member, offered) in &answers {
            if let Some(chooser) = player.filter(|_| send_role_chosen) {
                self.emit(LfgEvent::RoleChosen {
                    recipient: *member,
                    player_id: chooser,
                    roles,
                });
            }
            self.emit(LfgEvent::RoleCheckUpdate {
                recipient: *member,
                group_id: group,
                state: check.state,
                dungeons: dungeons.clone(),
                answers: answers.clone(),
            });

            match check.state {
                RoleCheckState::Initializing => {}
                RoleCheckState::Finished => {
                    self.store.set_state((*member).into(), LfgState::Queued);
                    self.store.set_roles(*member, *offered);
                    let comment = self.store.comment(*member).to_string();
                    self.send_update(
                        *member,
                        true,
                        LfgUpdateType::AddedToQueue,
                        dungeons.clone(),
                        comment,
                    );
                }
                state => {
                    if *member == check.leader {
                        self.send_join_result(
                            *member,
                            LfgJoinResult::Failed,
                            Some(state),
                            BTreeMap::new(),
                        );
                    }
                    self.send_update(
                        *member,
                        true,
                        LfgUpdateType::RoleCheckFailed,
                        DungeonSet::new(),
                        String::new(),
                    );
                    self.store.restore_state((*member).into());
                }
            }
        }

        match check.state {
            RoleCheckState::Initializing => {
                self.role_checks.insert(group, check);
            }
            RoleCheckState::Finished => {
                debug!("{} finished its role check, joining queue", group);
                let now = self.now();
                let key = self.queue_key(group.into());
                self.store.set_state(group.into(), LfgState::Queued);
                self.queues.entry(key).or_default().add_queue_data(
                    group.into(),
                    now,
                    check.dungeons,
                    answers,
                );
                self.record(LfgOutcome::RoleCheck(RoleCheckState::Finished));
            }
            state => {
                debug!("{} role check ended with {:?}", group, state);
                self.store.restore_state(group.into());
                self.record(LfgOutcome::RoleCheck(state));
            }
        }
    }

    /// Role check ran out of time
    pub(super) fn expire_role_check(&mut self, group: GroupId) {
        let Some(mut check) = self.role_checks.remove(&group) else {
            return;
        };
        check.state = RoleCheckState::MissingRole;
        let dungeons = check.display_dungeons();

        for member in check.roles.keys() {
            self.store.restore_state((*member).into());
            self.emit(LfgEvent::RoleCheckUpdate {
                recipient: *member,
                group_id: group,
                state: check.state,
                dungeons: dungeons.clone(),
                answers: check.roles.clone(),
            });
            if *member == check.leader {
                self.send_join_result(
                    *member,
                    LfgJoinResult::Failed,
                    Some(RoleCheckState::MissingRole),
                    BTreeMap::new(),
                );
            }
        }

        debug!("{} role check timed out", group);
        self.store.restore_state(group.into());
        self.record(LfgOutcome::RoleCheck(RoleCheckState::MissingRole));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LfgConfig;
    use crate::dungeon::{DungeonCatalog, DungeonDefinition, Position};
    use crate::types::{Difficulty, LfgType, PlayerClass};
    use crate::utils::ManualClock;
    use crate::world::{InMemoryWorld, PlayerSnapshot};
    use std::sync::Arc;

    fn create_test_manager() -> (LfgManager<InMemoryWorld>, Arc<ManualClock>, GroupId) {
        let catalog = DungeonCatalog::new(vec![DungeonDefinition {
            id: 43,
            name: "Utgarde Keep".to_string(),
            map_id: 574,
            lfg_type: LfgType::Heroic,
            expansion: 2,
            group: 0,
            min_level: 70,
            max_level: 80,
            difficulty: Difficulty::Heroic,
            seasonal: false,
            entrance: Position::default(),
        }]);
        let mut world = InMemoryWorld::new();
        for id in 1..=5 {
            world.upsert_player(PlayerSnapshot {
                id: PlayerId(id),
                class: PlayerClass::Druid,
                ..Default::default()
            });
        }
        let members: Vec<PlayerId> = (1..=5).map(PlayerId).collect();
        let group = world.create_group(PlayerId(1), &members);
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = LfgManager::new(
            LfgConfig::default(),
            Arc::new(catalog),
            world,
            clock.clone(),
        );
        (manager, clock, group)
    }

    fn dungeons() -> DungeonSet {
        [43].into_iter().collect()
    }

    #[test]
    fn test_role_check_finishes_and_queues_group() {
        let (mut manager, _, group) = create_test_manager();
        manager.join_lfg(PlayerId(1), Roles::LEADER | Roles::TANK, dungeons(), "");
        assert_eq!(manager.state(group.into()), LfgState::RoleCheck);
        assert_eq!(manager.state(PlayerId(3).into()), LfgState::RoleCheck);

        manager.update_role_check(group, Some(PlayerId(2)), Roles::HEALER);
        for id in 3..=5 {
            manager.update_role_check(group, Some(PlayerId(id)), Roles::DAMAGE);
        }

        assert!(manager.role_check(group).is_none());
        assert_eq!(manager.state(group.into()), LfgState::Queued);
        for id in 1..=5 {
            assert_eq!(manager.state(PlayerId(id).into()), LfgState::Queued);
        }
        assert_eq!(manager.roles(PlayerId(1)), Roles::LEADER | Roles::TANK);
        assert_eq!(manager.queue_sizes().players, 5);
    }

    #[test]
    fn test_wrong_roles_restores_everyone() {
        let (mut manager, _, group) = create_test_manager();
        manager.join_lfg(PlayerId(1), Roles::TANK, dungeons(), "");
        for id in 2..=5 {
            manager.update_role_check(group, Some(PlayerId(id)), Roles::TANK);
        }

        assert!(manager.role_check(group).is_none());
        assert_eq!(manager.state(group.into()), LfgState::None);
        assert_eq!(manager.state(PlayerId(4).into()), LfgState::None);
        assert_eq!(manager.queue_sizes().entries, 0);

        let failure = manager.drain_events().into_iter().find_map(|event| match event {
            LfgEvent::JoinResult {
                recipient,
                role_check,
                ..
            } => Some((recipient, role_check)),
            _ => None,
        });
        assert_eq!(
            failure,
            Some((PlayerId(1), Some(RoleCheckState::WrongRoles)))
        );
    }

    #[test]
    fn test_leave_aborts_role_check() {
        let (mut manager, _, group) = create_test_manager();
        manager.join_lfg(PlayerId(1), Roles::TANK, dungeons(), "");
        manager.leave_lfg(PlayerId(3).into(), false);

        assert!(manager.role_check(group).is_none());
        assert_eq!(manager.state(PlayerId(3).into()), LfgState::None);
        assert_eq!(
            manager.drain_outcomes().last(),
            Some(&LfgOutcome::RoleCheck(RoleCheckState::Aborted))
        );
    }

    #[test]
    fn test_answer_without_role_fails_check() {
        let (mut manager, _, group) = create_test_manager();
        manager.join_lfg(PlayerId(1), Roles::TANK, dungeons(), "");
        manager.update_role_check(group, Some(PlayerId(2)), Roles::LEADER);

        assert!(manager.role_check(group).is_none());
        assert_eq!(manager.state(PlayerId(2).into()), LfgState::None);
    }

    #[test]
    fn test_role_check_timeout() {
        let (mut manager, clock, group) = create_test_manager();
        manager.join_lfg(PlayerId(1), Roles::TANK, dungeons(), "");
        manager.update_role_check(group, Some(PlayerId(2)), Roles::HEALER);
        manager.drain_events();

        clock.advance(chrono::Duration::seconds(44));
        assert_eq!(manager.update(100).expired_role_checks, 0);

        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(manager.update(100).expired_role_checks, 1);
        assert_eq!(manager.state(group.into()), LfgState::None);
        for id in 1..=5 {
            assert_eq!(manager.state(PlayerId(id).into()), LfgState::None);
        }

        let leader_result = manager.drain_events().into_iter().find_map(|event| match event {
            LfgEvent::JoinResult { role_check, .. } => role_check,
            _ => None,
        });
        assert_eq!(leader_result, Some(RoleCheckState::MissingRole));
    }

    #[test]
    fn test_answers_from_outsiders_are_ignored() {
        let (mut manager, _, group) = create_test_manager();
        manager.world_mut().upsert_player(PlayerSnapshot {
            id: PlayerId(9),
            ..Default::default()
        });
        manager.join_lfg(PlayerId(1), Roles::TANK, dungeons(), "");
        manager.update_role_check(group, Some(PlayerId(9)), Roles::DAMAGE);

        let check = manager.role_check(group).unwrap();
        assert_eq!(check.state, RoleCheckState::Initializing);
        assert!(!check.roles.contains_key(&PlayerId(9)));
    }
}
