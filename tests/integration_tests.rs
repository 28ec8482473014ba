//! Integration tests for the dungeon finder service
//!
//! These tests drive the engine through its public surface, including:
//! - Party role checks and solo joins through random entries
//! - Proposals that are accepted, declined or left to time out
//! - Vote kicks and dungeon completion rewards
//! - Group progress surviving a restart
//! - Requests flowing through the request handler to the publisher

mod fixtures;

use dungeon_finder::amqp::LfgRequest;
use dungeon_finder::lfg::BootStart;
use dungeon_finder::persistence::{InMemoryLfgStore, LfgStore};
use dungeon_finder::types::{LfgEvent, LfgState, PlayerId, Roles};
use dungeon_finder::utils::Clock;
use dungeon_finder::world::{GroupSnapshot, PlayerDirectory};
use proptest::prelude::*;
use std::sync::Arc;

use fixtures::{
    create_test_catalog, create_test_handler, create_test_player, create_test_world, dungeon_set,
    TestEngine, HIGH_TIER_FIRST_QUEST, LOW_TIER_FIRST_QUEST, LOW_TIER_REPEAT_QUEST, NEXUS,
    RANDOM_HEROIC, STANDARD_ROLES, UTGARDE_KEEP, UTGARDE_KEEP_MAP,
};

#[test]
fn test_party_role_check_queues_every_member() {
    let mut world = create_test_world(5, 80);
    let members: Vec<PlayerId> = (1..=5).map(PlayerId).collect();
    let group = world.create_group(PlayerId(1), &members);
    let mut engine = TestEngine::new(world);

    engine.manager.join_lfg(
        PlayerId(1),
        Roles::LEADER | Roles::TANK,
        dungeon_set(&[UTGARDE_KEEP]),
        "",
    );
    assert_eq!(engine.manager.state(group.into()), LfgState::RoleCheck);
    for id in 2..=5 {
        assert_eq!(engine.manager.state(PlayerId(id).into()), LfgState::RoleCheck);
    }

    engine
        .manager
        .update_role_check(group, Some(PlayerId(2)), Roles::HEALER);
    for id in 3..=5 {
        engine
            .manager
            .update_role_check(group, Some(PlayerId(id)), Roles::DAMAGE);
    }

    assert!(engine.manager.role_check(group).is_none());
    assert_eq!(engine.manager.state(group.into()), LfgState::Queued);
    let sizes = engine.manager.queue_sizes();
    assert_eq!(sizes.entries, 1);
    assert_eq!(sizes.players, 5);

    // A full party matches on its own
    let report = engine.manager.update(100);
    assert_eq!(report.new_proposals.len(), 1);
}

#[test]
fn test_random_entry_matches_specific_dungeon() {
    let mut engine = TestEngine::new(create_test_world(5, 80));

    engine
        .manager
        .join_lfg(PlayerId(1), Roles::TANK, dungeon_set(&[RANDOM_HEROIC]), "");
    for (i, role) in STANDARD_ROLES.iter().enumerate().skip(1) {
        engine.manager.join_lfg(
            PlayerId(i as u64 + 1),
            *role,
            dungeon_set(&[UTGARDE_KEEP]),
            "",
        );
    }

    let report = engine.manager.update(100);
    assert_eq!(report.new_proposals.len(), 1);
    let proposal = engine.manager.proposal(report.new_proposals[0]).unwrap();
    assert_eq!(proposal.dungeon_id, UTGARDE_KEEP);
    assert_eq!(
        engine.manager.selected_dungeons(PlayerId(1)),
        dungeon_set(&[RANDOM_HEROIC])
    );
}

#[test]
fn test_disjoint_selections_do_not_match() {
    let mut engine = TestEngine::new(create_test_world(5, 80));
    for (i, role) in STANDARD_ROLES.iter().enumerate() {
        let dungeon = if i == 0 { NEXUS } else { UTGARDE_KEEP };
        engine
            .manager
            .join_lfg(PlayerId(i as u64 + 1), *role, dungeon_set(&[dungeon]), "");
    }

    let report = engine.manager.update(100);
    assert!(report.new_proposals.is_empty());
    assert_eq!(engine.manager.queue_sizes().entries, 5);
}

#[test]
fn test_single_decline_requeues_the_rest() {
    let mut engine = TestEngine::new(create_test_world(5, 80));
    let join_time = engine.clock.now();
    let proposal = engine.queue_standard_group(&[UTGARDE_KEEP]);
    assert!(engine.manager.get_join_time(PlayerId(1).into()).is_none());
    engine.advance_seconds(10);

    for player in 1..=4 {
        engine
            .manager
            .update_proposal(proposal, PlayerId(player), true);
    }
    engine.manager.update_proposal(proposal, PlayerId(5), false);

    assert!(engine.manager.proposal(proposal).is_none());
    for player in 1..=4 {
        assert_eq!(
            engine.manager.state(PlayerId(player).into()),
            LfgState::Queued
        );
    }
    assert_eq!(engine.manager.state(PlayerId(5).into()), LfgState::None);
    assert_eq!(engine.manager.queue_sizes().entries, 4);
    assert_eq!(
        engine.manager.get_join_time(PlayerId(1).into()),
        Some(join_time)
    );
    assert!(engine.manager.group_of(PlayerId(1)).is_none());
}

#[test]
fn test_decline_and_timeout_leave_the_same_queue() {
    let mut declined = TestEngine::new(create_test_world(5, 80));
    let proposal = declined.queue_standard_group(&[UTGARDE_KEEP]);
    declined
        .manager
        .update_proposal(proposal, PlayerId(3), false);

    let mut expired = TestEngine::new(create_test_world(5, 80));
    let proposal = expired.queue_standard_group(&[UTGARDE_KEEP]);
    for player in [1, 2, 4, 5] {
        expired
            .manager
            .update_proposal(proposal, PlayerId(player), true);
    }
    expired.advance_seconds(46);
    let report = expired.manager.update(100);
    assert_eq!(report.expired_proposals, 1);

    for player in 1..=5 {
        assert_eq!(
            declined.manager.state(PlayerId(player).into()),
            expired.manager.state(PlayerId(player).into()),
            "state of player {}",
            player
        );
    }
    assert_eq!(
        declined.manager.queue_sizes(),
        expired.manager.queue_sizes()
    );
    assert_eq!(expired.manager.state(PlayerId(3).into()), LfgState::None);
}

#[test]
fn test_vote_kick_passes_at_three_votes() {
    let mut engine = TestEngine::new(create_test_world(5, 80));
    let group = engine.form_standard_group(&[UTGARDE_KEEP]);
    let kicks_before = engine.manager.kicks_left(group);

    let started = engine
        .manager
        .init_boot(group, PlayerId(1), PlayerId(2), "afk");
    assert_eq!(started, BootStart::Started);
    assert!(engine.manager.is_vote_kick_active(group));
    assert_eq!(
        engine.manager.init_boot(group, PlayerId(3), PlayerId(4), ""),
        BootStart::AlreadyInProgress
    );

    // Kicker counts as the first agree vote
    assert_eq!(engine.manager.update_boot(PlayerId(3), true), None);
    assert_eq!(engine.manager.update_boot(PlayerId(4), true), Some(true));

    assert!(!engine.manager.is_vote_kick_active(group));
    assert!(engine.manager.boot(group).is_none());
    assert!(!engine.manager.group_members(group).contains(&PlayerId(2)));
    assert_eq!(engine.manager.kicks_left(group), kicks_before - 1);
    assert_eq!(engine.manager.state(PlayerId(2).into()), LfgState::None);
    assert!(!engine
        .manager
        .world()
        .group(group)
        .unwrap()
        .members
        .contains(&PlayerId(2)));

    let updates = engine
        .manager
        .drain_events()
        .into_iter()
        .filter(|event| matches!(event, LfgEvent::BootUpdate { in_progress: false, .. }))
        .count();
    assert_eq!(updates, 4);
}

#[test]
fn test_vote_kick_fails_when_enough_deny() {
    let mut engine = TestEngine::new(create_test_world(5, 80));
    let group = engine.form_standard_group(&[UTGARDE_KEEP]);

    engine
        .manager
        .init_boot(group, PlayerId(1), PlayerId(2), "");
    assert_eq!(engine.manager.update_boot(PlayerId(3), false), None);
    assert_eq!(engine.manager.update_boot(PlayerId(4), false), Some(false));

    assert_eq!(engine.manager.group_members(group).len(), 5);
    assert_eq!(
        engine.manager.kicks_left(group),
        engine.manager.config().max_kicks
    );
}

#[test]
fn test_reward_tier_boundaries() {
    let catalog = create_test_catalog();
    let tier = |level| {
        catalog
            .random_dungeon_reward(RANDOM_HEROIC, level)
            .map(|reward| reward.first_quest)
    };

    assert_eq!(tier(70), Some(LOW_TIER_FIRST_QUEST));
    assert_eq!(tier(75), Some(LOW_TIER_FIRST_QUEST));
    assert_eq!(tier(76), Some(HIGH_TIER_FIRST_QUEST));
    assert_eq!(tier(80), Some(HIGH_TIER_FIRST_QUEST));
    assert_eq!(tier(81), None);
    assert!(catalog.random_dungeon_reward(UTGARDE_KEEP, 80).is_none());
}

#[test]
fn test_completion_pays_repeat_quest_at_tier_boundary() {
    let mut world = create_test_world(5, 75);
    world
        .player_mut(PlayerId(4))
        .unwrap()
        .rewarded_quests
        .insert(LOW_TIER_FIRST_QUEST);
    let mut engine = TestEngine::new(world);
    let group = engine.form_standard_group(&[RANDOM_HEROIC]);

    assert_eq!(
        engine
            .manager
            .finish_dungeon(group, UTGARDE_KEEP, UTGARDE_KEEP_MAP),
        5
    );
    let rewarded = engine.manager.world().rewarded_quests();
    assert!(rewarded.contains(&(PlayerId(4), LOW_TIER_REPEAT_QUEST)));
    assert!(rewarded.contains(&(PlayerId(1), LOW_TIER_FIRST_QUEST)));
    assert_eq!(engine.manager.state(group.into()), LfgState::FinishedDungeon);
}

#[test]
fn test_group_progress_survives_restart() {
    let store = Arc::new(InMemoryLfgStore::new());
    let mut before = TestEngine::with_store(create_test_world(5, 80), store.clone());
    let group = before.form_standard_group(&[RANDOM_HEROIC]);
    before
        .manager
        .finish_dungeon(group, UTGARDE_KEEP, UTGARDE_KEEP_MAP);
    assert_eq!(store.group_count().unwrap(), 1);

    let mut world = create_test_world(5, 80);
    world.upsert_group(before.manager.world().group(group).unwrap());
    let mut after = TestEngine::with_store(world, store.clone());

    assert!(after.manager.load_group_data(group));
    assert_eq!(after.manager.group_dungeon(group), Some(UTGARDE_KEEP));
    assert_eq!(
        after.manager.state(group.into()),
        LfgState::FinishedDungeon
    );
    assert_eq!(
        after
            .manager
            .finish_dungeon(group, UTGARDE_KEEP, UTGARDE_KEEP_MAP),
        0
    );
}

#[tokio::test]
async fn test_upserts_are_idempotent() {
    let (handler, engine, _publisher) = create_test_handler();
    let group = dungeon_finder::types::GroupId(7);
    let snapshot = GroupSnapshot {
        id: group,
        leader: PlayerId(1),
        members: (1..=5).map(PlayerId).collect(),
        is_lfg: false,
    };

    for _ in 0..2 {
        for id in 1..=5 {
            handler
                .apply(LfgRequest::UpsertPlayer(create_test_player(id, 80)))
                .await
                .unwrap();
        }
        handler
            .apply(LfgRequest::UpsertGroup(snapshot.clone()))
            .await
            .unwrap();
    }

    {
        let engine = engine.lock().await;
        assert_eq!(engine.group_members(group).len(), 5);
        assert_eq!(engine.group_leader(group), Some(PlayerId(1)));
        assert_eq!(
            engine.world().player(PlayerId(3)).unwrap().group,
            Some(group)
        );
    }

    handler
        .apply(LfgRequest::Join {
            player_id: PlayerId(1),
            roles: Roles::TANK,
            dungeons: vec![UTGARDE_KEEP],
            comment: String::new(),
        })
        .await
        .unwrap();
    handler
        .apply(LfgRequest::UpsertPlayer(create_test_player(3, 80)))
        .await
        .unwrap();

    let engine = engine.lock().await;
    assert_eq!(engine.state(group.into()), LfgState::RoleCheck);
    assert_eq!(engine.state(PlayerId(3).into()), LfgState::RoleCheck);
    assert_eq!(engine.group_members(group).len(), 5);
}

#[tokio::test]
async fn test_full_flow_through_requests() {
    let (handler, engine, publisher) = create_test_handler();

    for (i, role) in STANDARD_ROLES.iter().enumerate() {
        let id = i as u64 + 1;
        handler
            .apply(LfgRequest::UpsertPlayer(create_test_player(id, 80)))
            .await
            .unwrap();
        handler
            .apply(LfgRequest::Join {
                player_id: PlayerId(id),
                roles: *role,
                dungeons: vec![RANDOM_HEROIC],
                comment: String::new(),
            })
            .await
            .unwrap();
    }

    let report = handler.tick(1000).await.unwrap();
    assert_eq!(report.new_proposals.len(), 1);
    let proposal_id = report.new_proposals[0];

    for id in 1..=5 {
        handler
            .apply(LfgRequest::ProposalAnswer {
                proposal_id,
                player_id: PlayerId(id),
                accept: true,
            })
            .await
            .unwrap();
    }

    let group = engine.lock().await.group_of(PlayerId(1)).unwrap();
    assert_eq!(engine.lock().await.state(group.into()), LfgState::Dungeon);

    handler
        .apply(LfgRequest::FinishDungeon {
            group_id: group,
            dungeon_id: UTGARDE_KEEP,
            map_id: UTGARDE_KEEP_MAP,
        })
        .await
        .unwrap();

    let keys = publisher.get_published_events();
    assert!(keys.contains(&"lfg.event.proposal".to_string()));
    let rewards = publisher
        .published()
        .into_iter()
        .filter(|event| {
            matches!(
                event,
                LfgEvent::PlayerReward {
                    quest_id: HIGH_TIER_FIRST_QUEST,
                    done: false,
                    ..
                }
            )
        })
        .count();
    assert_eq!(rewards, 5);
    assert_eq!(
        engine.lock().await.state(group.into()),
        LfgState::FinishedDungeon
    );
}

proptest! {
    #[test]
    fn prop_join_order_does_not_block_matching(
        roles in Just(STANDARD_ROLES.to_vec()).prop_shuffle()
    ) {
        let mut engine = TestEngine::new(create_test_world(5, 80));
        for (i, role) in roles.iter().enumerate() {
            engine.manager.join_lfg(
                PlayerId(i as u64 + 1),
                *role,
                dungeon_set(&[UTGARDE_KEEP]),
                "",
            );
        }

        let report = engine.manager.update(100);
        prop_assert_eq!(report.new_proposals.len(), 1);
        prop_assert_eq!(engine.manager.queue_sizes().entries, 0);
        for player in 1..=5 {
            prop_assert_eq!(
                engine.manager.state(PlayerId(player).into()),
                LfgState::Proposal
            );
        }
    }
}
