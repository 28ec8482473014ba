//! Test fixtures and utilities for integration tests

#![allow(dead_code)]

use chrono::Utc;
use dungeon_finder::amqp::publisher::MockEventPublisher;
use dungeon_finder::config::LfgConfig;
use dungeon_finder::dungeon::{DungeonCatalog, DungeonDefinition, LfgReward, Position};
use dungeon_finder::lfg::LfgManager;
use dungeon_finder::metrics::MetricsCollector;
use dungeon_finder::persistence::InMemoryLfgStore;
use dungeon_finder::service::{LfgRequestHandler, SharedEngine};
use dungeon_finder::types::{
    Difficulty, DungeonId, DungeonSet, GroupId, LfgType, PlayerClass, PlayerId, Roles,
};
use dungeon_finder::utils::ManualClock;
use dungeon_finder::world::{InMemoryWorld, PlayerSnapshot};
use std::sync::Arc;

/// Random heroic entry covering every dungeon below
pub const RANDOM_HEROIC: DungeonId = 42;
pub const UTGARDE_KEEP: DungeonId = 43;
pub const NEXUS: DungeonId = 44;
pub const UTGARDE_KEEP_MAP: u32 = 574;
pub const NEXUS_MAP: u32 = 576;

/// Quests paid out by the random heroic entry
pub const LOW_TIER_FIRST_QUEST: u32 = 100;
pub const LOW_TIER_REPEAT_QUEST: u32 = 101;
pub const HIGH_TIER_FIRST_QUEST: u32 = 200;
pub const HIGH_TIER_REPEAT_QUEST: u32 = 201;

/// Roles of a standard group, in join order
pub const STANDARD_ROLES: [Roles; 5] = [
    Roles::TANK,
    Roles::HEALER,
    Roles::DAMAGE,
    Roles::DAMAGE,
    Roles::DAMAGE,
];

fn create_test_dungeon(id: DungeonId, lfg_type: LfgType, map_id: u32) -> DungeonDefinition {
    DungeonDefinition {
        id,
        name: format!("Dungeon {}", id),
        map_id,
        lfg_type,
        expansion: 2,
        group: 1,
        min_level: 70,
        max_level: 80,
        difficulty: Difficulty::Heroic,
        seasonal: false,
        entrance: Position {
            x: 150.0,
            y: -80.0,
            z: 40.0,
            orientation: 1.5,
        },
    }
}

/// One random heroic entry, two heroics and two reward tiers split at level 75
pub fn create_test_catalog() -> DungeonCatalog {
    let mut catalog = DungeonCatalog::new(vec![
        create_test_dungeon(RANDOM_HEROIC, LfgType::Random, 0),
        create_test_dungeon(UTGARDE_KEEP, LfgType::Heroic, UTGARDE_KEEP_MAP),
        create_test_dungeon(NEXUS, LfgType::Heroic, NEXUS_MAP),
    ]);
    catalog.add_reward(
        RANDOM_HEROIC,
        LfgReward {
            max_level: 75,
            first_quest: LOW_TIER_FIRST_QUEST,
            other_quest: LOW_TIER_REPEAT_QUEST,
        },
    );
    catalog.add_reward(
        RANDOM_HEROIC,
        LfgReward {
            max_level: 80,
            first_quest: HIGH_TIER_FIRST_QUEST,
            other_quest: HIGH_TIER_REPEAT_QUEST,
        },
    );
    catalog
}

pub fn create_test_player(id: u64, level: u8) -> PlayerSnapshot {
    PlayerSnapshot {
        id: PlayerId(id),
        name: format!("player{}", id),
        level,
        class: PlayerClass::Druid,
        map_id: 1,
        ..Default::default()
    }
}

/// World with druids 1..=count at `level`
pub fn create_test_world(count: u64, level: u8) -> InMemoryWorld {
    let mut world = InMemoryWorld::new();
    for id in 1..=count {
        world.upsert_player(create_test_player(id, level));
    }
    world
}

/// Test engine driven by a manual clock
pub struct TestEngine {
    pub manager: LfgManager<InMemoryWorld>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<InMemoryLfgStore>,
}

impl TestEngine {
    pub fn new(world: InMemoryWorld) -> Self {
        Self::with_store(world, Arc::new(InMemoryLfgStore::new()))
    }

    pub fn with_store(world: InMemoryWorld, store: Arc<InMemoryLfgStore>) -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = LfgManager::new(
            LfgConfig::default(),
            Arc::new(create_test_catalog()),
            world,
            clock.clone(),
        )
        .with_store(store.clone());
        Self {
            manager,
            clock,
            store,
        }
    }

    pub fn advance_seconds(&self, seconds: i64) {
        self.clock.advance(chrono::Duration::seconds(seconds));
    }

    /// Queue players 1..=5 as a standard group for `dungeons`, run one tick
    /// and return the proposal that came out of it
    pub fn queue_standard_group(&mut self, dungeons: &[DungeonId]) -> u32 {
        let selection = dungeon_set(dungeons);
        for (i, role) in STANDARD_ROLES.iter().enumerate() {
            self.manager
                .join_lfg(PlayerId(i as u64 + 1), *role, selection.clone(), "");
        }
        let report = self.manager.update(100);
        assert_eq!(report.new_proposals.len(), 1, "expected exactly one proposal");
        report.new_proposals[0]
    }

    /// Queue, accept and return the dungeon finder group players 1..=5 land in
    pub fn form_standard_group(&mut self, dungeons: &[DungeonId]) -> GroupId {
        let proposal = self.queue_standard_group(dungeons);
        for player in 1..=5 {
            self.manager.update_proposal(proposal, PlayerId(player), true);
        }
        self.manager.drain_events();
        self.manager
            .group_of(PlayerId(1))
            .expect("accepted proposal should form a group")
    }
}

pub fn dungeon_set(ids: &[DungeonId]) -> DungeonSet {
    ids.iter().copied().collect()
}

/// Request handler over a fresh engine with a recording publisher
pub fn create_test_handler() -> (LfgRequestHandler, SharedEngine, Arc<MockEventPublisher>) {
    let manager = LfgManager::new(
        LfgConfig::default(),
        Arc::new(create_test_catalog()),
        InMemoryWorld::new(),
        Arc::new(ManualClock::new(Utc::now())),
    );
    let engine: SharedEngine = Arc::new(tokio::sync::Mutex::new(manager));
    let publisher = Arc::new(MockEventPublisher::new());
    let metrics = Arc::new(MetricsCollector::new().expect("Failed to create metrics collector"));
    let handler = LfgRequestHandler::new(engine.clone(), publisher.clone(), metrics);
    (handler, engine, publisher)
}
