//! Performance benchmarks for role assignment and queue matching

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dungeon_finder::amqp::{LfgRequest, MockEventPublisher};
use dungeon_finder::config::LfgConfig;
use dungeon_finder::dungeon::{DungeonCatalog, DungeonDefinition, Position};
use dungeon_finder::lfg::{check_group_roles, LfgManager, RoleComposition};
use dungeon_finder::metrics::MetricsCollector;
use dungeon_finder::service::{LfgRequestHandler, SharedEngine};
use dungeon_finder::types::{Difficulty, DungeonSet, LfgType, PlayerClass, PlayerId, Roles};
use dungeon_finder::utils::ManualClock;
use dungeon_finder::world::{InMemoryWorld, PlayerSnapshot};
use std::collections::BTreeMap;
use std::sync::Arc;

fn create_bench_catalog() -> DungeonCatalog {
    let dungeon = |id: u32, lfg_type: LfgType| DungeonDefinition {
        id,
        name: format!("Dungeon {}", id),
        map_id: if lfg_type == LfgType::Random { 0 } else { 500 + id },
        lfg_type,
        expansion: 2,
        group: 1,
        min_level: 70,
        max_level: 80,
        difficulty: Difficulty::Heroic,
        seasonal: false,
        entrance: Position::default(),
    };
    DungeonCatalog::new(
        std::iter::once(dungeon(42, LfgType::Random))
            .chain((43..55).map(|id| dungeon(id, LfgType::Heroic))),
    )
}

/// Every fifth player tanks, every fifth heals, the rest mix in damage
fn bench_roles(id: u64) -> Roles {
    match id % 5 {
        0 => Roles::TANK,
        1 => Roles::HEALER,
        2 => Roles::TANK | Roles::DAMAGE,
        3 => Roles::HEALER | Roles::DAMAGE,
        _ => Roles::DAMAGE,
    }
}

fn create_bench_manager(players: u64) -> LfgManager<InMemoryWorld> {
    let mut world = InMemoryWorld::new();
    for id in 1..=players {
        world.upsert_player(PlayerSnapshot {
            id: PlayerId(id),
            class: PlayerClass::Druid,
            ..Default::default()
        });
    }
    LfgManager::new(
        LfgConfig::default(),
        Arc::new(create_bench_catalog()),
        world,
        Arc::new(ManualClock::new(Utc::now())),
    )
}

fn bench_role_assignment(c: &mut Criterion) {
    let composition = RoleComposition::new(1, 1, 3);
    let flexible: BTreeMap<PlayerId, Roles> = (1..=5)
        .map(|id| (PlayerId(id), Roles::TANK | Roles::HEALER | Roles::DAMAGE))
        .collect();
    let fixed: BTreeMap<PlayerId, Roles> = (1..=5)
        .map(|id| (PlayerId(id), bench_roles(id)))
        .collect();

    c.bench_function("role_assignment_all_flexible", |b| {
        b.iter(|| black_box(check_group_roles(black_box(&flexible), composition)))
    });
    c.bench_function("role_assignment_mixed", |b| {
        b.iter(|| black_box(check_group_roles(black_box(&fixed), composition)))
    });
}

fn bench_queue_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_matching");

    for players in [25u64, 100, 400] {
        group.bench_with_input(BenchmarkId::from_parameter(players), &players, |b, &players| {
            b.iter_with_setup(
                || {
                    let mut manager = create_bench_manager(players);
                    for id in 1..=players {
                        let dungeons: DungeonSet = if id % 3 == 0 {
                            [42].into_iter().collect()
                        } else {
                            [43 + (id % 12) as u32].into_iter().collect()
                        };
                        manager.join_lfg(PlayerId(id), bench_roles(id), dungeons, "");
                    }
                    manager.drain_events();
                    manager
                },
                |mut manager| black_box(manager.find_groups()),
            )
        });
    }

    group.finish();
}

fn bench_request_handling(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("join_request", |b| {
        b.iter_with_setup(
            || {
                let engine: SharedEngine =
                    Arc::new(tokio::sync::Mutex::new(create_bench_manager(1)));
                LfgRequestHandler::new(
                    engine,
                    Arc::new(MockEventPublisher::new()),
                    Arc::new(MetricsCollector::new().unwrap()),
                )
            },
            |handler| {
                rt.block_on(async {
                    black_box(
                        handler
                            .apply(LfgRequest::Join {
                                player_id: PlayerId(1),
                                roles: Roles::DAMAGE,
                                dungeons: vec![42],
                                comment: String::new(),
                            })
                            .await,
                    )
                })
            },
        )
    });
}

criterion_group!(
    benches,
    bench_role_assignment,
    bench_queue_matching,
    bench_request_handling
);
criterion_main!(benches);
