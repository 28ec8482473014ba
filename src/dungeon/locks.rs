//! Per-dungeon eligibility locks
//!
//! A lock is the first disqualifying condition found for a dungeon, checked
//! in a fixed order. Unlocked dungeons are simply absent from the lock map.

use super::catalog::{DungeonCatalog, DungeonDefinition, Holiday};
use crate::types::{Difficulty, DungeonId, Team};
use crate::world::PlayerSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Locks keyed by dungeon entry
pub type LockMap = BTreeMap<u32, LockReason>;

/// Why a player cannot queue for a dungeon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockReason {
    PermissionDenied,
    InsufficientExpansion,
    MapDisabled,
    LfgMapDisabled,
    InstanceBound,
    TooLowLevel,
    TooHighLevel,
    NotInSeason,
    TooLowGearScore,
    MissingAchievement,
    QuestNotCompleted,
    MissingItem,
}

impl LockReason {
    /// Status code understood by clients
    pub fn code(&self) -> u32 {
        match self {
            LockReason::PermissionDenied
            | LockReason::MapDisabled
            | LockReason::LfgMapDisabled
            | LockReason::InstanceBound => 6,
            LockReason::InsufficientExpansion => 1,
            LockReason::TooLowLevel => 2,
            LockReason::TooHighLevel => 3,
            LockReason::TooLowGearScore => 4,
            LockReason::MissingAchievement => 34,
            LockReason::QuestNotCompleted => 1022,
            LockReason::MissingItem => 1025,
            LockReason::NotInSeason => 1031,
        }
    }
}

/// True when the holiday backing a seasonal dungeon is running
pub fn is_season_active(dungeon_id: DungeonId, holiday_active: impl Fn(Holiday) -> bool) -> bool {
    Holiday::for_dungeon(dungeon_id)
        .map(holiday_active)
        .unwrap_or(false)
}

/// First lock that applies to `dungeon` for `player`, if any
pub fn dungeon_lock(
    catalog: &DungeonCatalog,
    dungeon: &DungeonDefinition,
    player: &PlayerSnapshot,
    holiday_active: impl Fn(Holiday) -> bool,
) -> Option<LockReason> {
    if !player.can_join_dungeon_finder {
        return Some(LockReason::PermissionDenied);
    }
    if dungeon.expansion > player.expansion {
        return Some(LockReason::InsufficientExpansion);
    }
    if catalog.is_map_disabled(dungeon.map_id) {
        return Some(LockReason::MapDisabled);
    }
    if catalog.is_lfg_map_disabled(dungeon.map_id) {
        return Some(LockReason::LfgMapDisabled);
    }
    if dungeon.difficulty > Difficulty::Normal
        && player
            .bound_instance(dungeon.map_id, dungeon.difficulty)
            .is_some()
    {
        return Some(LockReason::InstanceBound);
    }
    if dungeon.min_level > player.level {
        return Some(LockReason::TooLowLevel);
    }
    if dungeon.max_level < player.level {
        return Some(LockReason::TooHighLevel);
    }
    if dungeon.seasonal && !is_season_active(dungeon.id, holiday_active) {
        return Some(LockReason::NotInSeason);
    }

    let requirement = catalog.access_requirement(dungeon.map_id, dungeon.difficulty)?;

    if requirement.item_level > 0 && player.average_item_level < f32::from(requirement.item_level)
    {
        return Some(LockReason::TooLowGearScore);
    }
    if requirement.achievement != 0 && !player.achievements.contains(&requirement.achievement) {
        return Some(LockReason::MissingAchievement);
    }

    let faction_quest = match player.team {
        Team::Alliance => requirement.quest_alliance,
        Team::Horde => requirement.quest_horde,
    };
    if faction_quest != 0 && !player.rewarded_quests.contains(&faction_quest) {
        return Some(LockReason::QuestNotCompleted);
    }

    // either of the two items unlocks the map
    let has = |item: u32| item != 0 && player.items.contains(&item);
    let needs_item = requirement.item != 0 || requirement.item2 != 0;
    if needs_item && !has(requirement.item) && !has(requirement.item2) {
        return Some(LockReason::MissingItem);
    }

    None
}

/// Lock map over every dungeon in the catalog
pub fn locked_dungeons(
    catalog: &DungeonCatalog,
    player: &PlayerSnapshot,
    holiday_active: impl Fn(Holiday) -> bool,
) -> LockMap {
    catalog
        .dungeons()
        .filter_map(|dungeon| {
            dungeon_lock(catalog, dungeon, player, &holiday_active)
                .map(|reason| (dungeon.entry(), reason))
        })
        .collect()
}
