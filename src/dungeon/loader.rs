//! Loading dungeon data from TOML
//!
//! Invalid rows are logged and skipped or repaired rather than failing the
//! whole load, so one bad reward line cannot keep the finder offline.

use super::catalog::{AccessRequirement, DungeonCatalog, DungeonDefinition, LfgReward, Position};
use crate::error::{LfgError, Result};
use crate::types::{Difficulty, DungeonId, LfgType};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{error, info, warn};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DungeonDataFile {
    dungeon: Vec<DungeonRow>,
    entrance_trigger: Vec<EntranceTriggerRow>,
    reward: Vec<RewardRow>,
    access_requirement: Vec<AccessRequirement>,
    /// Quest ids known to the world; when empty quest ids are only checked for 0
    quests: BTreeSet<u32>,
    disabled_maps: Vec<u32>,
    lfg_disabled_maps: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct DungeonRow {
    id: DungeonId,
    name: String,
    #[serde(default)]
    map_id: u32,
    #[serde(rename = "type")]
    lfg_type: LfgType,
    #[serde(default)]
    expansion: u8,
    #[serde(default)]
    group: u32,
    min_level: u8,
    max_level: u8,
    #[serde(default)]
    difficulty: Difficulty,
    #[serde(default)]
    seasonal: bool,
    entrance: Option<Position>,
}

/// Fallback entrance for a map when a dungeon has no coordinates of its own
#[derive(Debug, Deserialize)]
struct EntranceTriggerRow {
    map_id: u32,
    target_map_id: u32,
    position: Position,
}

#[derive(Debug, Deserialize)]
struct RewardRow {
    dungeon_id: DungeonId,
    max_level: u8,
    first_quest: u32,
    #[serde(default)]
    other_quest: u32,
}

/// Load a catalog from a TOML file on disk
pub fn load_catalog(path: impl AsRef<Path>, max_player_level: u8) -> Result<DungeonCatalog> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| LfgError::DataLoadError {
        message: format!("Failed to read {}: {}", path.display(), e),
    })?;
    parse_catalog(&contents, max_player_level)
}

/// Build a catalog from TOML text
pub fn parse_catalog(contents: &str, max_player_level: u8) -> Result<DungeonCatalog> {
    let data: DungeonDataFile = toml::from_str(contents).map_err(|e| LfgError::DataLoadError {
        message: format!("Invalid dungeon data: {}", e),
    })?;

    let triggers: HashMap<u32, &EntranceTriggerRow> = data
        .entrance_trigger
        .iter()
        .map(|trigger| (trigger.map_id, trigger))
        .collect();

    let mut dungeons = Vec::with_capacity(data.dungeon.len());
    for row in data.dungeon {
        let mut definition = DungeonDefinition {
            id: row.id,
            name: row.name,
            map_id: row.map_id,
            lfg_type: row.lfg_type,
            expansion: row.expansion,
            group: row.group,
            min_level: row.min_level,
            max_level: row.max_level,
            difficulty: row.difficulty,
            seasonal: row.seasonal,
            entrance: row.entrance.unwrap_or_default(),
        };

        if !definition.is_random() && definition.entrance.is_zero() {
            match triggers.get(&definition.map_id) {
                Some(trigger) => {
                    definition.map_id = trigger.target_map_id;
                    definition.entrance = trigger.position;
                }
                None => {
                    error!(
                        "Failed to load dungeon {}, no entrance for map {}",
                        definition.name, definition.map_id
                    );
                    continue;
                }
            }
        }

        dungeons.push(definition);
    }

    let mut catalog = DungeonCatalog::new(dungeons);
    let quest_known =
        |quest: u32| quest != 0 && (data.quests.is_empty() || data.quests.contains(&quest));

    let mut rewards = 0;
    for row in data.reward {
        if catalog.get_dungeon(row.dungeon_id).is_none() {
            error!("Reward row for unknown dungeon {} skipped", row.dungeon_id);
            continue;
        }

        let mut max_level = row.max_level;
        if max_level == 0 || max_level > max_player_level {
            warn!(
                "Level {} for dungeon {} can never be reached, clamped to {}",
                max_level, row.dungeon_id, max_player_level
            );
            max_level = max_player_level;
        }

        if !quest_known(row.first_quest) {
            error!(
                "First quest {} for dungeon {} does not exist, row skipped",
                row.first_quest, row.dungeon_id
            );
            continue;
        }

        let mut other_quest = row.other_quest;
        if other_quest != 0 && !quest_known(other_quest) {
            warn!(
                "Other quest {} for dungeon {} does not exist, ignored",
                other_quest, row.dungeon_id
            );
            other_quest = 0;
        }

        catalog.add_reward(
            row.dungeon_id,
            LfgReward {
                max_level,
                first_quest: row.first_quest,
                other_quest,
            },
        );
        rewards += 1;
    }

    for requirement in data.access_requirement {
        catalog.add_access_requirement(requirement);
    }
    for map_id in data.disabled_maps {
        catalog.disable_map(map_id);
    }
    for map_id in data.lfg_disabled_maps {
        catalog.disable_lfg_map(map_id);
    }

    info!(
        "Loaded {} dungeons and {} reward tiers",
        catalog.len(),
        rewards
    );
    Ok(catalog)
}
