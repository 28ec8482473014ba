//! Dungeon catalog
//!
//! Immutable lookup of dungeon definitions, random-dungeon groupings, reward
//! tiers and access requirements. Built once by the loader and shared
//! read-only by the engine.

use crate::types::{Difficulty, DungeonId, DungeonSet, LfgType};
use crate::utils::dungeon_id_from_entry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Point in a map
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    #[serde(default)]
    pub orientation: f32,
}

impl Position {
    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }
}

/// A dungeon the finder can send groups to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DungeonDefinition {
    pub id: DungeonId,
    pub name: String,
    pub map_id: u32,
    pub lfg_type: LfgType,
    pub expansion: u8,
    /// Random-selection bucket; 0 means not reachable through a random entry
    pub group: u32,
    pub min_level: u8,
    pub max_level: u8,
    pub difficulty: Difficulty,
    pub seasonal: bool,
    pub entrance: Position,
}

impl DungeonDefinition {
    /// Client facing entry: id in the low 24 bits, type in the high byte
    pub fn entry(&self) -> u32 {
        self.id | (self.lfg_type.code() << 24)
    }

    pub fn is_random(&self) -> bool {
        self.lfg_type == LfgType::Random
    }

    /// Random and seasonal selections pay out rewards on completion
    pub fn is_rewarding(&self) -> bool {
        self.is_random() || self.seasonal
    }
}

/// Reward tier for completing a random or seasonal dungeon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LfgReward {
    pub max_level: u8,
    pub first_quest: u32,
    /// 0 when the tier has no repeat reward
    pub other_quest: u32,
}

/// Entry requirements for a map at a difficulty
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessRequirement {
    pub map_id: u32,
    pub difficulty: Difficulty,
    pub item_level: u16,
    pub achievement: u32,
    pub quest_alliance: u32,
    pub quest_horde: u32,
    pub item: u32,
    pub item2: u32,
}

/// World events gating seasonal dungeons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Holiday {
    HallowsEnd,
    FireFestival,
    Brewfest,
    LoveIsInTheAir,
}

impl Holiday {
    /// Holiday a seasonal dungeon belongs to
    pub fn for_dungeon(dungeon_id: DungeonId) -> Option<Holiday> {
        match dungeon_id {
            285 => Some(Holiday::HallowsEnd),     // The Headless Horseman
            286 => Some(Holiday::FireFestival),   // The Frost Lord Ahune
            287 => Some(Holiday::Brewfest),       // Coren Direbrew
            288 => Some(Holiday::LoveIsInTheAir), // The Crown Chemical Co.
            _ => None,
        }
    }
}

/// Read-only dungeon lookup shared by the engine
#[derive(Debug, Clone, Default)]
pub struct DungeonCatalog {
    dungeons: BTreeMap<DungeonId, DungeonDefinition>,
    random_groups: BTreeMap<u32, DungeonSet>,
    rewards: BTreeMap<DungeonId, Vec<LfgReward>>,
    access: HashMap<(u32, Difficulty), AccessRequirement>,
    disabled_maps: BTreeSet<u32>,
    lfg_disabled_maps: BTreeSet<u32>,
}

impl DungeonCatalog {
    /// Build a catalog and its random-group cache
    ///
    /// Every dungeon lands in bucket 0; dungeons with a non-zero group key
    /// also land in the bucket for that key, random entries included.
    pub fn new(dungeons: impl IntoIterator<Item = DungeonDefinition>) -> Self {
        let mut catalog = Self::default();
        for dungeon in dungeons {
            if dungeon.group != 0 {
                catalog
                    .random_groups
                    .entry(dungeon.group)
                    .or_default()
                    .insert(dungeon.id);
            }
            catalog.random_groups.entry(0).or_default().insert(dungeon.id);
            catalog.dungeons.insert(dungeon.id, dungeon);
        }
        catalog
    }

    /// Add a reward tier, keeping tiers sorted by max level
    pub fn add_reward(&mut self, dungeon_id: DungeonId, reward: LfgReward) {
        let tiers = self.rewards.entry(dungeon_id).or_default();
        let at = tiers.partition_point(|tier| tier.max_level <= reward.max_level);
        tiers.insert(at, reward);
    }

    pub fn add_access_requirement(&mut self, requirement: AccessRequirement) {
        self.access
            .insert((requirement.map_id, requirement.difficulty), requirement);
    }

    pub fn disable_map(&mut self, map_id: u32) {
        self.disabled_maps.insert(map_id);
    }

    pub fn disable_lfg_map(&mut self, map_id: u32) {
        self.lfg_disabled_maps.insert(map_id);
    }

    pub fn get_dungeon(&self, id: DungeonId) -> Option<&DungeonDefinition> {
        self.dungeons.get(&id)
    }

    pub fn dungeon_type(&self, id: DungeonId) -> Option<LfgType> {
        self.get_dungeon(id).map(|dungeon| dungeon.lfg_type)
    }

    /// Client entry for a dungeon id, 0 when unknown
    pub fn entry(&self, id: DungeonId) -> u32 {
        self.get_dungeon(id).map(|dungeon| dungeon.entry()).unwrap_or(0)
    }

    pub fn dungeons(&self) -> impl Iterator<Item = &DungeonDefinition> {
        self.dungeons.values()
    }

    pub fn len(&self) -> usize {
        self.dungeons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dungeons.is_empty()
    }

    /// Dungeons reachable through a random entry; an unknown id or a group key
    /// of 0 yields every dungeon
    pub fn dungeons_by_random(&self, random_id: DungeonId) -> DungeonSet {
        let group = self
            .get_dungeon(random_id)
            .map(|dungeon| dungeon.group)
            .unwrap_or(0);
        self.random_groups.get(&group).cloned().unwrap_or_default()
    }

    /// First reward tier whose max level covers `level`
    pub fn random_dungeon_reward(&self, dungeon: u32, level: u8) -> Option<&LfgReward> {
        self.rewards
            .get(&dungeon_id_from_entry(dungeon))?
            .iter()
            .find(|tier| tier.max_level >= level)
    }

    pub fn reward_tiers(&self, dungeon_id: DungeonId) -> &[LfgReward] {
        self.rewards
            .get(&dungeon_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn access_requirement(
        &self,
        map_id: u32,
        difficulty: Difficulty,
    ) -> Option<&AccessRequirement> {
        self.access.get(&(map_id, difficulty))
    }

    pub fn is_map_disabled(&self, map_id: u32) -> bool {
        self.disabled_maps.contains(&map_id)
    }

    pub fn is_lfg_map_disabled(&self, map_id: u32) -> bool {
        self.lfg_disabled_maps.contains(&map_id)
    }

    /// Entries of random dungeons and in-season seasonal dungeons available
    /// at the given level and expansion
    pub fn random_and_seasonal_dungeons(
        &self,
        level: u8,
        expansion: u8,
        is_season_active: impl Fn(DungeonId) -> bool,
    ) -> BTreeSet<u32> {
        self.dungeons
            .values()
            .filter(|d| d.is_random() || (d.seasonal && is_season_active(d.id)))
            .filter(|d| d.expansion <= expansion && d.min_level <= level && level <= d.max_level)
            .map(|d| d.entry())
            .collect()
    }
}
