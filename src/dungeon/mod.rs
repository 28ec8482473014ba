//! Dungeon catalog, data loading and lock evaluation

pub mod catalog;
pub mod loader;
pub mod locks;

pub use catalog::{
    AccessRequirement, DungeonCatalog, DungeonDefinition, Holiday, LfgReward, Position,
};
pub use loader::{load_catalog, parse_catalog};
pub use locks::{dungeon_lock, is_season_active, locked_dungeons, LockMap, LockReason};
