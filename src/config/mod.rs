//! Configuration management for the dungeon finder service
//!
//! This module handles configuration loading from TOML files and environment
//! variables, validation, and default values.

pub mod app;
pub mod lfg;

// Re-export commonly used types
pub use app::{validate_config, AmqpSettings, AppConfig, ServiceSettings};
pub use lfg::{LfgConfig, OPTION_ENABLE_DUNGEON_FINDER, OPTION_ENABLE_RAID_BROWSER};
