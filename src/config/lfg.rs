//! Dungeon finder engine tuning

use crate::error::LfgError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Dungeon finder is enabled
pub const OPTION_ENABLE_DUNGEON_FINDER: u32 = 0x01;
/// Raid browser is enabled
pub const OPTION_ENABLE_RAID_BROWSER: u32 = 0x02;

/// Timeouts, vote thresholds and group composition for the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LfgConfig {
    /// Seconds a group has to finish its role check
    pub role_check_timeout_seconds: u64,
    /// Seconds members have to answer a proposal
    pub proposal_timeout_seconds: u64,
    /// Seconds a vote kick stays open
    pub boot_timeout_seconds: u64,
    /// Agree votes that pass a vote kick
    pub kick_votes_needed: u8,
    /// Vote kicks a group may pass
    pub max_kicks: u8,
    pub tanks_needed: u8,
    pub healers_needed: u8,
    pub dps_needed: u8,
    /// Interval between queue status broadcasts
    pub queue_update_interval_ms: u64,
    /// Put both factions in one queue
    pub cross_faction: bool,
    /// Bitmask of OPTION_ENABLE_* flags
    pub options: u32,
    /// Highest reachable player level, used to clamp reward rows
    pub max_player_level: u8,
}

impl Default for LfgConfig {
    fn default() -> Self {
        Self {
            role_check_timeout_seconds: 45,
            proposal_timeout_seconds: 45,
            boot_timeout_seconds: 120,
            kick_votes_needed: 3,
            max_kicks: 3,
            tanks_needed: 1,
            healers_needed: 1,
            dps_needed: 3,
            queue_update_interval_ms: 15_000,
            cross_faction: false,
            options: OPTION_ENABLE_DUNGEON_FINDER | OPTION_ENABLE_RAID_BROWSER,
            max_player_level: 80,
        }
    }
}

impl LfgConfig {
    /// Members of a full dungeon group
    pub fn max_group_size(&self) -> usize {
        (self.tanks_needed + self.healers_needed + self.dps_needed) as usize
    }

    pub fn role_check_timeout(&self) -> Duration {
        Duration::from_secs(self.role_check_timeout_seconds)
    }

    pub fn proposal_timeout(&self) -> Duration {
        Duration::from_secs(self.proposal_timeout_seconds)
    }

    pub fn boot_timeout(&self) -> Duration {
        Duration::from_secs(self.boot_timeout_seconds)
    }

    /// Validate engine settings
    pub fn validate(&self) -> Result<(), LfgError> {
        if self.role_check_timeout_seconds == 0
            || self.proposal_timeout_seconds == 0
            || self.boot_timeout_seconds == 0
        {
            return Err(LfgError::ConfigurationError {
                message: "LFG timeouts must be greater than 0".to_string(),
            });
        }

        if self.max_group_size() == 0 {
            return Err(LfgError::ConfigurationError {
                message: "Group composition must require at least one member".to_string(),
            });
        }

        if self.kick_votes_needed == 0 || self.kick_votes_needed as usize > self.max_group_size() {
            return Err(LfgError::ConfigurationError {
                message: format!(
                    "Kick votes needed must be between 1 and {}, got {}",
                    self.max_group_size(),
                    self.kick_votes_needed
                ),
            });
        }

        if self.queue_update_interval_ms == 0 {
            return Err(LfgError::ConfigurationError {
                message: "Queue update interval must be greater than 0".to_string(),
            });
        }

        if self.max_player_level == 0 {
            return Err(LfgError::ConfigurationError {
                message: "Max player level must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}
