//! Statistical tracking for wait times
//!
//! Running wait statistics bucketed by the role a player was matched as and
//! the dungeon they were queued for. Only used for the estimates shown in
//! queue status updates.

use crate::types::{DungeonId, Roles};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Running average of the waits recorded for one bucket
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaitTimeStats {
    pub sample_count: u64,
    /// Average wait so far, in seconds
    pub average_seconds: f64,
    /// Longest wait seen, in seconds
    pub longest_seconds: f64,
}

impl WaitTimeStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one more matched wait into the average
    pub fn add_sample(&mut self, wait_time: Duration) {
        let seconds = wait_time.as_secs_f64();
        let previous = self.sample_count as f64;

        self.sample_count += 1;
        self.average_seconds = (self.average_seconds * previous + seconds) / (previous + 1.0);
        self.longest_seconds = self.longest_seconds.max(seconds);
    }

    pub fn mean(&self) -> Duration {
        Duration::from_secs_f64(self.average_seconds.max(0.0))
    }

    pub fn longest(&self) -> Duration {
        Duration::from_secs_f64(self.longest_seconds)
    }
}

/// Role bucket a wait sample is filed under
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitRole {
    Tank,
    Healer,
    Damage,
    /// Players that were not pinned to a single role
    Average,
}

impl WaitRole {
    /// Bucket for a role mask; the leader flag is ignored
    pub fn from_roles(roles: Roles) -> Self {
        let combat = roles.combat();
        if combat == Roles::TANK {
            WaitRole::Tank
        } else if combat == Roles::HEALER {
            WaitRole::Healer
        } else if combat == Roles::DAMAGE {
            WaitRole::Damage
        } else {
            WaitRole::Average
        }
    }
}

/// Key for identifying different wait time categories
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsKey {
    pub role: WaitRole,
    pub dungeon_id: DungeonId,
}

impl StatsKey {
    pub fn new(role: WaitRole, dungeon_id: DungeonId) -> Self {
        Self { role, dungeon_id }
    }
}

/// Per-queue wait statistics
#[derive(Debug, Clone, Default)]
pub struct WaitTimeTracker {
    stats: HashMap<StatsKey, WaitTimeStats>,
}

impl WaitTimeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a wait time sample
    pub fn record_wait_time(&mut self, key: StatsKey, wait_time: Duration) {
        self.stats.entry(key).or_default().add_sample(wait_time);
    }

    /// Get statistics for a specific category
    pub fn get_stats(&self, key: &StatsKey) -> Option<&WaitTimeStats> {
        self.stats.get(key)
    }

    /// Mean wait in whole seconds, -1 when nothing was recorded yet
    pub fn estimate_seconds(&self, role: WaitRole, dungeon_id: DungeonId) -> i64 {
        self.get_stats(&StatsKey::new(role, dungeon_id))
            .filter(|stats| stats.sample_count > 0)
            .map(|stats| stats.mean().as_secs() as i64)
            .unwrap_or(-1)
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Clear all statistics
    pub fn clear(&mut self) {
        self.stats.clear();
    }
}
