//! Utility functions for the dungeon finder

use crate::types::{DungeonId, DungeonSet};
use chrono::{DateTime, Duration, Utc};
use std::sync::RwLock;

/// Mask selecting the dungeon id out of a dungeon entry
pub const DUNGEON_ID_MASK: u32 = 0x00FF_FFFF;

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Extract the dungeon id from a dungeon entry (`id | type << 24`)
pub fn dungeon_id_from_entry(entry: u32) -> DungeonId {
    entry & DUNGEON_ID_MASK
}

/// Render a dungeon set as a comma separated list for logs
pub fn concatenate_dungeons(dungeons: &DungeonSet) -> String {
    dungeons
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Whole seconds elapsed between two instants, never negative
pub fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    to.signed_duration_since(from).num_seconds().max(0)
}

/// Source of "now" for deadline bookkeeping
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        current_timestamp()
    }
}

/// Clock that only moves when told to, for tests and replays
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.write() {
            *now += by;
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut now) = self.now.write() {
            *now = to;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.read().map(|now| *now).unwrap_or_else(|e| *e.into_inner())
    }
}
