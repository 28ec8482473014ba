//! Group progress storage interface and implementations
//!
//! Dungeon finder groups outlive a service restart: the dungeon a group was
//! sent to and whether it already finished are kept here and reloaded when
//! the group shows up again.

use crate::error::{LfgError, Result};
use crate::types::{DungeonId, GroupId, LfgState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Stored association between a group and its dungeon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub group_id: GroupId,
    pub dungeon_id: DungeonId,
    pub state: LfgState,
    pub last_updated: DateTime<Utc>,
}

impl GroupRecord {
    pub fn new(group_id: GroupId, dungeon_id: DungeonId, state: LfgState) -> Self {
        Self {
            group_id,
            dungeon_id,
            state,
            last_updated: Utc::now(),
        }
    }
}

/// Trait for group progress storage operations
pub trait LfgStore: Send + Sync {
    /// Store or replace the record for a group
    fn save_group(&self, record: GroupRecord) -> Result<()>;

    fn load_group(&self, group_id: GroupId) -> Result<Option<GroupRecord>>;

    /// Remove a group's record; true when one existed
    fn delete_group(&self, group_id: GroupId) -> Result<bool>;

    fn group_count(&self) -> Result<usize>;
}

/// In-memory group storage
#[derive(Debug, Default)]
pub struct InMemoryLfgStore {
    groups: RwLock<HashMap<GroupId, GroupRecord>>,
}

impl InMemoryLfgStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LfgStore for InMemoryLfgStore {
    fn save_group(&self, record: GroupRecord) -> Result<()> {
        let mut groups = self
            .groups
            .write()
            .map_err(|_| LfgError::PersistenceError {
                message: "Failed to acquire groups write lock".to_string(),
            })?;

        groups.insert(record.group_id, record);
        Ok(())
    }

    fn load_group(&self, group_id: GroupId) -> Result<Option<GroupRecord>> {
        let groups = self.groups.read().map_err(|_| LfgError::PersistenceError {
            message: "Failed to acquire groups read lock".to_string(),
        })?;

        Ok(groups.get(&group_id).cloned())
    }

    fn delete_group(&self, group_id: GroupId) -> Result<bool> {
        let mut groups = self
            .groups
            .write()
            .map_err(|_| LfgError::PersistenceError {
                message: "Failed to acquire groups write lock".to_string(),
            })?;

        Ok(groups.remove(&group_id).is_some())
    }

    fn group_count(&self) -> Result<usize> {
        let groups = self.groups.read().map_err(|_| LfgError::PersistenceError {
            message: "Failed to acquire groups read lock".to_string(),
        })?;

        Ok(groups.len())
    }
}
