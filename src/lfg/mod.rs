//! Dungeon finder matchmaking
//!
//! This module contains the engine proper: per-entity state, the role
//! solver, the queues, role checks, proposals, vote kicks, group formation
//! and dungeon completion.

pub mod boot;
pub mod completion;
pub mod formation;
pub mod manager;
pub mod proposal;
pub mod queue;
pub mod role_check;
pub mod roles;
pub mod state;

// Re-export main types
pub use boot::{BootStart, PlayerBoot};
pub use manager::{LfgManager, LfgOutcome, LfgStatus, QueueSizes, TickReport};
pub use proposal::{Proposal, ProposalPlayer};
pub use queue::{LfgQueue, QueueEntry, QueueKey};
pub use role_check::RoleCheck;
pub use roles::{check_group_roles, RoleComposition};
pub use state::{GroupData, PlayerData, StateStore};
