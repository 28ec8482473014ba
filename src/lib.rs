//! Dungeon Finder - group matchmaking for five-player dungeons
//!
//! This crate queues players and parties by role and dungeon, runs role
//! checks, proposes matches, forms groups, handles vote kicks and hands out
//! random dungeon rewards. Requests arrive over AMQP and notifications are
//! published back to the world servers.

pub mod amqp;
pub mod config;
pub mod dungeon;
pub mod error;
pub mod lfg;
pub mod metrics;
pub mod persistence;
pub mod service;
pub mod types;
pub mod utils;
pub mod wait_time;
pub mod world;

// Re-export commonly used types and traits
pub use error::{LfgError, Result};
pub use types::*;

// Re-export key components
pub use amqp::publisher::EventPublisher;
pub use dungeon::DungeonCatalog;
pub use lfg::LfgManager;
pub use world::{InMemoryWorld, World};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
