//! Persistence of dungeon finder group progress

pub mod storage;

pub use storage::{GroupRecord, InMemoryLfgStore, LfgStore};
