//! Error types for the dungeon finder service
//!
//! Plumbing (configuration, data loading, AMQP, HTTP) returns `anyhow` results.
//! Matchmaking outcomes such as refused joins or expired votes are not errors;
//! they travel as result codes inside [`crate::types::LfgEvent`] notifications.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific dungeon finder scenarios
#[derive(Debug, thiserror::Error)]
pub enum LfgError {
    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Dungeon not found: {dungeon_id}")]
    DungeonNotFound { dungeon_id: u32 },

    #[error("Player not found: {player_id}")]
    PlayerNotFound { player_id: String },

    #[error("Group not found: {group_id}")]
    GroupNotFound { group_id: String },

    #[error("Dungeon data error: {message}")]
    DataLoadError { message: String },

    #[error("Persistence error: {message}")]
    PersistenceError { message: String },

    #[error("Serialization error: {message}")]
    SerializationError { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}
