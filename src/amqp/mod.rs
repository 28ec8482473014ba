//! AMQP integration for the dungeon finder service
//!
//! This module handles the broker connection, decoding of inbound requests
//! and publishing of engine notifications.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

// Re-export commonly used types
pub use connection::{AmqpConfig, AmqpConnection};
pub use handlers::{LfgRequestConsumer, MessageHandler};
pub use messages::*;
pub use publisher::{AmqpEventPublisher, EventPublisher, MockEventPublisher, PublisherConfig};
