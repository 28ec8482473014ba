//! Service layer for the dungeon finder
//!
//! This module contains the application state, the request handler that
//! drives the engine and the health checks used by the HTTP probes.

pub mod app;
pub mod health;

pub use app::{AppState, LfgRequestHandler, ServiceError, SharedEngine};
pub use health::{HealthCheck, HealthStatus, ServiceProbe};
