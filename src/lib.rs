//! Library crate for number-rush-back, exposing modules for binaries and integration tests.

/// Time sources and boundary arithmetic.
pub mod clock;
/// Runtime configuration loaded from disk.
pub mod config;
/// Persistence layer.
pub mod dao;
/// Wire shapes for HTTP responses, WebSocket messages and pushed events.
pub mod dto;
/// Error types shared by services and routes.
pub mod error;
/// HTTP and WebSocket route trees.
pub mod routes;
/// Scheduler, participation gateway and route-facing services.
pub mod services;
/// Shared application state.
pub mod state;
