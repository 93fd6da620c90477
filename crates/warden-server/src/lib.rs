//! # warden-server
//!
//! Axum HTTP surface for the turn service.
//!
//! - `POST /v1/turns` streams every run event of a turn as server-sent events
//! - `POST /v1/turns/{turn_id}/abort` cancels a live turn
//! - `GET /v1/threads/{thread_id}` reads a persisted thread
//! - `GET /health` reports uptime and live turns
//! - Graceful shutdown via a shared `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod server;
pub mod shutdown;
pub mod sse;

pub use config::ServerConfig;
pub use errors::ApiError;
pub use server::WardenServer;
pub use shutdown::ShutdownCoordinator;
