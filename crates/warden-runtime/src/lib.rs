//! # warden-runtime
//!
//! Moderated turn execution.
//!
//! A turn runs one [`orchestrator::TurnOrchestrator`] per policy bundle. Each
//! run asks the [`gate::DecisionGate`] for an allow/block decision and, when
//! allowed, streams the task agent through a [`executor::RunExecutor`]. The
//! [`multiplexer::CompareMultiplexer`] runs the bundles concurrently and
//! merges their events into one [`multiplexer::TurnStream`];
//! [`conversation::ConversationState`] commits each run's terminal outcome.
//! [`service::TurnService`] is the entry point used by the server.

#![deny(unsafe_code)]

pub mod conversation;
pub mod errors;
pub mod executor;
pub mod gate;
pub mod multiplexer;
pub mod orchestrator;
pub mod prompts;
pub mod registry;
pub mod service;
pub mod sink;
pub mod state;

pub use errors::{RunError, TurnError};
pub use multiplexer::TurnStream;
pub use orchestrator::{RuntimeOptions, TurnDeps};
pub use service::{TurnRequest, TurnService};
pub use state::TurnState;
