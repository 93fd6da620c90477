//! # warden-core
//!
//! Foundation types shared by every Warden crate.
//!
//! - **Branded IDs**: `ThreadId`, `MessageId`, `RunId`, `TurnId` as newtypes, plus
//!   the human-chosen [`ids::RunTag`] that names a policy bundle
//! - **Messages**: [`messages::Message`] with `human` / `agent` / `tool_result` /
//!   `system` roles, text or structured content, and an optional run stamp
//! - **Policy configuration**: [`policy::RunConfig`] and [`policy::PolicyBundle`]
//! - **Decisions**: [`policy::Decision`], the allow/block artifact of a gate run
//! - **Events**: [`events::ModelEvent`] (what a model stream yields) and
//!   [`events::RunEvent`] (what a client receives)
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod events;
pub mod ids;
pub mod logging;
pub mod messages;
pub mod policy;
