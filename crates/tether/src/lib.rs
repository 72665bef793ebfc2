//! Tether - session synchronization for AI coding agents.
//!
//! Tether replicates locally generated conversation state (message logs,
//! task metadata, working-tree git state) to a remote session service,
//! incrementally and idempotently, and can reverse the process to rebuild
//! a local workspace from a previously synced session.

pub mod auth;
pub mod client;
pub mod config;
pub mod git;
pub mod patch;
pub mod providers;
pub mod store;
pub mod sync;
