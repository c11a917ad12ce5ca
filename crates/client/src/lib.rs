//! Async synchronization core for a sodalite conversion service.
//!
//! Reconciles the push channel (statistics, liveness) and REST polling
//! (per-job status) into one [`store::StateStore`] that a rendering layer
//! reads and subscribes to. [`session::SyncSession`] wires the pieces
//! together and owns their lifecycle.

pub mod api;
pub mod client;
pub mod config;
pub mod connection;
pub mod liveness;
pub mod messages;
pub mod registry;
pub mod session;
pub mod store;
