//! Domain types and pure transition logic for the sodalite sync core.
//!
//! Nothing in this crate performs I/O. The async plumbing that feeds
//! these types lives in `sodalite-client`.

pub mod error;
pub mod job;
pub mod liveness;
pub mod types;
