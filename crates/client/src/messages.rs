//! Push-channel frame types and parser.
//!
//! The service sends JSON text frames tagged by a `"type"` field, with
//! the payload fields inline: `{"type":"stats","heartbeats":3,...}` or a
//! bare keep-alive `{"type":"ping"}`.

use serde::Deserialize;
use sodalite_core::liveness::Statistics;

/// All known push-channel frames.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum PushFrame {
    /// Keep-alive; carries no payload.
    #[serde(rename = "ping")]
    Ping,

    /// Periodic service statistics.
    #[serde(rename = "stats")]
    Stats(Statistics),
}

/// Parse a push-channel text frame into a typed enum.
///
/// Returns `Err` for malformed JSON or unknown `type` values. Callers
/// should log and drop the frame.
pub fn parse_frame(text: &str) -> Result<PushFrame, serde_json::Error> {
    serde_json::from_str(text)
}
