//! Service liveness derived from two independent signal sources.
//!
//! The REST probe and the push channel each hold one boolean. The public
//! online flag is their OR, and "connecting" is a one-shot latch that
//! drops the first time either source reports a positive signal. Neither
//! source can ever push the state back to connecting.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// Aggregate counters broadcast by the service over the push channel.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub heartbeats: u64,
    pub connected_clients: u64,
    pub total_conversions: u64,
    pub total_bandwidth_mb: f64,
}

/// Read model of service liveness.
///
/// `is_online` and `is_connecting` are never both true; both false means
/// offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessState {
    pub is_online: bool,
    pub is_connecting: bool,
    /// Time of the last positive signal. Never moves backwards and is not
    /// touched by failures.
    pub last_seen: Option<Timestamp>,
    pub statistics: Option<Statistics>,
}

impl Default for LivenessState {
    fn default() -> Self {
        Self {
            is_online: false,
            is_connecting: true,
            last_seen: None,
            statistics: None,
        }
    }
}

impl LivenessState {
    pub fn is_offline(&self) -> bool {
        !self.is_online && !self.is_connecting
    }

    pub fn label(&self) -> &'static str {
        if self.is_online {
            "online"
        } else if self.is_connecting {
            "connecting"
        } else {
            "offline"
        }
    }
}

/// A single observation from either source.
#[derive(Debug, Clone, PartialEq)]
pub enum LivenessSignal {
    ProbeSucceeded,
    ProbeFailed,
    ChannelConnected,
    ChannelDisconnected,
    /// Any inbound push frame without a payload of interest (keep-alive).
    ChannelFrame,
    ChannelStats(Statistics),
}

impl LivenessSignal {
    fn is_positive(&self) -> bool {
        !matches!(
            self,
            LivenessSignal::ProbeFailed | LivenessSignal::ChannelDisconnected
        )
    }
}

/// Folds [`LivenessSignal`]s into a [`LivenessState`].
#[derive(Debug, Clone, Default)]
pub struct LivenessTracker {
    probe_ok: bool,
    channel_connected: bool,
    ever_online: bool,
    last_seen: Option<Timestamp>,
    statistics: Option<Statistics>,
}

impl LivenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one signal observed at `now`.
    pub fn record(&mut self, signal: LivenessSignal, now: Timestamp) {
        if signal.is_positive() {
            self.ever_online = true;
            // Clock skew between tasks must not rewind the timestamp.
            self.last_seen = Some(match self.last_seen {
                Some(prev) if prev > now => prev,
                _ => now,
            });
        }

        match signal {
            LivenessSignal::ProbeSucceeded => self.probe_ok = true,
            LivenessSignal::ProbeFailed => self.probe_ok = false,
            LivenessSignal::ChannelConnected | LivenessSignal::ChannelFrame => {
                self.channel_connected = true
            }
            LivenessSignal::ChannelDisconnected => self.channel_connected = false,
            LivenessSignal::ChannelStats(stats) => {
                // A frame can only arrive over a live connection.
                self.channel_connected = true;
                self.statistics = Some(stats);
            }
        }
    }

    pub fn state(&self) -> LivenessState {
        let is_online = self.probe_ok || self.channel_connected;
        LivenessState {
            is_online,
            is_connecting: !self.ever_online,
            last_seen: self.last_seen,
            statistics: self.statistics.clone(),
        }
    }
}
