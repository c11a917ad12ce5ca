//! Liveness monitor.
//!
//! Merges the push channel's [`ConnectionEvent`]s with a periodic REST
//! health probe and publishes the derived
//! [`LivenessState`](sodalite_core::liveness::LivenessState) into the
//! [`StateStore`]. The merge rules themselves live in
//! [`LivenessTracker`]; this module only drives it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, Fuse, FusedFuture, FutureExt};
use sodalite_core::liveness::{LivenessSignal, LivenessTracker};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::api::{SodaliteApiError, TaskService};
use crate::connection::ConnectionEvent;
use crate::store::StateStore;

/// Default interval between health probes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);

type ProbeFuture = Fuse<BoxFuture<'static, Result<(), SodaliteApiError>>>;

pub struct LivenessMonitor {
    service: Arc<dyn TaskService>,
    store: StateStore,
    tracker: LivenessTracker,
    cancel: CancellationToken,
}

impl LivenessMonitor {
    pub fn new(service: Arc<dyn TaskService>, store: StateStore, cancel: CancellationToken) -> Self {
        Self {
            service,
            store,
            tracker: LivenessTracker::new(),
            cancel,
        }
    }

    /// Probe on `interval` and fold `events` until cancelled.
    ///
    /// The first probe is issued immediately. At most one probe is in
    /// flight; push events keep being handled while it is pending.
    pub async fn run(mut self, mut events: broadcast::Receiver<ConnectionEvent>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let probe: ProbeFuture = Fuse::terminated();
        tokio::pin!(probe);
        let mut events_open = true;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick(), if probe.is_terminated() => {
                    let service = Arc::clone(&self.service);
                    probe.set(async move { service.health().await }.boxed().fuse());
                }
                result = &mut probe => self.record_probe(result),
                event = events.recv(), if events_open => match event {
                    Ok(event) => self.handle_event(event),
                    Err(RecvError::Lagged(skipped)) => {
                        // Every retained event sets the channel flag outright,
                        // so the newest one still wins.
                        tracing::warn!(skipped, "Liveness monitor lagged behind push events");
                    }
                    Err(RecvError::Closed) => {
                        tracing::debug!("Push event stream closed, continuing with probe only");
                        events_open = false;
                    }
                },
            }
        }

        tracing::debug!("Liveness monitor stopped");
    }

    /// Issue one probe and apply its result.
    pub async fn probe_once(&mut self) {
        let result = self.service.health().await;
        self.record_probe(result);
    }

    /// Fold one push-channel event.
    pub fn handle_event(&mut self, event: ConnectionEvent) {
        let signal = match event {
            ConnectionEvent::Connected => LivenessSignal::ChannelConnected,
            ConnectionEvent::Disconnected => LivenessSignal::ChannelDisconnected,
            ConnectionEvent::KeepAlive => LivenessSignal::ChannelFrame,
            ConnectionEvent::Stats(stats) => LivenessSignal::ChannelStats(stats),
        };
        self.apply(signal);
    }

    fn record_probe(&mut self, result: Result<(), SodaliteApiError>) {
        match result {
            Ok(()) => {
                tracing::debug!("Health probe succeeded");
                self.apply(LivenessSignal::ProbeSucceeded);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Health probe failed");
                self.apply(LivenessSignal::ProbeFailed);
            }
        }
    }

    fn apply(&mut self, signal: LivenessSignal) {
        // Results resolving after teardown belong to a dead session.
        if self.cancel.is_cancelled() {
            return;
        }

        let before = self.tracker.state().label();
        self.tracker.record(signal, Utc::now());
        let state = self.tracker.state();
        let after = state.label();

        if before != after {
            tracing::info!(from = before, to = after, "Service liveness changed");
        }
        self.store.set_liveness(state);
    }
}
