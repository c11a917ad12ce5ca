//! Integration tests for `LivenessMonitor`.
//!
//! Probe results come from a `ScriptedService`; push-channel events are
//! fed in directly with `handle_event` or through a broadcast channel.

mod common;

use std::time::Duration;

use common::{wait_for_snapshot, ScriptedService};
use sodalite_client::connection::ConnectionEvent;
use sodalite_client::liveness::LivenessMonitor;
use sodalite_client::store::StateStore;
use sodalite_core::liveness::Statistics;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

fn stats(heartbeats: u64) -> Statistics {
    Statistics {
        heartbeats,
        connected_clients: 3,
        total_conversions: 12,
        total_bandwidth_mb: 256.0,
    }
}

// ---------------------------------------------------------------------------
// Test: cold start is connecting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cold_start_is_connecting() {
    let store = StateStore::new();
    let liveness = store.snapshot().liveness;
    assert!(liveness.is_connecting);
    assert!(!liveness.is_online);
    assert!(liveness.last_seen.is_none());
    assert!(liveness.statistics.is_none());
}

// ---------------------------------------------------------------------------
// Test: a failing probe alone never leaves the connecting state
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_probe_before_first_contact_stays_connecting() {
    let service = ScriptedService::new();
    service.push_health(false);
    let store = StateStore::new();
    let mut monitor = LivenessMonitor::new(service.clone(), store.clone(), CancellationToken::new());

    monitor.probe_once().await;

    let liveness = store.snapshot().liveness;
    assert!(liveness.is_connecting);
    assert!(!liveness.is_online);
    assert!(liveness.last_seen.is_none());
}

// ---------------------------------------------------------------------------
// Test: online is the OR of probe and channel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn online_is_or_of_probe_and_channel() {
    let service = ScriptedService::new();
    service.push_health(true);
    service.push_health(false);
    service.push_health(false);
    let store = StateStore::new();
    let mut monitor = LivenessMonitor::new(service.clone(), store.clone(), CancellationToken::new());

    monitor.probe_once().await;
    assert!(store.snapshot().liveness.is_online);

    monitor.handle_event(ConnectionEvent::Connected);
    monitor.probe_once().await;
    // Probe failed but the channel is still up.
    assert!(store.snapshot().liveness.is_online);

    monitor.handle_event(ConnectionEvent::Disconnected);
    let liveness = store.snapshot().liveness;
    assert!(!liveness.is_online);
    assert!(!liveness.is_connecting);
    assert!(liveness.is_offline());

    monitor.probe_once().await;
    assert!(store.snapshot().liveness.is_offline());

    // Healthy again once the script is drained.
    monitor.probe_once().await;
    assert!(store.snapshot().liveness.is_online);
}

// ---------------------------------------------------------------------------
// Test: the connecting latch never comes back
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connecting_latch_is_one_shot() {
    let service = ScriptedService::new();
    let store = StateStore::new();
    let mut monitor = LivenessMonitor::new(service.clone(), store.clone(), CancellationToken::new());

    monitor.handle_event(ConnectionEvent::Connected);
    assert!(!store.snapshot().liveness.is_connecting);

    service.push_health(false);
    monitor.handle_event(ConnectionEvent::Disconnected);
    monitor.probe_once().await;

    let liveness = store.snapshot().liveness;
    assert!(!liveness.is_connecting);
    assert!(!liveness.is_online);
}

// ---------------------------------------------------------------------------
// Test: last_seen only moves on positive signals and never backwards
// ---------------------------------------------------------------------------

#[tokio::test]
async fn last_seen_tracks_positive_signals_only() {
    let service = ScriptedService::new();
    let store = StateStore::new();
    let mut monitor = LivenessMonitor::new(service.clone(), store.clone(), CancellationToken::new());

    monitor.handle_event(ConnectionEvent::KeepAlive);
    let first = store.snapshot().liveness.last_seen.expect("set by keep-alive");

    monitor.handle_event(ConnectionEvent::Disconnected);
    assert_eq!(store.snapshot().liveness.last_seen, Some(first));

    tokio::time::sleep(Duration::from_millis(5)).await;
    monitor.handle_event(ConnectionEvent::Stats(stats(1)));
    let second = store.snapshot().liveness.last_seen.unwrap();
    assert!(second >= first);
}

// ---------------------------------------------------------------------------
// Test: statistics come from the push channel and survive a disconnect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn statistics_follow_latest_frame() {
    let service = ScriptedService::new();
    let store = StateStore::new();
    let mut monitor = LivenessMonitor::new(service.clone(), store.clone(), CancellationToken::new());

    monitor.probe_once().await;
    assert!(store.snapshot().liveness.statistics.is_none());

    monitor.handle_event(ConnectionEvent::Stats(stats(1)));
    monitor.handle_event(ConnectionEvent::Stats(stats(2)));
    assert_eq!(store.snapshot().liveness.statistics, Some(stats(2)));

    monitor.handle_event(ConnectionEvent::Disconnected);
    assert_eq!(store.snapshot().liveness.statistics, Some(stats(2)));
}

// ---------------------------------------------------------------------------
// Test: signals after cancellation are ignored
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancelled_monitor_ignores_signals() {
    let service = ScriptedService::new();
    let store = StateStore::new();
    let cancel = CancellationToken::new();
    let mut monitor = LivenessMonitor::new(service.clone(), store.clone(), cancel.clone());

    cancel.cancel();
    monitor.handle_event(ConnectionEvent::Connected);
    monitor.probe_once().await;

    assert_eq!(store.snapshot().revision, 0);
    assert!(store.snapshot().liveness.is_connecting);
}

// ---------------------------------------------------------------------------
// Test: the run loop probes immediately and folds channel events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_loop_merges_probe_and_events() {
    let service = ScriptedService::new();
    service.push_health(false);
    let store = StateStore::new();
    let cancel = CancellationToken::new();
    let (event_tx, event_rx) = broadcast::channel(16);

    let monitor = LivenessMonitor::new(service.clone(), store.clone(), cancel.clone());
    let task = tokio::spawn(monitor.run(event_rx, Duration::from_secs(60)));

    common::wait_until(|| service.health_calls() == 1).await;

    event_tx.send(ConnectionEvent::Connected).unwrap();
    event_tx.send(ConnectionEvent::Stats(stats(9))).unwrap();

    let snapshot = wait_for_snapshot(&store, Duration::from_secs(1), |s| {
        s.liveness.statistics.is_some()
    })
    .await;
    assert!(snapshot.liveness.is_online);
    assert_eq!(snapshot.liveness.statistics, Some(stats(9)));
    // The long interval means no second probe was issued.
    assert_eq!(service.health_calls(), 1);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("monitor should stop on cancel")
        .unwrap();
}

// ---------------------------------------------------------------------------
// Test: after lagging behind, the newest retained event decides the state
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lagged_events_converge_on_latest_state() {
    let service = ScriptedService::new();
    service.push_health(false);
    let store = StateStore::new();
    let cancel = CancellationToken::new();
    let (event_tx, event_rx) = broadcast::channel(2);

    // Only the last two events survive in the channel.
    event_tx.send(ConnectionEvent::Connected).unwrap();
    event_tx.send(ConnectionEvent::Disconnected).unwrap();
    event_tx.send(ConnectionEvent::Stats(stats(4))).unwrap();
    event_tx.send(ConnectionEvent::Disconnected).unwrap();

    let monitor = LivenessMonitor::new(service.clone(), store.clone(), cancel.clone());
    let task = tokio::spawn(monitor.run(event_rx, Duration::from_secs(60)));

    let snapshot = wait_for_snapshot(&store, Duration::from_secs(1), |s| {
        s.liveness.statistics.is_some() && !s.liveness.is_online
    })
    .await;
    assert!(snapshot.liveness.is_offline());
    assert_eq!(snapshot.liveness.statistics, Some(stats(4)));

    // A later disconnect that was skipped cannot outlive a newer connect.
    event_tx.send(ConnectionEvent::Disconnected).unwrap();
    event_tx.send(ConnectionEvent::Connected).unwrap();
    event_tx.send(ConnectionEvent::KeepAlive).unwrap();
    let snapshot = wait_for_snapshot(&store, Duration::from_secs(1), |s| s.liveness.is_online).await;
    assert!(snapshot.liveness.is_online);

    cancel.cancel();
    task.await.unwrap();
}
