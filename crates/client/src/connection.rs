//! Push-channel connection manager.
//!
//! [`ConnectionManager`] owns at most one push-channel session at a time.
//! A session is a spawned task running connect -> read frames -> wait a
//! fixed delay -> reconnect, forever, until it is torn down. Typed
//! [`ConnectionEvent`]s are broadcast on a [`tokio::sync::broadcast`]
//! channel; call [`ConnectionManager::subscribe`] to receive them.
//!
//! Every session carries a generation number. Tearing a session down
//! bumps the generation under the same lock that guards event emission,
//! so a late frame from a replaced session can never reach subscribers.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use sodalite_core::liveness::Statistics;
use tokio::sync::{broadcast, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::client::{PushClient, PushStream};
use crate::messages::{parse_frame, PushFrame};

/// Broadcast channel capacity for connection events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default delay between a disconnect and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// How long teardown waits for a session task before aborting it.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Events produced by the push channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The handshake succeeded.
    Connected,
    /// The connection closed, failed, or the handshake was refused.
    Disconnected,
    /// A `stats` frame arrived.
    Stats(Statistics),
    /// A `ping` frame arrived.
    KeepAlive,
}

/// Reconnection policy: a fixed delay, retried indefinitely.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Owns one push-channel session at a time.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    config: ReconnectConfig,
    /// Parent of every session token -- cancelled by the owning session.
    cancel: CancellationToken,
    active: Mutex<Option<ActiveSession>>,
}

/// Internal bookkeeping for the running session task.
struct ActiveSession {
    endpoint: String,
    task_handle: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
}

/// State shared between the manager and its session task.
struct Shared {
    event_tx: broadcast::Sender<ConnectionEvent>,
    channel: Mutex<ChannelState>,
}

#[derive(Default)]
struct ChannelState {
    generation: u64,
    connected: bool,
}

impl Shared {
    /// Send `event` if `generation` is still current.
    async fn emit(&self, generation: u64, event: ConnectionEvent) -> bool {
        let mut channel = self.channel.lock().await;
        if channel.generation != generation {
            return false;
        }
        match event {
            ConnectionEvent::Connected => channel.connected = true,
            ConnectionEvent::Disconnected => channel.connected = false,
            _ => {}
        }
        // A SendError only means there are no subscribers right now.
        let _ = self.event_tx.send(event);
        true
    }

    /// Retire the current generation, reporting a disconnect if the
    /// retired session was connected. Returns the new generation.
    async fn next_generation(&self) -> u64 {
        let mut channel = self.channel.lock().await;
        channel.generation += 1;
        if channel.connected {
            channel.connected = false;
            let _ = self.event_tx.send(ConnectionEvent::Disconnected);
        }
        channel.generation
    }
}

impl ConnectionManager {
    pub fn new(config: ReconnectConfig) -> Self {
        Self::with_cancel(config, CancellationToken::new())
    }

    /// Create a manager whose sessions stop when `cancel` is triggered.
    pub fn with_cancel(config: ReconnectConfig, cancel: CancellationToken) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                event_tx,
                channel: Mutex::new(ChannelState::default()),
            }),
            config,
            cancel,
            active: Mutex::new(None),
        }
    }

    /// Subscribe to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Open a session to `endpoint`, replacing any existing one.
    ///
    /// The previous session (and any pending reconnect timer) is torn
    /// down before the new one starts, so only one connection attempt is
    /// ever in flight.
    pub async fn connect(&self, endpoint: impl Into<String>) {
        let endpoint = endpoint.into();
        let mut active = self.active.lock().await;
        let generation = self.teardown(&mut active).await;

        let client = PushClient::new(endpoint.clone());
        let session_cancel = self.cancel.child_token();
        let task_cancel = session_cancel.clone();
        let shared = Arc::clone(&self.shared);
        let delay = self.config.delay;

        let task_handle = tokio::spawn(async move {
            tracing::info!(endpoint = %client.ws_url(), generation, "Starting push channel task");
            run_connection_loop(&client, generation, &shared, delay, &task_cancel).await;
            tracing::info!(endpoint = %client.ws_url(), generation, "Push channel task exited");
        });

        *active = Some(ActiveSession {
            endpoint,
            task_handle,
            cancel: session_cancel,
        });
    }

    /// Close the current session and cancel any pending reconnect.
    ///
    /// Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let mut active = self.active.lock().await;
        self.teardown(&mut active).await;
    }

    /// Endpoint of the running session, if any.
    pub async fn endpoint(&self) -> Option<String> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|session| session.endpoint.clone())
    }

    pub async fn is_running(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|session| !session.task_handle.is_finished())
    }

    // ---- private helpers ----

    async fn teardown(&self, active: &mut Option<ActiveSession>) -> u64 {
        let previous = active.take();
        if let Some(session) = &previous {
            session.cancel.cancel();
        }

        let generation = self.shared.next_generation().await;

        if let Some(mut session) = previous {
            tracing::debug!(endpoint = %session.endpoint, "Stopping push channel task");
            if tokio::time::timeout(TEARDOWN_TIMEOUT, &mut session.task_handle)
                .await
                .is_err()
            {
                tracing::warn!(endpoint = %session.endpoint, "Push channel task did not stop, aborting");
                session.task_handle.abort();
            }
        }

        generation
    }
}

/// Core session loop: connect -> process frames -> wait -> reconnect.
///
/// Runs until the cancellation token is triggered.
async fn run_connection_loop(
    client: &PushClient,
    generation: u64,
    shared: &Shared,
    delay: Duration,
    cancel: &CancellationToken,
) {
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = client.connect() => result,
        };

        match result {
            Ok(conn) => {
                attempt = 0;
                shared.emit(generation, ConnectionEvent::Connected).await;
                process_frames(conn.ws_stream, &conn.session_id, generation, shared, cancel).await;
                if cancel.is_cancelled() {
                    return;
                }
                shared.emit(generation, ConnectionEvent::Disconnected).await;
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Push channel connection failed");
                shared.emit(generation, ConnectionEvent::Disconnected).await;
            }
        }

        tracing::info!(
            delay_ms = delay.as_millis() as u64,
            "Push channel down, reconnecting after delay",
        );

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Read frames until the connection closes or the session is cancelled.
async fn process_frames(
    mut ws_stream: PushStream,
    session_id: &str,
    generation: u64,
    shared: &Shared,
    cancel: &CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = ws_stream.close(None).await {
                    tracing::debug!(session_id, error = %e, "Error closing push channel");
                }
                return;
            }
            msg = ws_stream.next() => msg,
        };

        match msg {
            Some(Ok(Message::Text(text))) => {
                handle_text_frame(&text, session_id, generation, shared).await;
            }
            Some(Ok(Message::Binary(_))) => {
                tracing::trace!(session_id, "Ignoring binary push frame");
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                // Handled automatically by tungstenite.
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(session_id, ?frame, "Push channel closed by server");
                break;
            }
            Some(Ok(Message::Frame(_))) => {}
            Some(Err(e)) => {
                tracing::warn!(session_id, error = %e, "Push channel receive error");
                break;
            }
            None => {
                tracing::info!(session_id, "Push channel stream exhausted");
                break;
            }
        }
    }
}

/// Parse one text frame and forward it as an event. Malformed frames
/// are logged and dropped.
async fn handle_text_frame(text: &str, session_id: &str, generation: u64, shared: &Shared) {
    match parse_frame(text) {
        Ok(PushFrame::Ping) => {
            tracing::trace!(session_id, "Push channel keep-alive");
            shared.emit(generation, ConnectionEvent::KeepAlive).await;
        }
        Ok(PushFrame::Stats(stats)) => {
            tracing::debug!(
                session_id,
                heartbeats = stats.heartbeats,
                connected_clients = stats.connected_clients,
                "Statistics frame",
            );
            shared.emit(generation, ConnectionEvent::Stats(stats)).await;
        }
        Err(e) => {
            tracing::warn!(
                session_id,
                error = %e,
                raw_message = %text,
                "Dropping malformed push frame",
            );
        }
    }
}
