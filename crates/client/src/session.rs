//! Wiring for one running sync core.
//!
//! A [`SyncSession`] owns the state store, the push-channel
//! [`ConnectionManager`], the [`LivenessMonitor`] task and the
//! [`JobRegistry`] poll loop. All of them hang off one master
//! [`CancellationToken`], so [`SyncSession::shutdown`] stops every timer,
//! socket and pending response in one go.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{SodaliteApi, TaskService};
use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ReconnectConfig};
use crate::liveness::LivenessMonitor;
use crate::registry::JobRegistry;
use crate::store::StateStore;

/// How long shutdown waits for each background task.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Build the REST client described by `config`.
pub fn build_api(config: &ClientConfig) -> Result<SodaliteApi, SessionError> {
    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()?;
    Ok(SodaliteApi::with_client(client, config.api_url.clone()))
}

pub struct SyncSession {
    store: StateStore,
    registry: JobRegistry,
    connection: ConnectionManager,
    /// Master cancellation token -- cancelled during shutdown.
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncSession {
    /// Start a session against the HTTP service named in `config`.
    pub async fn start(config: ClientConfig) -> Result<Arc<Self>, SessionError> {
        let api = Arc::new(build_api(&config)?);
        Ok(Self::start_with_service(config, api).await)
    }

    /// Start a session using an arbitrary [`TaskService`].
    ///
    /// The push channel still connects to `config.ws_url`.
    pub async fn start_with_service(
        config: ClientConfig,
        service: Arc<dyn TaskService>,
    ) -> Arc<Self> {
        let cancel = CancellationToken::new();
        let store = StateStore::new();

        let connection = ConnectionManager::with_cancel(
            ReconnectConfig {
                delay: config.reconnect_delay,
            },
            cancel.child_token(),
        );

        // Subscribe before connecting so the first Connected is not missed.
        let events = connection.subscribe();
        let monitor = LivenessMonitor::new(Arc::clone(&service), store.clone(), cancel.clone());
        let monitor_task = tokio::spawn(monitor.run(events, config.probe_interval));

        let registry = JobRegistry::new(service, store.clone(), cancel.clone());
        let registry_task = tokio::spawn(registry.clone().run(config.poll_interval));

        connection.connect(config.ws_url.clone()).await;

        tracing::info!(
            api_url = %config.api_url,
            ws_url = %config.ws_url,
            "Sync session started",
        );

        Arc::new(Self {
            store,
            registry,
            connection,
            cancel,
            tasks: Mutex::new(vec![monitor_task, registry_task]),
        })
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop every background task. Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        tracing::info!("Shutting down sync session");
        self.cancel.cancel();
        self.connection.disconnect().await;

        let mut tasks = self.tasks.lock().await;
        for handle in tasks.drain(..) {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await.is_err() {
                tracing::warn!("Background task did not stop in time");
            }
        }

        tracing::info!("Sync session shut down complete");
    }
}
