//! `sodalite-monitor` -- headless front end for the sync core.
//!
//! Connects to a sodalite service, optionally submits jobs, and logs
//! service liveness and job progress until interrupted.
//!
//! # Environment variables
//!
//! Everything read by `ClientConfig::from_env`, plus:
//!
//! | Variable         | Required | Default | Description                          |
//! |------------------|----------|---------|--------------------------------------|
//! | `ENQUEUE_URLS`   | no       | --      | Comma-separated media URLs to submit |
//! | `ENQUEUE_FORMAT` | no       | `mp4`   | Output format for submitted jobs     |
//! | `LOG_FORMAT`     | no       | `text`  | `json` for JSON log lines            |

use std::sync::Arc;

use anyhow::Context;
use sodalite_client::api::SodaliteApi;
use sodalite_client::config::ClientConfig;
use sodalite_client::session::{build_api, SyncSession};
use sodalite_core::job::{DownloadMode, JobRequest, MediaFormat};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod render;

use render::SnapshotRenderer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ClientConfig::from_env();
    let format: MediaFormat = match std::env::var("ENQUEUE_FORMAT") {
        Ok(raw) => raw.parse().context("ENQUEUE_FORMAT is not a known format")?,
        Err(_) => MediaFormat::default(),
    };
    let urls: Vec<String> = std::env::var("ENQUEUE_URLS")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    tracing::info!(
        api_url = %config.api_url,
        ws_url = %config.ws_url,
        queued = urls.len(),
        "Starting sodalite-monitor",
    );

    let api = Arc::new(build_api(&config).context("Failed to build HTTP client")?);
    let session = SyncSession::start_with_service(config, api.clone()).await;

    let render_task = tokio::spawn(render_loop(Arc::clone(&session)));

    for url in urls {
        let request = describe(&api, &url, format).await;
        match session.registry().enqueue(request).await {
            Ok(task_id) => tracing::debug!(task_id = %task_id, url = %url, "Submitted"),
            Err(e) => tracing::error!(url = %url, error = %e, "Failed to submit job"),
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    session.shutdown().await;
    render_task.abort();
    Ok(())
}

/// Install the tracing subscriber. `LOG_FORMAT=json` switches to JSON.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sodalite_monitor=info,sodalite_client=info".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Build a request, using the service's metadata for the display name
/// when it can be fetched.
async fn describe(api: &SodaliteApi, url: &str, format: MediaFormat) -> JobRequest {
    let mut request = JobRequest::new(url).with_format(format);
    if format.is_audio() {
        request = request.with_download_mode(DownloadMode::AudioOnly);
    }

    match api.fetch_metadata(url).await {
        Ok(metadata) => {
            tracing::debug!(url, service = %metadata.service, title = %metadata.title, "Metadata found");
            request.with_display(metadata.title, metadata.thumbnail_url)
        }
        Err(e) => {
            tracing::warn!(url, error = %e, "Metadata lookup failed, using URL as name");
            request
        }
    }
}

/// Log store changes until the session shuts down.
async fn render_loop(session: Arc<SyncSession>) {
    let mut rx = session.store().subscribe();
    let mut renderer = SnapshotRenderer::new();

    loop {
        let snapshot = rx.borrow_and_update().clone();
        let changes = renderer.diff(&snapshot);
        render::log_changes(&snapshot, &changes);

        if session.is_shut_down() || rx.changed().await.is_err() {
            break;
        }
    }
}
