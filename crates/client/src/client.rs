//! WebSocket client for the service's push channel.
//!
//! [`PushClient`] holds the endpoint for one service. Call
//! [`PushClient::connect`] to establish a live [`PushConnection`].

use tokio_tungstenite::{connect_async, MaybeTlsStream};

/// Raw WebSocket stream type used by the push channel.
pub type PushStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for a push-channel endpoint.
#[derive(Debug, Clone)]
pub struct PushClient {
    ws_url: String,
}

/// A live push-channel connection.
pub struct PushConnection {
    /// Random id for correlating log lines of one connection.
    pub session_id: String,
    /// The raw WebSocket stream for reading frames.
    pub ws_stream: PushStream,
}

impl PushClient {
    /// * `ws_url` - full WebSocket URL, e.g. `ws://host:8000/sodalite/ws/stats`.
    pub fn new(ws_url: String) -> Self {
        Self { ws_url }
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Perform the WebSocket handshake.
    pub async fn connect(&self) -> Result<PushConnection, PushClientError> {
        let session_id = uuid::Uuid::new_v4().to_string();

        let (ws_stream, _response) = connect_async(self.ws_url.as_str())
            .await
            .map_err(|e| {
                PushClientError::Connection(format!(
                    "Failed to connect to push channel at {}: {e}",
                    self.ws_url
                ))
            })?;

        tracing::info!(
            session_id = %session_id,
            "Connected to push channel at {}",
            self.ws_url,
        );

        Ok(PushConnection {
            session_id,
            ws_stream,
        })
    }
}

/// Errors that can occur when working with the push client.
#[derive(Debug, thiserror::Error)]
pub enum PushClientError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),
}
