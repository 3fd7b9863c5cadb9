//! Opening sockets to a node.
//!
//! A [`Connector`] turns an endpoint into a ready [`Connection`] or a
//! [`FailureCause`]. The session never retries: one call, one outcome.
//!
//! # Opening Steps
//!
//! 1. WebSocket handshake (`tokio-tungstenite`)
//! 2. Readiness probe: `rpc_methods` must return an object with a `methods` array
//!
//! Both steps share one connect timeout.

// ============================================================================
// Imports
// ============================================================================

use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::{Instant, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::debug;

use crate::error::Error;
use crate::state::{Endpoint, FailureCause};

use super::Connection;

// ============================================================================
// Constants
// ============================================================================

/// Method used to check that the peer is a node.
pub const PROBE_METHOD: &str = "rpc_methods";

// ============================================================================
// Connector
// ============================================================================

/// Opens a socket to a node endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Opens and probes a connection.
    ///
    /// Implementations must finish within `connect_timeout` or return
    /// [`FailureCause::Timeout`].
    async fn open(
        &self,
        endpoint: &Endpoint,
        connect_timeout: Duration,
    ) -> std::result::Result<Connection, FailureCause>;
}

// ============================================================================
// WsConnector
// ============================================================================

/// The production connector: WebSocket plus JSON-RPC probe.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(
        &self,
        endpoint: &Endpoint,
        connect_timeout: Duration,
    ) -> std::result::Result<Connection, FailureCause> {
        let deadline = Instant::now() + connect_timeout;

        let (ws_stream, _) = timeout(connect_timeout, connect_async(endpoint.as_str()))
            .await
            .map_err(|_| FailureCause::Timeout)?
            .map_err(classify_ws_error)?;

        debug!(endpoint = %endpoint, "WebSocket handshake complete");

        let connection = Connection::new(ws_stream);
        let remaining = deadline.saturating_duration_since(Instant::now());

        match probe(&connection, remaining).await {
            Ok(method_count) => {
                debug!(endpoint = %endpoint, method_count, "Readiness probe answered");
                Ok(connection)
            }
            Err(cause) => {
                connection.shutdown();
                Err(cause)
            }
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Checks that the peer answers like a node. Returns the method count.
async fn probe(
    connection: &Connection,
    remaining: Duration,
) -> std::result::Result<usize, FailureCause> {
    if remaining.is_zero() {
        return Err(FailureCause::Timeout);
    }

    let result = connection
        .call(PROBE_METHOD, Value::Null, remaining)
        .await
        .map_err(|e| match e {
            Error::RequestTimeout { .. } => FailureCause::Timeout,
            Error::Rpc { code, message } => {
                FailureCause::ProtocolMismatch(format!("{PROBE_METHOD} rejected ({code}): {message}"))
            }
            other => FailureCause::Other(other.to_string()),
        })?;

    result
        .get("methods")
        .and_then(Value::as_array)
        .map(Vec::len)
        .ok_or_else(|| {
            FailureCause::ProtocolMismatch(format!("unexpected {PROBE_METHOD} reply: {result}"))
        })
}

/// Maps a WebSocket handshake error to a failure cause.
fn classify_ws_error(error: WsError) -> FailureCause {
    match error {
        WsError::Io(e) if e.kind() == ErrorKind::ConnectionRefused => FailureCause::Refused,
        WsError::Io(e) if e.kind() == ErrorKind::TimedOut => FailureCause::Timeout,
        WsError::Http(response) => {
            FailureCause::ProtocolMismatch(format!("HTTP {} instead of upgrade", response.status()))
        }
        WsError::Protocol(e) => FailureCause::ProtocolMismatch(e.to_string()),
        WsError::Url(e) => FailureCause::Other(format!("bad url: {e}")),
        other => FailureCause::Other(other.to_string()),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::transport::testing::{MockBehaviour, MockNode, refused_url};

    fn endpoint(url: &str) -> Endpoint {
        Endpoint::parse(url).expect("endpoint")
    }

    #[tokio::test]
    async fn test_open_healthy_node() {
        let node = MockNode::start(MockBehaviour::Healthy).await;
        let connection = WsConnector
            .open(&endpoint(&node.ws_url()), Duration::from_secs(5))
            .await
            .expect("open");
        assert!(!connection.is_closed());
        connection.shutdown();
    }

    #[tokio::test]
    async fn test_refused() {
        let url = refused_url().await;
        let result = WsConnector.open(&endpoint(&url), Duration::from_secs(5)).await;
        assert_eq!(result.err(), Some(FailureCause::Refused));
    }

    #[tokio::test]
    async fn test_protocol_mismatch() {
        let node = MockNode::start(MockBehaviour::NotRpc).await;
        let result = WsConnector
            .open(&endpoint(&node.ws_url()), Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(FailureCause::ProtocolMismatch(_))));
    }

    #[tokio::test]
    async fn test_timeout() {
        let node = MockNode::start(MockBehaviour::Silent).await;
        let result = WsConnector
            .open(&endpoint(&node.ws_url()), Duration::from_millis(200))
            .await;
        assert_eq!(result.err(), Some(FailureCause::Timeout));
    }
}
