//! Request-capable handle handed to views while the connection is ready.
//!
//! A [`RequestHandle`] wraps the live [`Connection`] with a validity flag.
//! The shared context clears the flag before it publishes any snapshot that
//! leaves `Ready`, so a handle kept across that publish fails fast with
//! [`Error::HandleInvalidated`] instead of talking to a dead or replaced
//! socket.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::Generation;
use crate::protocol::SubscriptionKey;
use crate::state::Endpoint;

use super::Connection;

// ============================================================================
// RequestHandle
// ============================================================================

/// Handle for issuing node calls. Valid only while the connection is ready.
#[derive(Clone)]
pub struct RequestHandle {
    connection: Connection,
    valid: Arc<AtomicBool>,
    endpoint: Endpoint,
    generation: Generation,
    request_timeout: Duration,
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandle")
            .field("endpoint", &self.endpoint)
            .field("generation", &self.generation)
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}

impl RequestHandle {
    /// Wraps a freshly opened connection.
    pub(crate) fn new(
        connection: Connection,
        endpoint: Endpoint,
        generation: Generation,
        request_timeout: Duration,
    ) -> Self {
        Self {
            connection,
            valid: Arc::new(AtomicBool::new(true)),
            endpoint,
            generation,
            request_timeout,
        }
    }

    /// Marks this handle and all its clones invalid.
    pub(crate) fn invalidate(&self) {
        if self.valid.swap(false, Ordering::SeqCst) {
            debug!(endpoint = %self.endpoint, generation = %self.generation, "Request handle invalidated");
        }
    }

    /// Returns `true` until the connection leaves `Ready`.
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst) && !self.connection.is_closed()
    }

    /// Endpoint this handle talks to.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Calls a node method with the configured request timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::HandleInvalidated`] if the connection left `Ready`
    /// - any error from [`Connection::call`]
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.ensure_valid()?;
        self.connection
            .call(method, params, self.request_timeout)
            .await
    }

    /// Opens a node subscription.
    ///
    /// `unsubscribe_method` is called by [`RpcSubscription::unsubscribe`].
    ///
    /// # Errors
    ///
    /// - [`Error::HandleInvalidated`] if the connection left `Ready`
    /// - any error from [`Connection::subscribe`]
    pub async fn subscribe(
        &self,
        method: &str,
        params: Value,
        unsubscribe_method: &str,
    ) -> Result<RpcSubscription> {
        self.ensure_valid()?;
        let (key, receiver) = self
            .connection
            .subscribe(method, params, self.request_timeout)
            .await?;

        Ok(RpcSubscription {
            key,
            receiver,
            unsubscribe_method: unsubscribe_method.to_string(),
            handle: self.clone(),
            active: true,
        })
    }

    fn ensure_valid(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(Error::HandleInvalidated)
        }
    }
}

// ============================================================================
// RpcSubscription
// ============================================================================

/// A live node subscription.
///
/// Dropping it stops local routing; [`RpcSubscription::unsubscribe`] also
/// tells the node.
pub struct RpcSubscription {
    key: SubscriptionKey,
    receiver: mpsc::UnboundedReceiver<Value>,
    unsubscribe_method: String,
    handle: RequestHandle,
    active: bool,
}

impl RpcSubscription {
    /// Server-assigned subscription id.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Waits for the next payload. `None` once the socket is gone.
    pub async fn next(&mut self) -> Option<Value> {
        self.receiver.recv().await
    }

    /// Cancels the subscription on the node.
    ///
    /// # Errors
    ///
    /// Returns the node call error; local routing is stopped regardless.
    pub async fn unsubscribe(mut self) -> Result<()> {
        self.active = false;
        self.handle.connection.forget_subscription(self.key.clone());
        let params = Value::Array(vec![Value::String(self.key.as_str().to_string())]);
        self.handle
            .request(&self.unsubscribe_method, params)
            .await
            .map(|_| ())
    }
}

impl Drop for RpcSubscription {
    fn drop(&mut self) {
        if self.active {
            self.handle.connection.forget_subscription(self.key.clone());
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio::time::timeout;

    use crate::transport::testing::{MockBehaviour, MockNode};
    use crate::transport::{Connector, WsConnector};

    async fn handle_for(node: &MockNode) -> RequestHandle {
        let endpoint = Endpoint::parse(&node.ws_url()).expect("endpoint");
        let connection = WsConnector
            .open(&endpoint, Duration::from_secs(5))
            .await
            .expect("open");
        RequestHandle::new(
            connection,
            endpoint,
            Generation::ZERO.next(),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_request_while_valid() {
        let node = MockNode::start(MockBehaviour::Healthy).await;
        let handle = handle_for(&node).await;

        let chain = handle.request("system_chain", Value::Null).await.expect("request");
        assert_eq!(chain, json!("Development"));
    }

    #[tokio::test]
    async fn test_invalidate_affects_clones() {
        let node = MockNode::start(MockBehaviour::Healthy).await;
        let handle = handle_for(&node).await;
        let view_copy = handle.clone();

        handle.invalidate();

        assert!(!view_copy.is_valid());
        let result = view_copy.request("system_chain", Value::Null).await;
        assert!(matches!(result, Err(Error::HandleInvalidated)));
    }

    #[tokio::test]
    async fn test_subscription_and_unsubscribe() {
        let node = MockNode::start(MockBehaviour::Healthy).await;
        let handle = handle_for(&node).await;

        let mut heads = handle
            .subscribe("chain_subscribeNewHeads", Value::Null, "chain_unsubscribeNewHeads")
            .await
            .expect("subscribe");
        let first = timeout(Duration::from_secs(5), heads.next())
            .await
            .expect("in time");
        assert_eq!(first, Some(json!({ "number": "0x1" })));

        heads.unsubscribe().await.expect("unsubscribe");
    }
}
