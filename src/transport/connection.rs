//! WebSocket connection and event loop.
//!
//! This module owns one open socket to the node, including request/response
//! correlation and routing of subscription notifications.
//!
//! # Event Loop
//!
//! The connection spawns a tokio task that handles:
//!
//! - Incoming messages from the node (responses, notifications)
//! - Outgoing requests from the Rust API
//! - Request/response correlation by JSON-RPC id
//! - Reporting why the socket stopped, once

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, to_string};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{Incoming, Notification, Request, Response, SubscriptionKey};
use crate::state::CloseReason;

// ============================================================================
// Constants
// ============================================================================

/// Maximum pending requests before rejecting new ones.
const MAX_PENDING_REQUESTS: usize = 100;

// ============================================================================
// Types
// ============================================================================

/// Sink that receives one subscription's payloads.
type NotificationSink = mpsc::UnboundedSender<Value>;

/// What is waiting for a given request id.
enum Pending {
    /// Plain call waiting for its result.
    Call(oneshot::Sender<Result<Response>>),
    /// Subscribe call; the sink is registered before the caller is woken.
    Subscribe {
        response_tx: oneshot::Sender<Result<Response>>,
        sink: NotificationSink,
    },
}

impl Pending {
    fn fail(self, error: Error) {
        let tx = match self {
            Self::Call(tx) | Self::Subscribe { response_tx: tx, .. } => tx,
        };
        let _ = tx.send(Err(error));
    }
}

/// Map of request IDs to waiters.
type CorrelationMap = FxHashMap<RequestId, Pending>;

/// Map of live subscriptions to their sinks.
type SubscriptionMap = FxHashMap<SubscriptionKey, NotificationSink>;

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Send a request and route its response.
    Send { request: Request, pending: Pending },
    /// Remove a timed-out correlation entry.
    RemoveCorrelation(RequestId),
    /// Forget a subscription sink.
    RemoveSubscription(SubscriptionKey),
    /// Shutdown the connection.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

/// WebSocket connection to a node.
///
/// Cheap to clone; all clones drive the same event loop. The socket is
/// closed by [`Connection::shutdown`] or when the remote goes away, never on
/// drop of a clone.
#[derive(Clone)]
pub struct Connection {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Correlation map (shared with event loop).
    correlation: Arc<Mutex<CorrelationMap>>,
    /// Close signal set once by the event loop.
    closed_rx: watch::Receiver<Option<CloseReason>>,
}

impl Connection {
    /// Creates a new connection from a WebSocket stream.
    ///
    /// Spawns the event loop task internally.
    pub(crate) fn new<S>(ws_stream: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(None);
        let correlation = Arc::new(Mutex::new(CorrelationMap::default()));

        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            Arc::clone(&correlation),
            closed_tx,
        ));

        Self {
            command_tx,
            correlation,
            closed_rx,
        }
    }

    /// Sends a request and waits for its result.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the connection is closed
    /// - [`Error::RequestTimeout`] if no response arrives within `request_timeout`
    /// - [`Error::Protocol`] if too many requests are pending
    /// - [`Error::Rpc`] if the node answered with an error object
    pub async fn call(
        &self,
        method: impl Into<String>,
        params: Value,
        request_timeout: Duration,
    ) -> Result<Value> {
        let request = Request::new(method, params);
        let (response_tx, response_rx) = oneshot::channel();

        let response = self
            .send_pending(request, Pending::Call(response_tx), response_rx, request_timeout)
            .await?;

        response.into_result()
    }

    /// Opens a node subscription.
    ///
    /// The returned receiver yields each notification payload in arrival
    /// order, starting with any sent right after the subscribe reply.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::call`], plus [`Error::Protocol`] if the node
    /// returns something that is not a subscription id.
    pub async fn subscribe(
        &self,
        method: impl Into<String>,
        params: Value,
        request_timeout: Duration,
    ) -> Result<(SubscriptionKey, mpsc::UnboundedReceiver<Value>)> {
        let request = Request::new(method, params);
        let (response_tx, response_rx) = oneshot::channel();
        let (sink, receiver) = mpsc::unbounded_channel();

        let response = self
            .send_pending(
                request,
                Pending::Subscribe { response_tx, sink },
                response_rx,
                request_timeout,
            )
            .await?;

        let result = response.into_result()?;
        let key = SubscriptionKey::from_value(&result)
            .ok_or_else(|| Error::protocol(format!("Invalid subscription id: {result}")))?;

        Ok((key, receiver))
    }

    /// Stops routing notifications for a subscription.
    pub fn forget_subscription(&self, key: SubscriptionKey) {
        let _ = self
            .command_tx
            .send(ConnectionCommand::RemoveSubscription(key));
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.correlation.lock().len()
    }

    /// Returns `true` once the event loop has stopped.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed_rx.borrow().is_some()
    }

    /// Waits until the socket stops and returns why.
    pub async fn closed(&self) -> CloseReason {
        let mut closed_rx = self.closed_rx.clone();
        match closed_rx.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone().unwrap_or(CloseReason::StreamEnded),
            Err(_) => CloseReason::StreamEnded,
        }
    }

    /// Shuts down the connection gracefully.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }

    /// Registers the waiter, sends, and waits with timeout.
    async fn send_pending(
        &self,
        request: Request,
        pending: Pending,
        response_rx: oneshot::Receiver<Result<Response>>,
        request_timeout: Duration,
    ) -> Result<Response> {
        let request_id = request.id;

        // Check pending request limit
        {
            let correlation = self.correlation.lock();
            if correlation.len() >= MAX_PENDING_REQUESTS {
                warn!(
                    pending = correlation.len(),
                    max = MAX_PENDING_REQUESTS,
                    "Too many pending requests"
                );
                return Err(Error::protocol(format!(
                    "Too many pending requests: {}/{}",
                    correlation.len(),
                    MAX_PENDING_REQUESTS
                )));
            }
        }

        self.command_tx
            .send(ConnectionCommand::Send { request, pending })
            .map_err(|_| Error::ConnectionClosed)?;

        match timeout(request_timeout, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                let _ = self
                    .command_tx
                    .send(ConnectionCommand::RemoveCorrelation(request_id));

                Err(Error::request_timeout(request_id, saturating_millis(request_timeout)))
            }
        }
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop<S>(
        ws_stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        correlation: Arc<Mutex<CorrelationMap>>,
        closed_tx: watch::Sender<Option<CloseReason>>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();
        let mut subscriptions = SubscriptionMap::default();

        let reason = loop {
            tokio::select! {
                // Incoming messages from the node
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_incoming_message(&text, &correlation, &mut subscriptions);
                        }

                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "WebSocket closed by remote");
                            break CloseReason::Remote {
                                code: frame.as_ref().map(|f| u16::from(f.code)),
                                reason: frame.map(|f| f.reason.to_string()).unwrap_or_default(),
                            };
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break CloseReason::StreamError(e.to_string());
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break CloseReason::StreamEnded;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Commands from Rust API
                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send { request, pending }) => {
                            Self::handle_send_command(request, pending, &mut ws_write, &correlation)
                                .await;
                        }

                        Some(ConnectionCommand::RemoveCorrelation(request_id)) => {
                            correlation.lock().remove(&request_id);
                            debug!(%request_id, "Removed timed-out correlation");
                        }

                        Some(ConnectionCommand::RemoveSubscription(key)) => {
                            subscriptions.remove(&key);
                            trace!(subscription = key.as_str(), "Subscription forgotten");
                        }

                        Some(ConnectionCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            break CloseReason::Requested;
                        }

                        None => {
                            debug!("Command channel closed");
                            let _ = ws_write.close().await;
                            break CloseReason::Requested;
                        }
                    }
                }
            }
        };

        Self::fail_pending_requests(&correlation);
        subscriptions.clear();

        let _ = closed_tx.send(Some(reason));

        debug!("Event loop terminated");
    }

    /// Handles an incoming text message from the node.
    fn handle_incoming_message(
        text: &str,
        correlation: &Arc<Mutex<CorrelationMap>>,
        subscriptions: &mut SubscriptionMap,
    ) {
        match Incoming::parse(text) {
            Ok(Incoming::Response(response)) => {
                let pending = correlation.lock().remove(&response.id);
                match pending {
                    Some(Pending::Call(tx)) => {
                        let _ = tx.send(Ok(response));
                    }
                    Some(Pending::Subscribe { response_tx, sink }) => {
                        if let Some(key) = response.result.as_ref().and_then(SubscriptionKey::from_value) {
                            subscriptions.insert(key, sink);
                        }
                        let _ = response_tx.send(Ok(response));
                    }
                    None => warn!(id = %response.id, "Response for unknown request"),
                }
            }

            Ok(Incoming::Notification(notification)) => {
                Self::route_notification(notification, subscriptions);
            }

            Err(_) => warn!(text = %text, "Failed to parse incoming message"),
        }
    }

    /// Forwards a notification to its subscription sink.
    fn route_notification(notification: Notification, subscriptions: &mut SubscriptionMap) {
        let Some(key) = notification.subscription() else {
            warn!(method = %notification.method, "Notification without subscription id");
            return;
        };

        match subscriptions.get(&key) {
            Some(sink) => {
                if sink.send(notification.params.result).is_err() {
                    subscriptions.remove(&key);
                }
            }
            None => trace!(subscription = key.as_str(), "Notification for unknown subscription"),
        }
    }

    /// Handles a send command from the Rust API.
    async fn handle_send_command<S>(
        request: Request,
        pending: Pending,
        ws_write: &mut SplitSink<WebSocketStream<S>, Message>,
        correlation: &Arc<Mutex<CorrelationMap>>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request_id = request.id;

        let json = match to_string(&request) {
            Ok(j) => j,
            Err(e) => {
                pending.fail(Error::Json(e));
                return;
            }
        };

        // Store correlation before sending
        correlation.lock().insert(request_id, pending);

        if let Err(e) = ws_write.send(Message::Text(json.into())).await {
            if let Some(pending) = correlation.lock().remove(&request_id) {
                pending.fail(Error::connection(e.to_string()));
            }
        }

        trace!(%request_id, method = %request.method, "Request sent");
    }

    /// Fails all pending requests with ConnectionClosed error.
    fn fail_pending_requests(correlation: &Arc<Mutex<CorrelationMap>>) {
        let pending: Vec<_> = correlation.lock().drain().collect();
        let count = pending.len();

        for (_, waiter) in pending {
            waiter.fail(Error::ConnectionClosed);
        }

        if count > 0 {
            debug!(count, "Failed pending requests on shutdown");
        }
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Tests
// ============================================================================
