//! Transport session: the one logical connection to the node.
//!
//! The session runs at most one connect attempt or open socket at a time and
//! reports its lifecycle as [`SessionEvent`]s on an mpsc channel. Every
//! attempt carries the [`Generation`] it was started with; the session never
//! retries on its own.
//!
//! # Lifecycle
//!
//! ```text
//! connect(e, g) ──► Opened ──► Closed(reason)
//!        │
//!        └────────► Failed(cause)
//! ```
//!
//! `disconnect()` cancels the attempt or closes the socket and emits nothing;
//! whoever asked for it already knows.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::identifiers::Generation;
use crate::state::{CloseReason, Endpoint, FailureCause};

use super::{Connection, Connector};

// ============================================================================
// Events
// ============================================================================

/// Lifecycle event kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Socket open and probe answered.
    Opened,
    /// Open socket stopped.
    Closed(CloseReason),
    /// Attempt failed before opening.
    Failed(FailureCause),
}

/// A lifecycle event tagged with its attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    /// Attempt the event belongs to.
    pub generation: Generation,
    /// Endpoint of that attempt.
    pub endpoint: Endpoint,
    /// What happened.
    pub kind: TransportEvent,
}

/// Sender half the session reports on.
pub type SessionEventSender = mpsc::UnboundedSender<SessionEvent>;

// ============================================================================
// SessionSlot
// ============================================================================

/// Phase of the current attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Connecting,
    Open,
}

/// State of the single attempt the session owns.
struct SessionSlot {
    generation: Generation,
    endpoint: Option<Endpoint>,
    phase: Phase,
    task: Option<JoinHandle<()>>,
    connection: Option<Connection>,
}

impl SessionSlot {
    /// Cancels the attempt and closes the socket.
    fn tear_down(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(connection) = self.connection.take() {
            connection.shutdown();
        }
        self.phase = Phase::Idle;
    }
}

// ============================================================================
// TransportSession
// ============================================================================

/// Owner of the node socket.
pub struct TransportSession {
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    events: SessionEventSender,
    slot: Arc<Mutex<SessionSlot>>,
}

impl fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.lock();
        f.debug_struct("TransportSession")
            .field("generation", &slot.generation)
            .field("endpoint", &slot.endpoint)
            .field("phase", &slot.phase)
            .finish_non_exhaustive()
    }
}

impl TransportSession {
    /// Creates an idle session.
    pub fn new(
        connector: Arc<dyn Connector>,
        connect_timeout: Duration,
        events: SessionEventSender,
    ) -> Self {
        Self {
            connector,
            connect_timeout,
            events,
            slot: Arc::new(Mutex::new(SessionSlot {
                generation: Generation::ZERO,
                endpoint: None,
                phase: Phase::Idle,
                task: None,
                connection: None,
            })),
        }
    }

    /// Starts a connect attempt.
    ///
    /// A no-op returning `false` while connecting to or connected to the same
    /// endpoint. Otherwise any prior attempt or socket is torn down first.
    pub fn connect(&self, endpoint: Endpoint, generation: Generation) -> bool {
        let mut slot = self.slot.lock();

        if slot.phase != Phase::Idle && slot.endpoint.as_ref() == Some(&endpoint) {
            trace!(endpoint = %endpoint, "Connect ignored, attempt already active");
            return false;
        }

        if slot.phase != Phase::Idle {
            debug!(
                previous = ?slot.endpoint.as_ref().map(Endpoint::as_str),
                endpoint = %endpoint,
                "Endpoint changed, tearing down previous session"
            );
        }
        slot.tear_down();

        slot.generation = generation;
        slot.endpoint = Some(endpoint.clone());
        slot.phase = Phase::Connecting;

        debug!(endpoint = %endpoint, %generation, "Connect attempt started");

        slot.task = Some(tokio::spawn(run_attempt(
            Arc::clone(&self.connector),
            self.connect_timeout,
            endpoint,
            generation,
            Arc::clone(&self.slot),
            self.events.clone(),
        )));

        true
    }

    /// Cancels any attempt and closes the socket. Idempotent.
    pub fn disconnect(&self) {
        let mut slot = self.slot.lock();
        if slot.phase != Phase::Idle {
            info!(endpoint = ?slot.endpoint.as_ref().map(Endpoint::as_str), "Disconnecting");
        }
        slot.tear_down();
    }

    /// Returns the open connection for `generation`, if it is still current.
    #[must_use]
    pub fn connection(&self, generation: Generation) -> Option<Connection> {
        let slot = self.slot.lock();
        if slot.generation == generation && slot.phase == Phase::Open {
            slot.connection.clone()
        } else {
            None
        }
    }

    /// Returns `true` while an attempt is in flight or a socket is open.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.slot.lock().phase != Phase::Idle
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.slot.lock().tear_down();
    }
}

// ============================================================================
// Attempt Task
// ============================================================================

/// One connect attempt, then watching the socket until it stops.
async fn run_attempt(
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    endpoint: Endpoint,
    generation: Generation,
    slot: Arc<Mutex<SessionSlot>>,
    events: SessionEventSender,
) {
    let emit = |kind: TransportEvent| {
        let event = SessionEvent {
            generation,
            endpoint: endpoint.clone(),
            kind,
        };
        if events.send(event).is_err() {
            trace!(%generation, "Session event receiver gone");
        }
    };

    let connection = match connector.open(&endpoint, connect_timeout).await {
        Ok(connection) => connection,
        Err(cause) => {
            {
                let mut guard = slot.lock();
                if guard.generation != generation {
                    return;
                }
                guard.phase = Phase::Idle;
                guard.task = None;
            }
            warn!(endpoint = %endpoint, %generation, cause = %cause, "Connect attempt failed");
            emit(TransportEvent::Failed(cause));
            return;
        }
    };

    {
        let mut guard = slot.lock();
        if guard.generation != generation || guard.phase != Phase::Connecting {
            trace!(%generation, "Attempt superseded after open");
            connection.shutdown();
            return;
        }
        guard.phase = Phase::Open;
        guard.connection = Some(connection.clone());
    }

    emit(TransportEvent::Opened);

    let reason = connection.closed().await;

    {
        let mut guard = slot.lock();
        if guard.generation != generation {
            return;
        }
        guard.phase = Phase::Idle;
        guard.connection = None;
        guard.task = None;
    }

    info!(endpoint = %endpoint, %generation, reason = %reason, "Node connection closed");
    emit(TransportEvent::Closed(reason));
}

// ============================================================================
// Tests
// ============================================================================
