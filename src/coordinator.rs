//! Readiness coordinator state machine.
//!
//! Combines the transport session and the extension bridge into the
//! `{connection, keyring, identities}` contract.
//!
//! # Action Pattern
//!
//! The coordinator performs no I/O. [`ReadinessCoordinator::handle`] takes one
//! [`Input`] and returns the [`Action`]s the driver must execute, in order.
//! Every state change ends with exactly one [`Action::Publish`].
//!
//! ```text
//!              Mount / Retry / SwitchEndpoint
//! ┌──────────────┐ ──────────────────────► ┌────────────┐
//! │ Disconnected │                         │ Connecting │
//! └──────────────┘ ◄──────┐                └────────────┘
//!        ▲                │ Teardown          │       │
//!        │                │            Opened │       │ Failed
//!        │ Teardown   ┌───────┐ ◄─────────────┘       ▼
//!        └────────────│ Ready │ ──── Closed ────► ┌───────┐
//!                     └───────┘                   │ Error │ ── Retry ──► Connecting
//!                                                 └───────┘
//! ```
//!
//! # Generations
//!
//! Each connect attempt and each discovery run gets a fresh [`Generation`].
//! Events tagged with anything but the current one are discarded without
//! touching state.

// ============================================================================
// Imports
// ============================================================================

use tracing::{debug, info, trace};

use crate::extension::BridgeUpdate;
use crate::identifiers::Generation;
use crate::state::{
    Address, CloseReason, ConnectionFailure, ConnectionState, Endpoint, FailureCause, Identity,
    KeyringState, ReadinessSnapshot,
};
use crate::transport::{SessionEvent, TransportEvent};

// ============================================================================
// Input / Action
// ============================================================================

/// Everything the coordinator reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Application mounted.
    Mount,
    /// Transport session lifecycle event.
    Transport(SessionEvent),
    /// Wholesale identity update from the bridge.
    Identities(BridgeUpdate),
    /// User asked to retry the connection.
    Retry,
    /// User picked another node endpoint.
    SwitchEndpoint(Endpoint),
    /// User picked another account.
    SelectIdentity(Address),
    /// Application unmounting.
    Teardown,
}

/// Side effects for the driver to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Start a connect attempt.
    Connect {
        /// Endpoint to connect to.
        endpoint: Endpoint,
        /// Generation tagging the attempt.
        generation: Generation,
    },
    /// Close the session.
    Disconnect,
    /// Start a discovery run.
    Discover {
        /// Generation tagging the run.
        generation: Generation,
    },
    /// Build the request handle for the opened attempt.
    InstallHandle {
        /// Attempt that opened.
        generation: Generation,
    },
    /// Invalidate and drop the request handle.
    InvalidateHandle,
    /// Publish a new snapshot.
    Publish(ReadinessSnapshot),
    /// Stop discovery and provider watching.
    StopBridge,
}

// ============================================================================
// ReadinessCoordinator
// ============================================================================

/// Pure readiness state machine.
#[derive(Debug, Clone)]
pub struct ReadinessCoordinator {
    endpoint: Endpoint,
    connection: ConnectionState,
    keyring: KeyringState,
    identities: Vec<Identity>,
    selected: Option<Address>,
    connect_generation: Generation,
    discover_generation: Generation,
    sequence: u64,
    mounted: bool,
    torn_down: bool,
}

impl ReadinessCoordinator {
    /// Creates an unmounted coordinator for `endpoint`.
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            connection: ConnectionState::Disconnected,
            keyring: KeyringState::Loading,
            identities: Vec::new(),
            selected: None,
            connect_generation: Generation::ZERO,
            discover_generation: Generation::ZERO,
            sequence: 0,
            mounted: false,
            torn_down: false,
        }
    }

    /// Snapshot before any input: `Disconnected` / `Loading`.
    #[must_use]
    pub fn initial_snapshot(&self) -> ReadinessSnapshot {
        ReadinessSnapshot::initial(self.endpoint.clone())
    }

    /// Current endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Current connection sub-state.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    /// Current keyring sub-state.
    #[inline]
    #[must_use]
    pub fn keyring(&self) -> KeyringState {
        self.keyring
    }

    /// Generation of the current connect attempt.
    #[inline]
    #[must_use]
    pub fn connect_generation(&self) -> Generation {
        self.connect_generation
    }

    /// Returns `true` once teardown has been handled.
    #[inline]
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Handles one input and returns the actions to execute, in order.
    pub fn handle(&mut self, input: Input) -> Vec<Action> {
        if self.torn_down {
            trace!(?input, "Input after teardown ignored");
            return Vec::new();
        }
        if !self.mounted && input != Input::Mount {
            trace!(?input, "Input before mount ignored");
            return Vec::new();
        }

        match input {
            Input::Mount => self.on_mount(),
            Input::Transport(event) => self.on_transport(event),
            Input::Identities(update) => self.on_identities(update),
            Input::Retry => self.on_retry(),
            Input::SwitchEndpoint(endpoint) => self.on_switch_endpoint(endpoint),
            Input::SelectIdentity(address) => self.on_select_identity(address),
            Input::Teardown => self.on_teardown(),
        }
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    fn on_mount(&mut self) -> Vec<Action> {
        if self.mounted {
            trace!("Already mounted");
            return Vec::new();
        }
        self.mounted = true;

        self.discover_generation = self.discover_generation.next();
        let mut actions = self.start_connect();
        actions.insert(
            1,
            Action::Discover {
                generation: self.discover_generation,
            },
        );
        actions
    }

    fn on_transport(&mut self, event: SessionEvent) -> Vec<Action> {
        if event.generation != self.connect_generation {
            trace!(
                generation = %event.generation,
                current = %self.connect_generation,
                kind = ?event.kind,
                "Stale transport event discarded"
            );
            return Vec::new();
        }

        match event.kind {
            TransportEvent::Opened => {
                if self.connection != ConnectionState::Connecting {
                    trace!(state = self.connection.label(), "Opened outside connecting ignored");
                    return Vec::new();
                }
                info!(endpoint = %event.endpoint, generation = %event.generation, "Node connection ready");
                self.connection = ConnectionState::Ready;
                vec![
                    Action::InstallHandle {
                        generation: event.generation,
                    },
                    self.publish(),
                ]
            }
            TransportEvent::Failed(cause) => {
                if self.connection != ConnectionState::Connecting {
                    trace!(state = self.connection.label(), "Failure outside connecting ignored");
                    return Vec::new();
                }
                self.connection = ConnectionState::Error(ConnectionFailure::new(event.endpoint, cause));
                vec![self.publish()]
            }
            TransportEvent::Closed(reason) => {
                if !self.connection.is_ready() {
                    trace!(state = self.connection.label(), "Close outside ready ignored");
                    return Vec::new();
                }
                self.connection = closed_state(event.endpoint, reason);
                vec![Action::InvalidateHandle, self.publish()]
            }
        }
    }

    fn on_identities(&mut self, update: BridgeUpdate) -> Vec<Action> {
        if update.generation != self.discover_generation {
            trace!(
                generation = %update.generation,
                current = %self.discover_generation,
                "Stale identity update discarded"
            );
            return Vec::new();
        }

        if update.providers == 0 {
            self.keyring = KeyringState::Unavailable;
            self.identities.clear();
        } else {
            self.keyring = KeyringState::Ready;
            self.identities = update.identities;
        }

        let still_listed = self
            .selected
            .as_ref()
            .is_some_and(|address| self.identities.iter().any(|i| i.address() == address));
        if !still_listed {
            self.selected = self.identities.first().map(|i| i.address().clone());
        }

        debug!(
            keyring = self.keyring.label(),
            identities = self.identities.len(),
            "Keyring updated"
        );
        vec![self.publish()]
    }

    fn on_retry(&mut self) -> Vec<Action> {
        match self.connection {
            ConnectionState::Connecting | ConnectionState::Ready => {
                trace!(state = self.connection.label(), "Retry ignored");
                Vec::new()
            }
            ConnectionState::Disconnected | ConnectionState::Error(_) => {
                info!(endpoint = %self.endpoint, "Retrying node connection");
                self.start_connect()
            }
        }
    }

    fn on_switch_endpoint(&mut self, endpoint: Endpoint) -> Vec<Action> {
        if endpoint == self.endpoint {
            return self.on_retry();
        }

        info!(from = %self.endpoint, to = %endpoint, "Switching node endpoint");
        let was_ready = self.connection.is_ready();
        self.endpoint = endpoint;

        let mut actions = Vec::with_capacity(3);
        if was_ready {
            actions.push(Action::InvalidateHandle);
        }
        actions.extend(self.start_connect());
        actions
    }

    fn on_select_identity(&mut self, address: Address) -> Vec<Action> {
        if self.selected.as_ref() == Some(&address) {
            return Vec::new();
        }
        if !self.identities.iter().any(|i| i.address() == &address) {
            debug!(%address, "Selected address is not listed");
            return Vec::new();
        }

        self.selected = Some(address);
        vec![self.publish()]
    }

    fn on_teardown(&mut self) -> Vec<Action> {
        self.torn_down = true;

        let was_ready = self.connection.is_ready();
        self.connection = ConnectionState::Disconnected;
        self.connect_generation = self.connect_generation.next();
        self.discover_generation = self.discover_generation.next();

        let mut actions = Vec::with_capacity(4);
        if was_ready {
            actions.push(Action::InvalidateHandle);
        }
        actions.push(Action::Disconnect);
        actions.push(Action::StopBridge);
        actions.push(self.publish());
        actions
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Moves to `Connecting` under a fresh generation.
    fn start_connect(&mut self) -> Vec<Action> {
        self.connect_generation = self.connect_generation.next();
        self.connection = ConnectionState::Connecting;

        debug!(
            endpoint = %self.endpoint,
            generation = %self.connect_generation,
            "Connecting"
        );

        vec![
            Action::Connect {
                endpoint: self.endpoint.clone(),
                generation: self.connect_generation,
            },
            self.publish(),
        ]
    }

    fn publish(&mut self) -> Action {
        self.sequence += 1;
        Action::Publish(ReadinessSnapshot::new(
            self.sequence,
            self.endpoint.clone(),
            self.connection.clone(),
            self.keyring,
            self.identities.clone(),
            self.selected.clone(),
        ))
    }
}

/// State after an open socket stops.
fn closed_state(endpoint: Endpoint, reason: CloseReason) -> ConnectionState {
    if reason.is_requested() {
        ConnectionState::Disconnected
    } else {
        ConnectionState::Error(ConnectionFailure::new(endpoint, FailureCause::Closed(reason)))
    }
}

// ============================================================================
// Tests
// ============================================================================
