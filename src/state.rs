//! Readiness data model.
//!
//! Everything a view is allowed to see lives here. The only value the
//! shared context publishes is a [`ReadinessSnapshot`]; views derive their
//! rendering decision from [`ReadinessSnapshot::effective`].
//!
//! # Gates
//!
//! | Check | Meaning |
//! |-------|---------|
//! | [`ReadinessSnapshot::is_interactive`] | `connection == Ready` |
//! | [`ReadinessSnapshot::identities_actionable`] | `keyring == Ready` |
//!
//! Both gates are independent and every data view checks both.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Endpoint
// ============================================================================

/// A validated node WebSocket endpoint (`ws://` or `wss://`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint(Url);

impl Endpoint {
    /// Parses and validates an endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEndpoint`] if the text is not a URL, the
    /// scheme is not `ws`/`wss`, or the host is missing.
    pub fn parse(text: &str) -> Result<Self> {
        let url = Url::parse(text.trim())
            .map_err(|e| Error::invalid_endpoint(text, e.to_string()))?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::invalid_endpoint(text, "scheme must be ws or wss"));
        }

        if url.host_str().is_none_or(str::is_empty) {
            return Err(Error::invalid_endpoint(text, "missing host"));
        }

        Ok(Self(url))
    }

    /// Returns the endpoint as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns the parsed URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

// ============================================================================
// CloseReason
// ============================================================================

/// Why an open socket stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed locally through `disconnect()` or teardown.
    Requested,
    /// Remote sent a close frame.
    Remote {
        /// Close code, if one was sent.
        code: Option<u16>,
        /// Close reason text (may be empty).
        reason: String,
    },
    /// Stream ended without a close frame.
    StreamEnded,
    /// Stream failed with an error.
    StreamError(String),
}

impl CloseReason {
    /// Returns `true` if the close was asked for locally.
    #[inline]
    #[must_use]
    pub fn is_requested(&self) -> bool {
        matches!(self, Self::Requested)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("closed on request"),
            Self::Remote { code: Some(code), reason } if !reason.is_empty() => {
                write!(f, "closed by remote ({code}: {reason})")
            }
            Self::Remote { code: Some(code), .. } => write!(f, "closed by remote ({code})"),
            Self::Remote { .. } => f.write_str("closed by remote"),
            Self::StreamEnded => f.write_str("stream ended"),
            Self::StreamError(message) => write!(f, "stream error: {message}"),
        }
    }
}

// ============================================================================
// FailureCause
// ============================================================================

/// Cause attached to a connection failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// Handshake did not finish within the connect timeout.
    Timeout,
    /// TCP connection refused.
    Refused,
    /// Peer is reachable but does not speak the node protocol.
    ProtocolMismatch(String),
    /// Socket was lost after the connection became ready.
    Closed(CloseReason),
    /// Any other I/O or WebSocket failure.
    Other(String),
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timed out"),
            Self::Refused => f.write_str("connection refused"),
            Self::ProtocolMismatch(detail) => write!(f, "protocol mismatch: {detail}"),
            Self::Closed(reason) => write!(f, "{reason}"),
            Self::Other(message) => f.write_str(message),
        }
    }
}

// ============================================================================
// ConnectionFailure
// ============================================================================

/// Endpoint and cause of a failed connection, surfaced verbatim to users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionFailure {
    /// Endpoint that failed.
    pub endpoint: Endpoint,
    /// What went wrong.
    pub cause: FailureCause,
}

impl ConnectionFailure {
    /// Creates a new failure record.
    #[inline]
    #[must_use]
    pub fn new(endpoint: Endpoint, cause: FailureCause) -> Self {
        Self { endpoint, cause }
    }
}

impl fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Connection to websocket '{}' failed: {}",
            self.endpoint, self.cause
        )
    }
}

// ============================================================================
// ConnectionState
// ============================================================================

/// Node connection sub-state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No socket and no attempt in flight.
    #[default]
    Disconnected,
    /// Attempt in flight.
    Connecting,
    /// Socket open and handshake complete.
    Ready,
    /// Attempt or open socket failed.
    Error(ConnectionFailure),
}

impl ConnectionState {
    /// Returns `true` when the connection is ready.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Returns `true` when the connection is in the error state.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Short state label for logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Error(_) => "error",
        }
    }
}

// ============================================================================
// KeyringState
// ============================================================================

/// Identity keyring sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyringState {
    /// Providers not yet heard from.
    #[default]
    Loading,
    /// At least one provider responded.
    Ready,
    /// No provider exists in the environment.
    Unavailable,
}

impl KeyringState {
    /// Short state label for logs.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Unavailable => "unavailable",
        }
    }
}

// ============================================================================
// Identity
// ============================================================================

/// Account address as reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Wraps an address string.
    #[inline]
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Returns the address text.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An account offered by an identity provider.
///
/// Immutable once built; the identity list is replaced wholesale on updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    address: Address,
    #[serde(rename = "displayName", default)]
    display_name: Option<String>,
    source: String,
}

impl Identity {
    /// Creates a new identity.
    #[must_use]
    pub fn new(
        address: impl Into<String>,
        display_name: Option<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            address: Address::new(address),
            display_name,
            source: source.into(),
        }
    }

    /// Account address.
    #[inline]
    #[must_use]
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Human-readable name, if the provider has one.
    #[inline]
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Tag of the provider this identity came from.
    #[inline]
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }
}

// ============================================================================
// ReadinessSnapshot
// ============================================================================

/// The externally visible readiness tuple.
///
/// Built only by the coordinator. `identities` is non-empty only while the
/// keyring is ready, and `selected` always names one of `identities`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessSnapshot {
    sequence: u64,
    endpoint: Endpoint,
    connection: ConnectionState,
    keyring: KeyringState,
    identities: Vec<Identity>,
    selected: Option<Address>,
}

impl ReadinessSnapshot {
    /// Initial snapshot at mount: `Disconnected` / `Loading`.
    #[must_use]
    pub(crate) fn initial(endpoint: Endpoint) -> Self {
        Self {
            sequence: 0,
            endpoint,
            connection: ConnectionState::Disconnected,
            keyring: KeyringState::Loading,
            identities: Vec::new(),
            selected: None,
        }
    }

    /// Builds a snapshot, dropping identities the keyring state does not allow.
    #[must_use]
    pub(crate) fn new(
        sequence: u64,
        endpoint: Endpoint,
        connection: ConnectionState,
        keyring: KeyringState,
        identities: Vec<Identity>,
        selected: Option<Address>,
    ) -> Self {
        let identities = if keyring == KeyringState::Ready {
            identities
        } else {
            Vec::new()
        };
        let selected = selected.filter(|address| identities.iter().any(|i| i.address() == address));

        Self {
            sequence,
            endpoint,
            connection,
            keyring,
            identities,
            selected,
        }
    }

    /// Publication counter; strictly increasing across publishes.
    #[inline]
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Endpoint the connection state refers to.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Connection sub-state.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    /// Keyring sub-state.
    #[inline]
    #[must_use]
    pub fn keyring(&self) -> KeyringState {
        self.keyring
    }

    /// Identities in provider order.
    #[inline]
    #[must_use]
    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    /// Currently selected account.
    #[inline]
    #[must_use]
    pub fn selected(&self) -> Option<&Address> {
        self.selected.as_ref()
    }

    /// Returns the selected identity record.
    #[must_use]
    pub fn selected_identity(&self) -> Option<&Identity> {
        let selected = self.selected.as_ref()?;
        self.identities.iter().find(|i| i.address() == selected)
    }

    /// `connection == Ready`.
    #[inline]
    #[must_use]
    pub fn is_interactive(&self) -> bool {
        self.connection.is_ready()
    }

    /// `keyring == Ready`.
    #[inline]
    #[must_use]
    pub fn identities_actionable(&self) -> bool {
        self.keyring == KeyringState::Ready
    }

    /// Collapses both sub-states into the rendering decision.
    #[must_use]
    pub fn effective(&self) -> EffectiveState {
        match (&self.connection, self.keyring) {
            (ConnectionState::Error(failure), _) => EffectiveState::Error(failure.clone()),
            (ConnectionState::Disconnected | ConnectionState::Connecting, _) => {
                EffectiveState::Loading(LoadingReason::Connecting {
                    endpoint: self.endpoint.clone(),
                })
            }
            (ConnectionState::Ready, KeyringState::Loading) => {
                EffectiveState::Loading(LoadingReason::AwaitingKeyring)
            }
            (ConnectionState::Ready, KeyringState::Unavailable) => {
                EffectiveState::Loading(LoadingReason::NoIdentityProvider)
            }
            (ConnectionState::Ready, KeyringState::Ready) => EffectiveState::Ready,
        }
    }
}

// ============================================================================
// EffectiveState
// ============================================================================

/// Which unmet condition keeps the application from being ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadingReason {
    /// Waiting for the node connection.
    Connecting {
        /// Endpoint being connected to.
        endpoint: Endpoint,
    },
    /// Waiting for providers to answer (the user may need to approve a prompt).
    AwaitingKeyring,
    /// No identity provider exists in the environment.
    NoIdentityProvider,
}

impl LoadingReason {
    /// Human-readable message telling the user what to act on.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Connecting { endpoint } => format!("Connecting to node at '{endpoint}'"),
            Self::AwaitingKeyring => {
                "Loading accounts (please review any extension's authorization)".to_string()
            }
            Self::NoIdentityProvider => {
                "No account provider found (install or enable a wallet extension)".to_string()
            }
        }
    }
}

/// The three-way rendering decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectiveState {
    /// Connection failed; blocks everything.
    Error(ConnectionFailure),
    /// Some precondition is still unmet.
    Loading(LoadingReason),
    /// Connection and keyring are both ready.
    Ready,
}

impl EffectiveState {
    /// Returns `true` when data views may render live content.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Message to display, if any.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        match self {
            Self::Error(failure) => Some(failure.to_string()),
            Self::Loading(reason) => Some(reason.message()),
            Self::Ready => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Endpoint {
        Endpoint::parse("ws://127.0.0.1:9944").unwrap()
    }

    fn alice() -> Identity {
        Identity::new("5Alice", Some("Alice".into()), "test")
    }

    #[test]
    fn test_endpoint_accepts_ws_and_wss() {
        assert!(Endpoint::parse("ws://localhost:9944").is_ok());
        assert!(Endpoint::parse("wss://rpc.example.org").is_ok());
    }

    #[test]
    fn test_endpoint_rejects_http_and_garbage() {
        assert!(matches!(
            Endpoint::parse("http://localhost:9944"),
            Err(Error::InvalidEndpoint { .. })
        ));
        assert!(Endpoint::parse("not a url").is_err());
    }

    #[test]
    fn test_identities_dropped_unless_keyring_ready() {
        let snapshot = ReadinessSnapshot::new(
            1,
            endpoint(),
            ConnectionState::Ready,
            KeyringState::Loading,
            vec![alice()],
            Some(Address::new("5Alice")),
        );
        assert!(snapshot.identities().is_empty());
        assert!(snapshot.selected().is_none());
    }

    #[test]
    fn test_selected_must_be_listed() {
        let snapshot = ReadinessSnapshot::new(
            1,
            endpoint(),
            ConnectionState::Ready,
            KeyringState::Ready,
            vec![alice()],
            Some(Address::new("5Bob")),
        );
        assert!(snapshot.selected().is_none());
    }

    #[test]
    fn test_error_takes_precedence() {
        let failure = ConnectionFailure::new(endpoint(), FailureCause::Refused);
        let snapshot = ReadinessSnapshot::new(
            3,
            endpoint(),
            ConnectionState::Error(failure.clone()),
            KeyringState::Ready,
            vec![alice()],
            None,
        );
        assert_eq!(snapshot.effective(), EffectiveState::Error(failure));
    }

    #[test]
    fn test_loading_reasons_are_distinct() {
        let connecting = ReadinessSnapshot::initial(endpoint()).effective();
        let awaiting = ReadinessSnapshot::new(
            1,
            endpoint(),
            ConnectionState::Ready,
            KeyringState::Loading,
            Vec::new(),
            None,
        )
        .effective();

        assert_ne!(connecting.message(), awaiting.message());
        assert_eq!(
            awaiting.message().as_deref(),
            Some("Loading accounts (please review any extension's authorization)")
        );
    }

    #[test]
    fn test_ready_with_empty_identities() {
        let snapshot = ReadinessSnapshot::new(
            1,
            endpoint(),
            ConnectionState::Ready,
            KeyringState::Ready,
            Vec::new(),
            None,
        );
        assert!(snapshot.effective().is_ready());
        assert!(snapshot.effective().message().is_none());
    }

    #[test]
    fn test_failure_message_names_endpoint_and_cause() {
        let failure = ConnectionFailure::new(endpoint(), FailureCause::Timeout);
        assert_eq!(
            failure.to_string(),
            "Connection to websocket 'ws://127.0.0.1:9944/' failed: timed out"
        );
    }

    #[test]
    fn test_close_reason_display() {
        let reason = CloseReason::Remote {
            code: Some(1001),
            reason: "going away".into(),
        };
        assert_eq!(reason.to_string(), "closed by remote (1001: going away)");
        assert!(CloseReason::Requested.is_requested());
    }
}
