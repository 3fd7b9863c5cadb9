//! Server-pushed subscription notifications and incoming message routing.
//!
//! # Format
//!
//! ```json
//! {
//!   "jsonrpc": "2.0",
//!   "method": "chain_newHead",
//!   "params": { "subscription": "abc", "result": { "number": "0x1a" } }
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde_json::{Value, from_str};

use crate::error::{Error, Result};

use super::Response;

// ============================================================================
// SubscriptionKey
// ============================================================================

/// Server-assigned subscription id.
///
/// Nodes hand out either strings or numbers; both are normalized to text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey(String);

impl SubscriptionKey {
    /// Normalizes a JSON id value.
    ///
    /// Returns `None` for values that cannot be subscription ids.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    /// Returns the id text.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Notification
// ============================================================================

/// Notification parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationParams {
    /// Subscription this notification belongs to.
    pub subscription: Value,

    /// Payload.
    #[serde(default)]
    pub result: Value,
}

/// A subscription notification pushed by the node.
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    /// Notification method (e.g. `chain_newHead`).
    pub method: String,

    /// Subscription id and payload.
    pub params: NotificationParams,
}

impl Notification {
    /// Returns the normalized subscription id.
    #[inline]
    #[must_use]
    pub fn subscription(&self) -> Option<SubscriptionKey> {
        SubscriptionKey::from_value(&self.params.subscription)
    }
}

// ============================================================================
// Incoming
// ============================================================================

/// Any message the node may send.
#[derive(Debug, Clone)]
pub enum Incoming {
    /// Reply to one of our requests.
    Response(Response),
    /// Subscription push.
    Notification(Notification),
}

impl Incoming {
    /// Parses a text frame.
    ///
    /// Responses are tried first, then notifications.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the frame is neither.
    pub fn parse(text: &str) -> Result<Self> {
        if let Ok(response) = from_str::<Response>(text) {
            return Ok(Self::Response(response));
        }

        if let Ok(notification) = from_str::<Notification>(text) {
            return Ok(Self::Notification(notification));
        }

        Err(Error::protocol(format!("Unrecognized message: {text}")))
    }
}

// ============================================================================
// Tests
// ============================================================================
