//! JSON-RPC protocol message types.
//!
//! This module defines the message format spoken with the node endpoint.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Request` | Local → Node | Method call |
//! | `Response` | Node → Local | Method result or error |
//! | `Notification` | Node → Local | Subscription push |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `request` | Request and Response types |
//! | `notification` | Notification type and incoming routing |

// ============================================================================
// Submodules
// ============================================================================

/// Server-pushed notifications.
pub mod notification;

/// Request and Response message types.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use notification::{Incoming, Notification, NotificationParams, SubscriptionKey};
pub use request::{JSONRPC_VERSION, Request, Response, RpcError};
