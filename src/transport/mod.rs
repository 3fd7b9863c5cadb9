//! WebSocket transport layer.
//!
//! This module owns the single socket between the dashboard (Rust) and the
//! node endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐                       ┌─────────────────┐
//! │  TransportSession    │       WebSocket       │  Node endpoint  │
//! │  → Connector         │◄─────────────────────►│  (JSON-RPC)     │
//! │  → Connection        │   ws:// or wss://     │                 │
//! └──────────────────────┘                       └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `TransportSession::connect` - start an attempt tagged with a generation
//! 2. `Connector::open` - WebSocket handshake plus `rpc_methods` probe
//! 3. `Opened` - connection stored, [`RequestHandle`] can be built
//! 4. `Closed` / `Failed` - reported once, never retried here
//! 5. `TransportSession::disconnect` - cancel and close
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | WebSocket connection and event loop |
//! | `connector` | Socket opening and readiness probe |
//! | `handle` | View-facing request handle |
//! | `session` | Single-session lifecycle and events |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket connection and event loop.
pub mod connection;

/// Socket opening and readiness probe.
pub mod connector;

/// Request handle valid while the connection is ready.
pub mod handle;

/// Transport session lifecycle.
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::Connection;
pub use connector::{Connector, PROBE_METHOD, WsConnector};
pub use handle::{RequestHandle, RpcSubscription};
pub use session::{SessionEvent, SessionEventSender, TransportEvent, TransportSession};
