//! Node readiness - connection and identity readiness for node dashboards.
//!
//! This library decides when a blockchain node dashboard may render live
//! data. It owns the WebSocket JSON-RPC connection to the node and the set of
//! local identity providers, and folds both into one published snapshot.
//!
//! # Architecture
//!
//! ```text
//!  TransportSession ──SessionEvent──┐
//!                                   ▼
//!                        ReadinessCoordinator ──► SharedContext ──► views
//!                                   ▲             (snapshot, handle)
//!  ExtensionBridge ───BridgeUpdate──┘
//! ```
//!
//! Key design principles:
//!
//! - One [`SharedContext`] per application, created at mount, torn down at unmount
//! - The coordinator is pure: inputs in, actions out
//! - Every connect attempt and discovery run carries a generation; stale
//!   completions are discarded
//! - No automatic retry; [`SharedContext::retry_connection`] is the only way
//!   out of an error
//!
//! # Quick Start
//!
//! ```no_run
//! use node_readiness::{EffectiveState, NodeConfig, ProviderEnvironment, Result, SharedContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = NodeConfig::builder()
//!         .with_env()?
//!         .development_keyring(true)
//!         .build()?;
//!
//!     let context = SharedContext::mount(config, ProviderEnvironment::empty())?;
//!
//!     let _subscription = context.subscribe(|snapshot| match snapshot.effective() {
//!         EffectiveState::Ready => println!("ready"),
//!         other => println!("{}", other.message().unwrap_or_default()),
//!     });
//!
//!     tokio::signal::ctrl_c().await?;
//!     context.teardown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | [`NodeConfig`] and its builder |
//! | [`context`] | [`SharedContext`] and subscriptions |
//! | [`coordinator`] | Pure readiness state machine |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`extension`] | Identity providers and the extension bridge |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | JSON-RPC 2.0 message types |
//! | [`state`] | Snapshot data model |
//! | [`transport`] | WebSocket session, connection and request handle |

// ============================================================================
// Modules
// ============================================================================

/// Node configuration.
///
/// Use [`NodeConfig::builder()`] to layer defaults, environment and overrides.
pub mod config;

/// Shared readiness context.
pub mod context;

/// Readiness state machine.
///
/// Pure: no I/O, no timers. [`context`] drives it.
pub mod coordinator;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Identity provider integration.
pub mod extension;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// JSON-RPC 2.0 message types.
pub mod protocol;

/// Readiness data model.
pub mod state;

/// WebSocket transport layer.
///
/// Owns the node socket, request correlation and the request handle.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Configuration
pub use config::{NodeConfig, NodeConfigBuilder};

// Context types
pub use context::{SharedContext, SnapshotCallback, Subscription};

// Coordinator types
pub use coordinator::{Action, Input, ReadinessCoordinator};

// Error types
pub use error::{Error, Result};

// Extension types
pub use extension::{
    BridgeUpdate, DevelopmentProvider, ExtensionBridge, IdentityProvider, ProviderAccount,
    ProviderEnvironment,
};

// Identifier types
pub use identifiers::{ContextId, Generation, RequestId, SubscriptionId};

// State types
pub use state::{
    Address, CloseReason, ConnectionFailure, ConnectionState, EffectiveState, Endpoint,
    FailureCause, Identity, KeyringState, LoadingReason, ReadinessSnapshot,
};

// Transport types
pub use transport::{Connector, RequestHandle, RpcSubscription, WsConnector};
