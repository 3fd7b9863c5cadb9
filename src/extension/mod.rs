//! Identity provider integration.
//!
//! Discovers locally installed identity providers (wallet extensions, the
//! development keyring), asks them for authorization and reports the full
//! list of identities they expose.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `bridge` | Discovery task and identity updates |
//! | `development` | Built-in development accounts |
//! | `provider` | Provider trait and environment |

// ============================================================================
// Submodules
// ============================================================================

/// Discovery task and identity updates.
pub mod bridge;

/// Built-in development accounts.
pub mod development;

/// Provider trait and environment.
pub mod provider;

// ============================================================================
// Re-exports
// ============================================================================

pub use bridge::{BridgeReceiver, BridgeUpdate, ExtensionBridge};
pub use development::{DEVELOPMENT_TAG, DevelopmentProvider};
pub use provider::{IdentityProvider, ProviderAccount, ProviderEnvironment};
