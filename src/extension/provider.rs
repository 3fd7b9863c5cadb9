//! Identity provider contract.
//!
//! A provider is a local credential holder (a wallet extension, a hardware
//! signer bridge, the development keyring). The bridge only observes what a
//! provider reports; prompting the user is the provider's business.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::Result;
use crate::state::Identity;

// ============================================================================
// ProviderAccount
// ============================================================================

/// One account as enumerated by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAccount {
    /// Account address.
    pub address: String,

    /// Optional human-readable name.
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
}

impl ProviderAccount {
    /// Creates an account record.
    #[inline]
    #[must_use]
    pub fn new(address: impl Into<String>, display_name: Option<&str>) -> Self {
        Self {
            address: address.into(),
            display_name: display_name.map(str::to_string),
        }
    }

    /// Converts into an identity tagged with its provider.
    #[inline]
    #[must_use]
    pub fn into_identity(self, source: &str) -> Identity {
        Identity::new(self.address, self.display_name, source)
    }
}

// ============================================================================
// IdentityProvider
// ============================================================================

/// A local source of signing identities.
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Provider tag carried by every identity it produces.
    fn tag(&self) -> &str;

    /// Requests authorization for `app_name`.
    ///
    /// May wait on a user prompt. Returns
    /// [`Error::AuthorizationDenied`](crate::Error::AuthorizationDenied) when
    /// the user declines.
    async fn enable(&self, app_name: &str) -> Result<()>;

    /// Enumerates the accounts the app is allowed to see.
    async fn accounts(&self) -> Result<Vec<ProviderAccount>>;

    /// Stream of replacement account lists after grants change.
    ///
    /// Each value is the full list; providers that never change return `None`.
    fn watch(&self) -> Option<watch::Receiver<Vec<ProviderAccount>>> {
        None
    }
}

// ============================================================================
// ProviderEnvironment
// ============================================================================

/// The providers injected into the host environment.
#[derive(Clone, Default)]
pub struct ProviderEnvironment {
    providers: Vec<Arc<dyn IdentityProvider>>,
}

impl fmt::Debug for ProviderEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.providers.iter().map(|p| p.tag()))
            .finish()
    }
}

impl ProviderEnvironment {
    /// An environment with no providers.
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Adds a provider.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Providers in injection order.
    #[inline]
    #[must_use]
    pub fn providers(&self) -> &[Arc<dyn IdentityProvider>] {
        &self.providers
    }

    /// Returns `true` if nothing is installed.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
