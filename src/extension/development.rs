//! Development keyring.
//!
//! Offers the well-known development accounts of a local test chain. Enabled
//! through `DEVELOPMENT_KEYRING`; never prompts.

use async_trait::async_trait;

use crate::error::Result;

use super::provider::{IdentityProvider, ProviderAccount};

/// Provider tag for development accounts.
pub const DEVELOPMENT_TAG: &str = "development";

/// Well-known development accounts (SS58, generic prefix).
const DEV_ACCOUNTS: &[(&str, &str)] = &[
    ("alice", "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY"),
    ("bob", "5FHneW46xGXgs5mUiveU4sbTyGBzmstUspZC92UhjJM694ty"),
    ("charlie", "5FLSigC9HGRKVhB9FiEo4Y3koPsNmBmLJbpXg2mp1hXcS59Y"),
    ("dave", "5DAAnrj7VHTznn2AWBemMuyBwZWs6FNFjdyVXUeYum3PTXFy"),
    ("eve", "5HGjWAeFDfFCWPsjFQdVV2Msvz2XtMktvgocEZcCj68kUMaw"),
    ("ferdie", "5CiPPseXPECbkjWCa6MnjNokrgYjMqmKndv2rSnekmSK2DjL"),
];

/// The development accounts as a provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct DevelopmentProvider;

#[async_trait]
impl IdentityProvider for DevelopmentProvider {
    fn tag(&self) -> &str {
        DEVELOPMENT_TAG
    }

    async fn enable(&self, _app_name: &str) -> Result<()> {
        Ok(())
    }

    async fn accounts(&self) -> Result<Vec<ProviderAccount>> {
        Ok(DEV_ACCOUNTS
            .iter()
            .map(|(name, address)| ProviderAccount::new(*address, Some(*name)))
            .collect())
    }
}
