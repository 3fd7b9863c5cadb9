//! Extension bridge: discovers providers and reports the identity set.
//!
//! # Discovery
//!
//! 1. No provider installed: publish an update with `providers == 0`
//! 2. Otherwise ask every provider for authorization and accounts, concurrently
//! 3. Publish the merged list (provider order, then account order)
//! 4. Keep watching providers and republish the whole list on every change
//!
//! Updates go through a `tokio::sync::watch` channel. A reader that falls
//! behind only sees the newest list, which is the only one that matters.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::identifiers::Generation;
use crate::state::Identity;

use super::provider::{IdentityProvider, ProviderAccount, ProviderEnvironment};

// ============================================================================
// BridgeUpdate
// ============================================================================

/// One wholesale identity-set update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeUpdate {
    /// Discovery run that produced this update.
    pub generation: Generation,
    /// Number of providers that exist and answered.
    pub providers: usize,
    /// Complete identity list.
    pub identities: Vec<Identity>,
}

/// Receiver half for bridge updates.
pub type BridgeReceiver = watch::Receiver<Option<BridgeUpdate>>;

// ============================================================================
// ExtensionBridge
// ============================================================================

/// Discovers identity providers and publishes their accounts.
pub struct ExtensionBridge {
    environment: ProviderEnvironment,
    app_name: String,
    updates: watch::Sender<Option<BridgeUpdate>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for ExtensionBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionBridge")
            .field("environment", &self.environment)
            .field("app_name", &self.app_name)
            .finish_non_exhaustive()
    }
}

impl ExtensionBridge {
    /// Creates an idle bridge.
    #[must_use]
    pub fn new(environment: ProviderEnvironment, app_name: impl Into<String>) -> Self {
        let (updates, _) = watch::channel(None);
        Self {
            environment,
            app_name: app_name.into(),
            updates,
            task: Mutex::new(None),
        }
    }

    /// Returns a receiver for identity updates.
    #[must_use]
    pub fn subscribe(&self) -> BridgeReceiver {
        self.updates.subscribe()
    }

    /// Starts a discovery run, cancelling any previous one.
    pub fn discover(&self, generation: Generation) {
        let mut task = self.task.lock();
        if let Some(previous) = task.take() {
            previous.abort();
        }

        debug!(%generation, providers = self.environment.providers().len(), "Discovery started");

        *task = Some(tokio::spawn(run_discovery(
            self.environment.clone(),
            self.app_name.clone(),
            generation,
            self.updates.clone(),
        )));
    }

    /// Cancels discovery and provider watching. Idempotent.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            debug!("Discovery stopped");
        }
    }
}

impl Drop for ExtensionBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Discovery Task
// ============================================================================

/// What one provider yielded during discovery.
struct ProviderLoad {
    identities: Vec<Identity>,
    watcher: Option<watch::Receiver<Vec<ProviderAccount>>>,
}

async fn run_discovery(
    environment: ProviderEnvironment,
    app_name: String,
    generation: Generation,
    updates: watch::Sender<Option<BridgeUpdate>>,
) {
    let providers = environment.providers().to_vec();
    let publish = |lists: &[Vec<Identity>]| {
        let identities: Vec<Identity> = lists.iter().flatten().cloned().collect();
        debug!(%generation, count = identities.len(), "Identities updated");
        updates.send_replace(Some(BridgeUpdate {
            generation,
            providers: providers.len(),
            identities,
        }));
    };

    if providers.is_empty() {
        info!("No identity provider in environment");
        publish(&[]);
        return;
    }

    let loads = join_all(providers.iter().map(|p| load_provider(p, &app_name))).await;

    let (change_tx, mut change_rx) = mpsc::unbounded_channel();
    let mut watchers = JoinSet::new();
    let mut lists = Vec::with_capacity(loads.len());

    for (index, load) in loads.into_iter().enumerate() {
        lists.push(load.identities);
        if let Some(mut watcher) = load.watcher {
            let change_tx = change_tx.clone();
            watchers.spawn(async move {
                while watcher.changed().await.is_ok() {
                    let accounts = watcher.borrow_and_update().clone();
                    if change_tx.send((index, accounts)).is_err() {
                        break;
                    }
                }
            });
        }
    }
    drop(change_tx);

    info!(
        providers = providers.len(),
        identities = lists.iter().map(Vec::len).sum::<usize>(),
        "Identity providers loaded"
    );
    publish(&lists);

    while let Some((index, accounts)) = change_rx.recv().await {
        let tag = providers[index].tag();
        debug!(provider = tag, count = accounts.len(), "Provider accounts changed");
        lists[index] = to_identities(accounts, tag);
        publish(&lists);
    }
}

/// Authorizes one provider and reads its accounts. Failures are soft.
async fn load_provider(provider: &Arc<dyn IdentityProvider>, app_name: &str) -> ProviderLoad {
    let tag = provider.tag();

    if let Err(e) = provider.enable(app_name).await {
        warn!(provider = tag, error = %e, "Provider not authorized");
        return ProviderLoad {
            identities: Vec::new(),
            watcher: None,
        };
    }

    // Subscribe before reading so a change in between is not lost.
    let watcher = provider.watch();

    let identities = match provider.accounts().await {
        Ok(accounts) => to_identities(accounts, tag),
        Err(e) => {
            warn!(provider = tag, error = %e, "Provider failed to enumerate accounts");
            Vec::new()
        }
    };

    ProviderLoad {
        identities,
        watcher,
    }
}

fn to_identities(accounts: Vec<ProviderAccount>, tag: &str) -> Vec<Identity> {
    accounts
        .into_iter()
        .map(|account| account.into_identity(tag))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::timeout;

    use crate::error::{Error, Result};
    use crate::extension::DevelopmentProvider;

    const WAIT: Duration = Duration::from_secs(5);

    /// Provider whose account list can be changed from the test.
    struct FakeWallet {
        tag: &'static str,
        deny: bool,
        accounts: watch::Sender<Vec<ProviderAccount>>,
    }

    impl FakeWallet {
        fn new(tag: &'static str, accounts: &[&str]) -> Arc<Self> {
            let list = accounts.iter().map(|a| ProviderAccount::new(*a, None)).collect();
            let (accounts, _) = watch::channel(list);
            Arc::new(Self {
                tag,
                deny: false,
                accounts,
            })
        }

        fn denying(tag: &'static str) -> Arc<Self> {
            let (accounts, _) = watch::channel(vec![ProviderAccount::new("5Hidden", None)]);
            Arc::new(Self {
                tag,
                deny: true,
                accounts,
            })
        }
    }

    #[async_trait]
    impl IdentityProvider for FakeWallet {
        fn tag(&self) -> &str {
            self.tag
        }

        async fn enable(&self, _app_name: &str) -> Result<()> {
            if self.deny {
                Err(Error::authorization_denied(self.tag))
            } else {
                Ok(())
            }
        }

        async fn accounts(&self) -> Result<Vec<ProviderAccount>> {
            Ok(self.accounts.borrow().clone())
        }

        fn watch(&self) -> Option<watch::Receiver<Vec<ProviderAccount>>> {
            Some(self.accounts.subscribe())
        }
    }

    async fn next_update(rx: &mut BridgeReceiver) -> BridgeUpdate {
        timeout(WAIT, rx.changed())
            .await
            .expect("update in time")
            .expect("bridge alive");
        rx.borrow_and_update().clone().expect("update present")
    }

    fn addresses(update: &BridgeUpdate) -> Vec<&str> {
        update.identities.iter().map(|i| i.address().as_str()).collect()
    }

    #[tokio::test]
    async fn test_empty_environment_reports_zero_providers() {
        let bridge = ExtensionBridge::new(ProviderEnvironment::empty(), "test");
        let mut rx = bridge.subscribe();

        bridge.discover(Generation::ZERO.next());

        let update = next_update(&mut rx).await;
        assert_eq!(update.providers, 0);
        assert!(update.identities.is_empty());
    }

    #[tokio::test]
    async fn test_merges_providers_in_order() {
        let environment = ProviderEnvironment::empty()
            .with_provider(FakeWallet::new("wallet", &["5W1", "5W2"]))
            .with_provider(Arc::new(DevelopmentProvider));
        let bridge = ExtensionBridge::new(environment, "test");
        let mut rx = bridge.subscribe();

        bridge.discover(Generation::ZERO.next());

        let update = next_update(&mut rx).await;
        assert_eq!(update.providers, 2);
        assert_eq!(update.identities.len(), 8);
        assert_eq!(&addresses(&update)[..2], &["5W1", "5W2"]);
        assert_eq!(update.identities[2].source(), "development");
    }

    #[tokio::test]
    async fn test_denied_provider_is_soft() {
        let environment = ProviderEnvironment::empty().with_provider(FakeWallet::denying("wallet"));
        let bridge = ExtensionBridge::new(environment, "test");
        let mut rx = bridge.subscribe();

        bridge.discover(Generation::ZERO.next());

        let update = next_update(&mut rx).await;
        assert_eq!(update.providers, 1);
        assert!(update.identities.is_empty());
    }

    #[tokio::test]
    async fn test_grant_change_replaces_list() {
        let wallet = FakeWallet::new("wallet", &["5W1"]);
        let environment = ProviderEnvironment::empty().with_provider(wallet.clone());
        let bridge = ExtensionBridge::new(environment, "test");
        let mut rx = bridge.subscribe();

        bridge.discover(Generation::ZERO.next());
        assert_eq!(addresses(&next_update(&mut rx).await), vec!["5W1"]);

        wallet
            .accounts
            .send_replace(vec![ProviderAccount::new("5W9", Some("new"))]);

        let update = next_update(&mut rx).await;
        assert_eq!(addresses(&update), vec!["5W9"]);
    }

    #[tokio::test]
    async fn test_stop_ends_watching() {
        let wallet = FakeWallet::new("wallet", &["5W1"]);
        let environment = ProviderEnvironment::empty().with_provider(wallet.clone());
        let bridge = ExtensionBridge::new(environment, "test");
        let mut rx = bridge.subscribe();

        bridge.discover(Generation::ZERO.next());
        next_update(&mut rx).await;

        bridge.stop();
        tokio::task::yield_now().await;
        wallet.accounts.send_replace(Vec::new());

        assert!(timeout(Duration::from_millis(200), rx.changed()).await.is_err());
    }
}
