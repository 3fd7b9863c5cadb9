//! Shared readiness context.
//!
//! One [`SharedContext`] per application. It owns the transport session and
//! the extension bridge through a single driver task, holds the current
//! [`ReadinessSnapshot`] and, while ready, the live [`RequestHandle`].
//!
//! # Architecture
//!
//! ```text
//!  retry / switch / select          ┌────────────────────┐
//! ───────────────────────────────►  │    driver task     │
//!                                   │  ReadinessCoordinator
//! TransportSession ──SessionEvent─► │  → Vec<Action>     │ ──► Published
//! ExtensionBridge ──BridgeUpdate──► │                    │     (snapshot, handle,
//!                                   └────────────────────┘      subscribers)
//! ```
//!
//! The driver task is the only writer. Subscribers are called on that task,
//! in registration order, outside of any lock. A subscriber that panics is
//! logged and removed; the driver keeps running.
//!
//! # Example
//!
//! ```no_run
//! use node_readiness::{NodeConfig, ProviderEnvironment, SharedContext};
//!
//! # async fn example() -> node_readiness::Result<()> {
//! let context = SharedContext::mount(NodeConfig::from_env()?, ProviderEnvironment::empty())?;
//!
//! let _subscription = context.subscribe(|snapshot| {
//!     println!("{:?}", snapshot.effective());
//! });
//!
//! if let Some(handle) = context.active_request_handle() {
//!     let chain = handle.request("system_chain", serde_json::json!([])).await?;
//!     println!("chain: {chain}");
//! }
//!
//! context.teardown().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::NodeConfig;
use crate::coordinator::{Action, Input, ReadinessCoordinator};
use crate::error::{Error, Result};
use crate::extension::{BridgeReceiver, DevelopmentProvider, ExtensionBridge, ProviderEnvironment};
use crate::identifiers::{ContextId, SubscriptionId};
use crate::state::{Address, EffectiveState, Endpoint, ReadinessSnapshot};
use crate::transport::{Connector, RequestHandle, SessionEvent, TransportSession, WsConnector};

// ============================================================================
// Types
// ============================================================================

/// Callback invoked for every published snapshot.
pub type SnapshotCallback = Arc<dyn Fn(&ReadinessSnapshot) + Send + Sync>;

/// Commands queued from views to the driver task.
#[derive(Debug)]
enum ContextCommand {
    Retry,
    SwitchEndpoint(Endpoint),
    SelectIdentity(Address),
    Teardown,
}

// ============================================================================
// Published
// ============================================================================

/// State readable from any thread, written only by the driver task.
struct Published {
    snapshot: RwLock<Arc<ReadinessSnapshot>>,
    handle: RwLock<Option<RequestHandle>>,
    subscribers: Mutex<Vec<(SubscriptionId, SnapshotCallback)>>,
    next_subscriber: AtomicU64,
}

impl Published {
    fn new(initial: ReadinessSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(initial)),
            handle: RwLock::new(None),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber: AtomicU64::new(1),
        }
    }

    /// Stores the snapshot, then notifies subscribers in registration order.
    fn publish(&self, snapshot: ReadinessSnapshot) {
        let snapshot = Arc::new(snapshot);
        *self.snapshot.write() = Arc::clone(&snapshot);

        trace!(
            sequence = snapshot.sequence(),
            connection = snapshot.connection().label(),
            keyring = snapshot.keyring().label(),
            "Snapshot published"
        );

        let callbacks: Vec<(SubscriptionId, SnapshotCallback)> = self
            .subscribers
            .lock()
            .iter()
            .map(|(id, callback)| (*id, Arc::clone(callback)))
            .collect();

        for (id, callback) in callbacks {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(&snapshot))) {
                warn!(
                    %id,
                    sequence = snapshot.sequence(),
                    panic = panic_message(payload.as_ref()),
                    "Subscriber panicked, removing it"
                );
                self.remove_subscriber(id);
            }
        }
    }

    fn add_subscriber(&self, callback: SnapshotCallback) -> SubscriptionId {
        let id = SubscriptionId::from_u64(self.next_subscriber.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().push((id, callback));
        id
    }

    fn remove_subscriber(&self, id: SubscriptionId) {
        self.subscribers.lock().retain(|(existing, _)| *existing != id);
    }
}

/// Best-effort text of a caught panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

// ============================================================================
// Subscription
// ============================================================================

/// Registration of a snapshot callback. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: SubscriptionId,
    published: Weak<Published>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Subscription {
    /// Subscription identifier.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Stops delivery. Same as dropping.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(published) = self.published.upgrade() {
            published.remove_subscriber(self.id);
            trace!(id = %self.id, "Unsubscribed");
        }
    }
}

// ============================================================================
// SharedContext
// ============================================================================

/// Internal shared state for a context.
struct ContextInner {
    id: ContextId,
    published: Arc<Published>,
    commands: mpsc::UnboundedSender<ContextCommand>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

/// Application-wide readiness holder.
///
/// Cheap to clone; all clones share one driver task.
#[derive(Clone)]
pub struct SharedContext {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for SharedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.current_snapshot();
        f.debug_struct("SharedContext")
            .field("id", &self.inner.id)
            .field("endpoint", snapshot.endpoint())
            .field("connection", &snapshot.connection().label())
            .field("keyring", &snapshot.keyring().label())
            .finish_non_exhaustive()
    }
}

impl SharedContext {
    /// Mounts a context that connects over WebSocket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if called outside a tokio runtime.
    pub fn mount(config: NodeConfig, environment: ProviderEnvironment) -> Result<Self> {
        Self::mount_with(config, environment, Arc::new(WsConnector))
    }

    /// Mounts a context with a custom connector.
    ///
    /// The first snapshot (`Connecting` / `Loading`) is already published
    /// when this returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if called outside a tokio runtime.
    pub fn mount_with(
        config: NodeConfig,
        environment: ProviderEnvironment,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        if Handle::try_current().is_err() {
            return Err(Error::config("SharedContext must be mounted inside a tokio runtime"));
        }

        let environment = if config.development_keyring() {
            environment.with_provider(Arc::new(DevelopmentProvider))
        } else {
            environment
        };

        let id = ContextId::generate();
        let coordinator = ReadinessCoordinator::new(config.endpoint().clone());
        let published = Arc::new(Published::new(coordinator.initial_snapshot()));

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let session = TransportSession::new(connector, config.connect_timeout(), event_tx);
        let bridge = ExtensionBridge::new(environment, config.app_name());
        let identities = bridge.subscribe();

        let mut driver = Driver {
            coordinator,
            session,
            bridge,
            published: Arc::clone(&published),
            request_timeout: config.request_timeout(),
        };
        driver.apply(Input::Mount);

        let task = tokio::spawn(driver.run(command_rx, event_rx, identities));

        info!(
            %id,
            endpoint = %config.endpoint(),
            app_name = config.app_name(),
            "Shared context mounted"
        );

        Ok(Self {
            inner: Arc::new(ContextInner {
                id,
                published,
                commands: command_tx,
                driver: Mutex::new(Some(task)),
            }),
        })
    }

    // ========================================================================
    // Readers
    // ========================================================================

    /// Returns this context's unique ID.
    #[inline]
    #[must_use]
    pub fn context_id(&self) -> ContextId {
        self.inner.id
    }

    /// Returns the latest published snapshot.
    #[must_use]
    pub fn current_snapshot(&self) -> Arc<ReadinessSnapshot> {
        Arc::clone(&self.inner.published.snapshot.read())
    }

    /// Returns the rendering decision for the latest snapshot.
    #[must_use]
    pub fn effective_state(&self) -> EffectiveState {
        self.current_snapshot().effective()
    }

    /// Returns the request handle while the connection is ready.
    #[must_use]
    pub fn active_request_handle(&self) -> Option<RequestHandle> {
        if !self.current_snapshot().is_interactive() {
            return None;
        }
        self.inner
            .published
            .handle
            .read()
            .as_ref()
            .filter(|handle| handle.is_valid())
            .cloned()
    }

    /// Registers a callback for every future snapshot.
    ///
    /// The callback is not called with the current snapshot; read
    /// [`current_snapshot`](Self::current_snapshot) for that.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ReadinessSnapshot) + Send + Sync + 'static,
    {
        let id = self.inner.published.add_subscriber(Arc::new(callback));
        trace!(%id, "Subscribed");
        Subscription {
            id,
            published: Arc::downgrade(&self.inner.published),
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Retries the connection. A no-op while connecting or ready.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ContextClosed`] after teardown.
    pub fn retry_connection(&self) -> Result<()> {
        self.send(ContextCommand::Retry)
    }

    /// Connects to another node endpoint.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidEndpoint`] if `endpoint` is not a ws/wss URL
    /// - [`Error::ContextClosed`] after teardown
    pub fn switch_endpoint(&self, endpoint: &str) -> Result<()> {
        let endpoint = Endpoint::parse(endpoint)?;
        self.send(ContextCommand::SwitchEndpoint(endpoint))
    }

    /// Selects the current account. Ignored if the address is not listed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ContextClosed`] after teardown.
    pub fn select_identity(&self, address: Address) -> Result<()> {
        self.send(ContextCommand::SelectIdentity(address))
    }

    /// Closes the session, stops the bridge and waits for the driver to stop.
    ///
    /// Idempotent.
    pub async fn teardown(&self) {
        if self.inner.commands.send(ContextCommand::Teardown).is_err() {
            trace!(id = %self.inner.id, "Teardown after driver stopped");
        }

        let task = self.inner.driver.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(id = %self.inner.id, error = %e, "Driver task ended abnormally");
        }
    }

    fn send(&self, command: ContextCommand) -> Result<()> {
        self.inner
            .commands
            .send(command)
            .map_err(|_| Error::ContextClosed)
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Owns the coordinator and executes its actions.
struct Driver {
    coordinator: ReadinessCoordinator,
    session: TransportSession,
    bridge: ExtensionBridge,
    published: Arc<Published>,
    request_timeout: Duration,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ContextCommand>,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
        mut identities: BridgeReceiver,
    ) {
        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(ContextCommand::Retry) => self.apply(Input::Retry),
                    Some(ContextCommand::SwitchEndpoint(endpoint)) => {
                        self.apply(Input::SwitchEndpoint(endpoint));
                    }
                    Some(ContextCommand::SelectIdentity(address)) => {
                        self.apply(Input::SelectIdentity(address));
                    }
                    Some(ContextCommand::Teardown) | None => {
                        self.apply(Input::Teardown);
                        break;
                    }
                },

                Some(event) = events.recv() => self.apply(Input::Transport(event)),

                Ok(()) = identities.changed() => {
                    let update = identities.borrow_and_update().clone();
                    if let Some(update) = update {
                        self.apply(Input::Identities(update));
                    }
                }
            }
        }

        info!("Shared context torn down");
    }

    fn apply(&mut self, input: Input) {
        for action in self.coordinator.handle(input) {
            self.execute(action);
        }
    }

    fn execute(&mut self, action: Action) {
        match action {
            Action::Connect {
                endpoint,
                generation,
            } => {
                if !self.session.connect(endpoint, generation) {
                    debug!(%generation, "Session kept its active attempt");
                }
            }

            Action::Disconnect => self.session.disconnect(),

            Action::Discover { generation } => self.bridge.discover(generation),

            Action::InstallHandle { generation } => match self.session.connection(generation) {
                Some(connection) => {
                    let handle = RequestHandle::new(
                        connection,
                        self.coordinator.endpoint().clone(),
                        generation,
                        self.request_timeout,
                    );
                    *self.published.handle.write() = Some(handle);
                }
                None => trace!(%generation, "Connection gone before handle install"),
            },

            Action::InvalidateHandle => {
                if let Some(handle) = self.published.handle.write().take() {
                    handle.invalidate();
                }
            }

            Action::Publish(snapshot) => self.published.publish(snapshot),

            Action::StopBridge => self.bridge.stop(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
