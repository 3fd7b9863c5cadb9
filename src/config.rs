//! Node configuration and its builder.
//!
//! Values are layered, lowest precedence first:
//!
//! 1. Defaults ([`DEFAULT_ENDPOINT`], timeouts, app name)
//! 2. Environment (`PROVIDER_SOCKET`, `APP_NAME`, `DEVELOPMENT_KEYRING`)
//! 3. A `?rpc=` override taken from the page URL
//!
//! # Example
//!
//! ```
//! use node_readiness::NodeConfig;
//!
//! # fn example() -> node_readiness::Result<()> {
//! let config = NodeConfig::builder()
//!     .endpoint("ws://127.0.0.1:9944")
//!     .app_name("my-dashboard")
//!     .build()?;
//! assert_eq!(config.endpoint().as_str(), "ws://127.0.0.1:9944/");
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::env;
use std::time::Duration;

use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::state::Endpoint;

// ============================================================================
// Constants
// ============================================================================

/// Endpoint used when nothing else is configured.
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:9944";

/// Application name shown in provider authorization prompts.
pub const DEFAULT_APP_NAME: &str = "node-dashboard";

/// Default bound on socket open plus readiness probe.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on a single JSON-RPC call.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variable holding the endpoint.
pub const ENV_PROVIDER_SOCKET: &str = "PROVIDER_SOCKET";

/// Environment variable holding the application name.
pub const ENV_APP_NAME: &str = "APP_NAME";

/// Environment variable enabling the development keyring.
pub const ENV_DEVELOPMENT_KEYRING: &str = "DEVELOPMENT_KEYRING";

/// Query parameter that overrides the endpoint.
const RPC_QUERY_PARAM: &str = "rpc";

// ============================================================================
// NodeConfig
// ============================================================================

/// Validated configuration for one shared context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    endpoint: Endpoint,
    app_name: String,
    development_keyring: bool,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl NodeConfig {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> NodeConfigBuilder {
        NodeConfigBuilder::new()
    }

    /// Builds a configuration from defaults and the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEndpoint`] or [`Error::Config`] if an
    /// environment value is malformed.
    pub fn from_env() -> Result<Self> {
        NodeConfigBuilder::new().with_env()?.build()
    }

    /// Node endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Application name presented to identity providers.
    #[inline]
    #[must_use]
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Whether the development accounts are offered.
    #[inline]
    #[must_use]
    pub fn development_keyring(&self) -> bool {
        self.development_keyring
    }

    /// Bound on socket open plus readiness probe.
    #[inline]
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Bound on a single JSON-RPC call.
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

// ============================================================================
// NodeConfigBuilder
// ============================================================================

/// Builder for [`NodeConfig`].
#[derive(Debug, Default, Clone)]
pub struct NodeConfigBuilder {
    /// Raw endpoint text.
    endpoint: Option<String>,
    /// Application name.
    app_name: Option<String>,
    /// Development keyring toggle.
    development_keyring: bool,
    /// Connect timeout.
    connect_timeout: Option<Duration>,
    /// Request timeout.
    request_timeout: Option<Duration>,
}

impl NodeConfigBuilder {
    /// Creates a builder with no configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the node endpoint (`ws://` or `wss://`).
    #[inline]
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the application name.
    #[inline]
    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    /// Enables or disables the development keyring.
    #[inline]
    #[must_use]
    pub fn development_keyring(mut self, enabled: bool) -> Self {
        self.development_keyring = enabled;
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the per-request timeout.
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Layers values from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `DEVELOPMENT_KEYRING` is not a boolean.
    pub fn with_env(self) -> Result<Self> {
        self.with_vars(|key| env::var(key).ok())
    }

    /// Layers values from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `DEVELOPMENT_KEYRING` is not a boolean.
    pub fn with_vars<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(ENV_PROVIDER_SOCKET).filter(|v| !v.trim().is_empty()) {
            debug!(endpoint = %endpoint, "Endpoint taken from environment");
            self.endpoint = Some(endpoint);
        }

        if let Some(name) = lookup(ENV_APP_NAME).filter(|v| !v.trim().is_empty()) {
            self.app_name = Some(name);
        }

        if let Some(flag) = lookup(ENV_DEVELOPMENT_KEYRING) {
            self.development_keyring = parse_flag(ENV_DEVELOPMENT_KEYRING, &flag)?;
        }

        Ok(self)
    }

    /// Applies a `?rpc=<endpoint>` override from a page URL, if present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`] if `page_url` itself is not a URL.
    pub fn with_query_override(mut self, page_url: &str) -> Result<Self> {
        let page = Url::parse(page_url)?;

        if let Some((_, endpoint)) = page
            .query_pairs()
            .find(|(key, value)| key == RPC_QUERY_PARAM && !value.is_empty())
        {
            debug!(endpoint = %endpoint, "Endpoint overridden by query string");
            self.endpoint = Some(endpoint.into_owned());
        }

        Ok(self)
    }

    /// Validates and builds the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidEndpoint`] if the endpoint is not a `ws`/`wss` URL
    /// - [`Error::Config`] if a timeout is zero or the app name is blank
    pub fn build(self) -> Result<NodeConfig> {
        let endpoint = self.validate_endpoint()?;
        let app_name = self.validate_app_name()?;
        let connect_timeout = validate_timeout(
            "connect_timeout",
            self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
        )?;
        let request_timeout = validate_timeout(
            "request_timeout",
            self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        )?;

        Ok(NodeConfig {
            endpoint,
            app_name,
            development_keyring: self.development_keyring,
            connect_timeout,
            request_timeout,
        })
    }
}

// ============================================================================
// Validation
// ============================================================================

impl NodeConfigBuilder {
    /// Validates the endpoint configuration.
    fn validate_endpoint(&self) -> Result<Endpoint> {
        let raw = self.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
        Endpoint::parse(raw)
    }

    /// Validates the app name configuration.
    fn validate_app_name(&self) -> Result<String> {
        let name = self.app_name.as_deref().unwrap_or(DEFAULT_APP_NAME).trim();
        if name.is_empty() {
            return Err(Error::config("app_name must not be blank"));
        }
        Ok(name.to_string())
    }
}

fn validate_timeout(name: &str, timeout: Duration) -> Result<Duration> {
    if timeout.is_zero() {
        return Err(Error::config(format!("{name} must be greater than zero")));
    }
    Ok(timeout)
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(Error::config(format!(
            "{name} must be a boolean, got '{other}'"
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use rustc_hash::FxHashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: FxHashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = NodeConfigBuilder::new().build().unwrap();
        assert_eq!(config.endpoint().as_str(), "ws://127.0.0.1:9944/");
        assert_eq!(config.app_name(), DEFAULT_APP_NAME);
        assert!(!config.development_keyring());
        assert_eq!(config.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.request_timeout(), DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn test_env_layer() {
        let config = NodeConfigBuilder::new()
            .with_vars(vars(&[
                (ENV_PROVIDER_SOCKET, "wss://rpc.example.org"),
                (ENV_APP_NAME, "explorer"),
                (ENV_DEVELOPMENT_KEYRING, "true"),
            ]))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(config.endpoint().as_str(), "wss://rpc.example.org/");
        assert_eq!(config.app_name(), "explorer");
        assert!(config.development_keyring());
    }

    #[test]
    fn test_env_rejects_bad_flag() {
        let result =
            NodeConfigBuilder::new().with_vars(vars(&[(ENV_DEVELOPMENT_KEYRING, "maybe")]));
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_query_override_beats_env() {
        let config = NodeConfigBuilder::new()
            .with_vars(vars(&[(ENV_PROVIDER_SOCKET, "ws://env-host:9944")]))
            .unwrap()
            .with_query_override("https://dash.local/?rpc=wss%3A%2F%2Fquery-host%3A443")
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(config.endpoint().url().host_str(), Some("query-host"));
    }

    #[test]
    fn test_query_without_rpc_keeps_endpoint() {
        let config = NodeConfigBuilder::new()
            .endpoint("ws://explicit:9944")
            .with_query_override("https://dash.local/balances?tab=2")
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(config.endpoint().url().host_str(), Some("explicit"));
    }

    #[test]
    fn test_rejects_http_endpoint() {
        let result = NodeConfigBuilder::new().endpoint("http://node:9933").build();
        assert!(matches!(result, Err(Error::InvalidEndpoint { .. })));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let result = NodeConfigBuilder::new()
            .connect_timeout(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_rejects_blank_app_name() {
        let result = NodeConfigBuilder::new().app_name("   ").build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }
}
