//! Client configuration.

use crate::gateway::{GatewayConfiguration, GatewayFactory};
use crate::middleware::MiddlewareFactory;
use crate::Context;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default cap on pipeline runs per invocation.
pub const DEFAULT_MAX_MIDDLEWARE_STACK_EXECUTION_ALLOWED: usize = 2;

/// Defaults shared by every client built on the same [`SharedConfigs`].
#[derive(Clone)]
pub struct Configs {
    /// Gateway used when the manifest does not name one.
    pub gateway: Option<Arc<dyn GatewayFactory>>,
    /// Base gateway configuration.
    pub gateway_configs: GatewayConfiguration,
    /// Global middleware, appended after client middleware.
    pub middleware: Vec<Arc<dyn MiddlewareFactory>>,
    /// Context handed to middleware factories.
    pub context: Context,
    /// Maximum pipeline runs per invocation, `renew` included.
    pub max_middleware_stack_execution_allowed: usize,
}

impl Default for Configs {
    fn default() -> Self {
        Self {
            gateway: None,
            gateway_configs: GatewayConfiguration::default(),
            middleware: Vec::new(),
            context: Context::new(),
            max_middleware_stack_execution_allowed: DEFAULT_MAX_MIDDLEWARE_STACK_EXECUTION_ALLOWED,
        }
    }
}

impl fmt::Debug for Configs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let middleware: Vec<&str> = self.middleware.iter().map(|m| m.name()).collect();
        f.debug_struct("Configs")
            .field("gateway", &self.gateway.as_ref().map(|_| "<factory>"))
            .field("gateway_configs", &self.gateway_configs)
            .field("middleware", &middleware)
            .field("context", &self.context)
            .field(
                "max_middleware_stack_execution_allowed",
                &self.max_middleware_stack_execution_allowed,
            )
            .finish()
    }
}

impl Configs {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigsBuilder {
        ConfigsBuilder::default()
    }
}

/// Builder for [`Configs`].
#[derive(Debug, Default)]
pub struct ConfigsBuilder {
    configs: Configs,
}

impl ConfigsBuilder {
    /// Set the default gateway.
    pub fn gateway(mut self, gateway: Arc<dyn GatewayFactory>) -> Self {
        self.configs.gateway = Some(gateway);
        self
    }

    /// Set the base gateway configuration.
    pub fn gateway_configs(mut self, gateway_configs: GatewayConfiguration) -> Self {
        self.configs.gateway_configs = gateway_configs;
        self
    }

    /// Add a global middleware.
    pub fn middleware(mut self, middleware: Arc<dyn MiddlewareFactory>) -> Self {
        self.configs.middleware.push(middleware);
        self
    }

    /// Add a context entry.
    pub fn context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.configs.context.insert(key.into(), value.into());
        self
    }

    /// Set the maximum pipeline runs per invocation.
    pub fn max_middleware_stack_execution_allowed(mut self, max: usize) -> Self {
        self.configs.max_middleware_stack_execution_allowed = max;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Configs {
        self.configs
    }
}

/// Configuration shared between clients.
///
/// Single writer, many readers. A dispatch reads the values current when
/// its gateway is created, so changes made while calls are in flight are
/// visible to those calls' later dispatches.
#[derive(Clone, Default)]
pub struct SharedConfigs {
    inner: Arc<RwLock<Configs>>,
}

impl SharedConfigs {
    /// Share `configs`.
    pub fn new(configs: Configs) -> Self {
        Self {
            inner: Arc::new(RwLock::new(configs)),
        }
    }

    /// Copy of the current configuration.
    pub fn snapshot(&self) -> Configs {
        self.inner.read().clone()
    }

    /// Read the current configuration.
    pub fn read<R>(&self, f: impl FnOnce(&Configs) -> R) -> R {
        f(&self.inner.read())
    }

    /// Change the configuration in place.
    pub fn update(&self, f: impl FnOnce(&mut Configs)) {
        f(&mut self.inner.write());
    }

    /// Replace the configuration.
    pub fn replace(&self, configs: Configs) {
        *self.inner.write() = configs;
    }

    /// Restore the defaults.
    pub fn reset(&self) {
        self.replace(Configs::default());
    }
}

impl fmt::Debug for SharedConfigs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedConfigs").field(&*self.inner.read()).finish()
    }
}

impl From<Configs> for SharedConfigs {
    fn from(configs: Configs) -> Self {
        Self::new(configs)
    }
}

/// Settings for the `reqwest` client behind [`crate::ReqwestGateway`].
#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// How long idle pooled connections are kept.
    pub pool_idle_timeout: Duration,
    /// Maximum idle connections per host.
    pub pool_max_idle_per_host: usize,
    /// User agent string.
    pub user_agent: String,
    /// Accept gzip and brotli encoded responses.
    pub compression: bool,
    /// Redirects to follow; `None` disables following.
    pub max_redirects: Option<usize>,
}

impl Default for HttpGatewayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 32,
            user_agent: format!("manifold-client/{}", env!("CARGO_PKG_VERSION")),
            compression: true,
            max_redirects: Some(10),
        }
    }
}

impl HttpGatewayConfig {
    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the pool idle timeout.
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = timeout;
        self
    }

    /// Set the maximum idle connections per host.
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = max;
        self
    }

    /// Set the user agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Enable or disable response compression.
    pub fn compression(mut self, enable: bool) -> Self {
        self.compression = enable;
        self
    }

    /// Set how many redirects to follow.
    pub fn max_redirects(mut self, max: Option<usize>) -> Self {
        self.max_redirects = max;
        self
    }
}
