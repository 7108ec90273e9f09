//! Manifest: the declarative description of a client.
//!
//! A manifest names resources, each with named methods. It can be built in
//! code with [`Manifest::builder`] or loaded from JSON or TOML:
//!
//! ```json
//! {
//!   "host": "https://api.example.com",
//!   "resources": {
//!     "User": {
//!       "all": { "path": "/users" },
//!       "byId": { "path": "/users/{id}" },
//!       "create": { "method": "post", "path": "/users" }
//!     }
//!   }
//! }
//! ```

use crate::gateway::{GatewayFactory, GatewayOverrides};
use crate::middleware::MiddlewareFactory;
use crate::{Attributes, ClientError, Headers, ParameterEncoder, Parameters, PathGenerator, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Methods of one resource, by name.
pub type ResourceMethods = BTreeMap<String, ResourceDefinition>;

/// Definition of one resource method.
#[derive(Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResourceDefinition {
    /// Path template, e.g. `/users/{id}`.
    pub path: String,
    /// HTTP method name; GET when empty.
    pub method: String,
    /// Host for this method only.
    pub host: Option<String>,
    /// Default headers.
    pub headers: Headers,
    /// Default parameters.
    pub params: Parameters,
    /// Renames applied to query string keys.
    pub query_param_alias: BTreeMap<String, String>,
    /// Whether the payload is binary.
    pub binary: bool,
    /// Reserved attribute names for this method.
    pub attributes: Option<Attributes>,
    /// Gateway overrides for this method.
    pub gateway_configs: GatewayOverrides,
    /// Generated path, used instead of `path` when set.
    #[serde(skip)]
    pub path_generator: Option<PathGenerator>,
    /// Middleware for this method, innermost in the stack.
    #[serde(skip)]
    pub middleware: Vec<Arc<dyn MiddlewareFactory>>,
}

impl ResourceDefinition {
    /// Create a GET definition for `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set the HTTP method.
    pub fn method(mut self, method: http::Method) -> Self {
        self.method = method.to_string();
        self
    }

    /// Set the host for this method.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Add a default header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Add a default parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Rename `key` to `alias` in the query string.
    pub fn query_param_alias(mut self, key: impl Into<String>, alias: impl Into<String>) -> Self {
        self.query_param_alias.insert(key.into(), alias.into());
        self
    }

    /// Mark the payload as binary.
    pub fn binary(mut self, binary: bool) -> Self {
        self.binary = binary;
        self
    }

    /// Use custom attribute names.
    pub fn attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Set gateway overrides.
    pub fn gateway_configs(mut self, overrides: GatewayOverrides) -> Self {
        self.gateway_configs = overrides;
        self
    }

    /// Generate the path from the parameters.
    pub fn path_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&Parameters) -> Option<String> + Send + Sync + 'static,
    {
        self.path_generator = Some(Arc::new(generator));
        self
    }

    /// Add a middleware for this method.
    pub fn middleware(mut self, middleware: Arc<dyn MiddlewareFactory>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub(crate) fn http_method(&self) -> Result<http::Method> {
        if self.method.is_empty() {
            return Ok(http::Method::GET);
        }
        http::Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ClientError::Manifest(format!("invalid HTTP method \"{}\"", self.method)))
    }
}

impl fmt::Debug for ResourceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let middleware: Vec<&str> = self.middleware.iter().map(|m| m.name()).collect();
        f.debug_struct("ResourceDefinition")
            .field("path", &self.path)
            .field("method", &self.method)
            .field("host", &self.host)
            .field("headers", &self.headers)
            .field("params", &self.params)
            .field("query_param_alias", &self.query_param_alias)
            .field("binary", &self.binary)
            .field("attributes", &self.attributes)
            .field("gateway_configs", &self.gateway_configs)
            .field("path_generator", &self.path_generator.as_ref().map(|_| "<fn>"))
            .field("middleware", &middleware)
            .finish()
    }
}

/// Declarative description of a client.
#[derive(Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Manifest {
    /// Identifier handed to middleware factories.
    pub client_id: Option<String>,
    /// Default host.
    pub host: String,
    /// Let the host attribute override the host per call.
    pub allow_resource_host_override: bool,
    /// Skip the global middleware for this client.
    pub ignore_global_middleware: bool,
    /// Gateway overrides for every method.
    pub gateway_configs: GatewayOverrides,
    /// Resources by name.
    pub resources: BTreeMap<String, ResourceMethods>,
    /// Gateway for this client, in place of the configured one.
    #[serde(skip)]
    pub gateway: Option<Arc<dyn GatewayFactory>>,
    /// Client middleware, between resource and global middleware.
    #[serde(skip)]
    pub middleware: Vec<Arc<dyn MiddlewareFactory>>,
    /// Encoder for path segments and query values.
    #[serde(skip)]
    pub parameter_encoder: ParameterEncoder,
}

impl fmt::Debug for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let middleware: Vec<&str> = self.middleware.iter().map(|m| m.name()).collect();
        f.debug_struct("Manifest")
            .field("client_id", &self.client_id)
            .field("host", &self.host)
            .field("allow_resource_host_override", &self.allow_resource_host_override)
            .field("ignore_global_middleware", &self.ignore_global_middleware)
            .field("gateway_configs", &self.gateway_configs)
            .field("resources", &self.resources)
            .field("gateway", &self.gateway.as_ref().map(|_| "<factory>"))
            .field("middleware", &middleware)
            .finish()
    }
}

/// Manifest file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    /// JSON.
    Json,
    /// TOML.
    Toml,
}

impl ManifestFormat {
    /// Detect the format from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }
}

impl Manifest {
    /// Create a new manifest builder.
    pub fn builder() -> ManifestBuilder {
        ManifestBuilder::default()
    }

    /// Parse a JSON manifest.
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| ClientError::Manifest(e.to_string()))
    }

    /// Parse a TOML manifest.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ClientError::Manifest(e.to_string()))
    }

    /// Parse a manifest in `format`.
    pub fn parse(content: &str, format: ManifestFormat) -> Result<Self> {
        match format {
            ManifestFormat::Json => Self::from_json(content),
            ManifestFormat::Toml => Self::from_toml(content),
        }
    }

    /// Load a manifest file, picking the format from its extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(ManifestFormat::from_extension)
            .ok_or_else(|| {
                ClientError::Manifest(format!("unsupported manifest format: {}", path.display()))
            })?;

        let content = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Manifest(format!("failed to read {}: {e}", path.display())))?;
        Self::parse(&content, format)
    }

    /// Look up a resource method.
    pub fn definition(&self, resource: &str, method: &str) -> Result<&ResourceDefinition> {
        let methods = self
            .resources
            .get(resource)
            .ok_or_else(|| ClientError::UnknownResource(resource.to_string()))?;
        methods.get(method).ok_or_else(|| ClientError::UnknownMethod {
            resource: resource.to_string(),
            method: method.to_string(),
        })
    }
}

/// Builder for [`Manifest`].
#[derive(Debug, Default)]
pub struct ManifestBuilder {
    manifest: Manifest,
}

impl ManifestBuilder {
    /// Set the default host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.manifest.host = host.into();
        self
    }

    /// Set the client identifier.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.manifest.client_id = Some(client_id.into());
        self
    }

    /// Allow per-call host overrides.
    pub fn allow_resource_host_override(mut self, allow: bool) -> Self {
        self.manifest.allow_resource_host_override = allow;
        self
    }

    /// Skip the global middleware.
    pub fn ignore_global_middleware(mut self, ignore: bool) -> Self {
        self.manifest.ignore_global_middleware = ignore;
        self
    }

    /// Set gateway overrides for every method.
    pub fn gateway_configs(mut self, overrides: GatewayOverrides) -> Self {
        self.manifest.gateway_configs = overrides;
        self
    }

    /// Use `gateway` for this client.
    pub fn gateway(mut self, gateway: Arc<dyn GatewayFactory>) -> Self {
        self.manifest.gateway = Some(gateway);
        self
    }

    /// Add a client middleware.
    pub fn middleware(mut self, middleware: Arc<dyn MiddlewareFactory>) -> Self {
        self.manifest.middleware.push(middleware);
        self
    }

    /// Set the parameter encoder.
    pub fn parameter_encoder(mut self, encoder: ParameterEncoder) -> Self {
        self.manifest.parameter_encoder = encoder;
        self
    }

    /// Add a resource method.
    pub fn resource(
        mut self,
        resource: impl Into<String>,
        method: impl Into<String>,
        definition: ResourceDefinition,
    ) -> Self {
        self.manifest
            .resources
            .entry(resource.into())
            .or_default()
            .insert(method.into(), definition);
        self
    }

    /// Build the manifest.
    pub fn build(self) -> Manifest {
        self.manifest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::request_hook;
    use http::Method;

    const JSON: &str = r#"{
        "clientId": "github",
        "host": "https://api.github.com",
        "gatewayConfigs": { "timeoutMs": 2000, "enableHttp408OnTimeouts": true },
        "resources": {
            "Repo": {
                "byName": { "path": "/repos/{owner}/{name}", "headers": { "Accept": "application/json" } },
                "create": { "method": "post", "path": "/user/repos", "queryParamAlias": { "perPage": "per_page" } }
            }
        }
    }"#;

    #[test]
    fn test_from_json() {
        let manifest = Manifest::from_json(JSON).unwrap();
        assert_eq!(manifest.client_id.as_deref(), Some("github"));
        assert_eq!(manifest.gateway_configs.timeout_ms, Some(2000));
        assert_eq!(manifest.gateway_configs.enable_http408_on_timeouts, Some(true));

        let create = manifest.definition("Repo", "create").unwrap();
        assert_eq!(create.http_method().unwrap(), Method::POST);
        assert_eq!(create.query_param_alias.get("perPage").map(String::as_str), Some("per_page"));

        let by_name = manifest.definition("Repo", "byName").unwrap();
        assert_eq!(by_name.http_method().unwrap(), Method::GET);
    }

    #[test]
    fn test_from_toml() {
        let manifest = Manifest::from_toml(
            r#"
            host = "https://api.example.com"
            ignoreGlobalMiddleware = true

            [resources.User.all]
            path = "/users"

            [resources.User.remove]
            path = "/users/{id}"
            method = "DELETE"
            "#,
        )
        .unwrap();

        assert!(manifest.ignore_global_middleware);
        assert_eq!(
            manifest.definition("User", "remove").unwrap().http_method().unwrap(),
            Method::DELETE
        );
    }

    #[test]
    fn test_unknown_lookups() {
        let manifest = Manifest::from_json(JSON).unwrap();
        assert!(matches!(manifest.definition("User", "all"), Err(ClientError::UnknownResource(_))));
        assert!(matches!(
            manifest.definition("Repo", "remove"),
            Err(ClientError::UnknownMethod { .. })
        ));
    }

    #[test]
    fn test_invalid_manifest() {
        assert!(matches!(Manifest::from_json("{"), Err(ClientError::Manifest(_))));
        assert!(matches!(
            Manifest::from_file("manifest.yaml"),
            Err(ClientError::Manifest(_))
        ));
        tokio_test::assert_ok!(ResourceDefinition::new("/").method(Method::GET).http_method());
        let mut bad = ResourceDefinition::new("/");
        bad.method = "NOT A METHOD".to_string();
        assert!(bad.http_method().is_err());
    }

    #[test]
    fn test_builder() {
        let manifest = Manifest::builder()
            .host("http://example.org")
            .client_id("example")
            .middleware(request_hook("Noop", |request| request))
            .resource("User", "byId", ResourceDefinition::new("/users/{id}"))
            .resource(
                "User",
                "create",
                ResourceDefinition::new("/users").method(Method::POST),
            )
            .build();

        assert_eq!(manifest.resources["User"].len(), 2);
        assert_eq!(manifest.middleware.len(), 1);
        assert!(format!("{manifest:?}").contains("Noop"));
    }
}
