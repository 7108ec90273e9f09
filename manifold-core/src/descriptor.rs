//! Per resource-method configuration.

use crate::{Headers, Parameters};
use http::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Function producing a path from the call parameters.
pub type PathGenerator = Arc<dyn Fn(&Parameters) -> Option<String> + Send + Sync>;

/// Path of a resource method: a `{segment}` template or a generator.
#[derive(Clone)]
pub enum PathTemplate {
    /// A template such as `/users/{id}` or `/posts/{slug?}`.
    Template(String),
    /// A function computing the path from the parameters.
    Generator(PathGenerator),
}

impl PathTemplate {
    /// Build a generated path.
    pub fn generator<F>(generator: F) -> Self
    where
        F: Fn(&Parameters) -> Option<String> + Send + Sync + 'static,
    {
        Self::Generator(Arc::new(generator))
    }
}

impl Default for PathTemplate {
    fn default() -> Self {
        Self::Template(String::new())
    }
}

impl From<&str> for PathTemplate {
    fn from(path: &str) -> Self {
        Self::Template(path.to_string())
    }
}

impl From<String> for PathTemplate {
    fn from(path: String) -> Self {
        Self::Template(path)
    }
}

impl fmt::Debug for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Template(path) => f.debug_tuple("Template").field(path).finish(),
            Self::Generator(_) => f.write_str("Generator(<fn>)"),
        }
    }
}

/// Encoder applied to interpolated segments and query keys/values.
#[derive(Clone)]
pub struct ParameterEncoder(Arc<dyn Fn(&str) -> String + Send + Sync>);

impl ParameterEncoder {
    /// Create an encoder from a function.
    pub fn new<F>(encoder: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self(Arc::new(encoder))
    }

    /// Encode one value.
    pub fn encode(&self, value: &str) -> String {
        (self.0)(value)
    }
}

impl Default for ParameterEncoder {
    fn default() -> Self {
        Self::new(crate::path::encode_uri_component)
    }
}

impl fmt::Debug for ParameterEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ParameterEncoder(<fn>)")
    }
}

/// Names of the call parameters with a special meaning.
///
/// These keys are never interpolated into the path nor sent as query
/// parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attributes {
    /// Parameter carrying the request body.
    pub body: String,
    /// Parameter carrying extra headers.
    pub headers: String,
    /// Parameter carrying basic auth credentials.
    pub auth: String,
    /// Parameter carrying the timeout in milliseconds.
    pub timeout: String,
    /// Parameter overriding the host.
    pub host: String,
    /// Parameter overriding the path.
    pub path: String,
    /// Parameter reserved for the abort signal.
    pub signal: String,
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            body: "body".to_string(),
            headers: "headers".to_string(),
            auth: "auth".to_string(),
            timeout: "timeout".to_string(),
            host: "host".to_string(),
            path: "path".to_string(),
            signal: "signal".to_string(),
        }
    }
}

impl Attributes {
    /// Check if a parameter key is reserved.
    pub fn is_reserved(&self, key: &str) -> bool {
        key == self.body
            || key == self.headers
            || key == self.auth
            || key == self.timeout
            || key == self.host
            || key == self.path
            || key == self.signal
    }
}

/// Immutable configuration of one resource method.
///
/// Shared behind an `Arc` by every [`crate::Request`] built for the method.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    host: String,
    allow_resource_host_override: bool,
    path: PathTemplate,
    method: Method,
    headers: Headers,
    params: Parameters,
    query_param_alias: BTreeMap<String, String>,
    attributes: Attributes,
    binary: bool,
    parameter_encoder: ParameterEncoder,
}

impl MethodDescriptor {
    /// Create a new descriptor builder.
    pub fn builder(host: impl Into<String>, path: impl Into<PathTemplate>) -> MethodDescriptorBuilder {
        MethodDescriptorBuilder::new(host.into(), path.into())
    }

    /// Configured host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Whether the host parameter may override the host.
    pub fn allow_resource_host_override(&self) -> bool {
        self.allow_resource_host_override
    }

    /// Configured path.
    pub fn path(&self) -> &PathTemplate {
        &self.path
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Default headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Default parameters.
    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// Query parameter aliases, keyed by parameter name.
    pub fn query_param_alias(&self) -> &BTreeMap<String, String> {
        &self.query_param_alias
    }

    /// Reserved parameter names.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Whether the response body is binary.
    pub fn binary(&self) -> bool {
        self.binary
    }

    /// Encoder for path segments and query strings.
    pub fn parameter_encoder(&self) -> &ParameterEncoder {
        &self.parameter_encoder
    }
}

/// Builder for [`MethodDescriptor`].
#[derive(Debug)]
pub struct MethodDescriptorBuilder {
    descriptor: MethodDescriptor,
}

impl MethodDescriptorBuilder {
    fn new(host: String, path: PathTemplate) -> Self {
        Self {
            descriptor: MethodDescriptor {
                host,
                allow_resource_host_override: false,
                path,
                method: Method::GET,
                headers: Headers::new(),
                params: Parameters::new(),
                query_param_alias: BTreeMap::new(),
                attributes: Attributes::default(),
                binary: false,
                parameter_encoder: ParameterEncoder::default(),
            },
        }
    }

    /// Set the HTTP method.
    pub fn method(mut self, method: Method) -> Self {
        self.descriptor.method = method;
        self
    }

    /// Allow the host parameter to override the host.
    pub fn allow_resource_host_override(mut self, allow: bool) -> Self {
        self.descriptor.allow_resource_host_override = allow;
        self
    }

    /// Add a default header. Names are stored lower-cased.
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.descriptor
            .headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Add default headers.
    pub fn headers(mut self, headers: Headers) -> Self {
        for (name, value) in headers {
            self.descriptor.headers.insert(name.to_ascii_lowercase(), value);
        }
        self
    }

    /// Add a default parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.descriptor.params.insert(key.into(), value.into());
        self
    }

    /// Add default parameters.
    pub fn params(mut self, params: Parameters) -> Self {
        self.descriptor.params.extend(params);
        self
    }

    /// Send `key` as `alias` in the query string.
    pub fn query_param_alias(mut self, key: impl Into<String>, alias: impl Into<String>) -> Self {
        self.descriptor.query_param_alias.insert(key.into(), alias.into());
        self
    }

    /// Replace the query parameter aliases.
    pub fn query_param_aliases(mut self, aliases: BTreeMap<String, String>) -> Self {
        self.descriptor.query_param_alias = aliases;
        self
    }

    /// Set the reserved parameter names.
    pub fn attributes(mut self, attributes: Attributes) -> Self {
        self.descriptor.attributes = attributes;
        self
    }

    /// Mark the response body as binary.
    pub fn binary(mut self, binary: bool) -> Self {
        self.descriptor.binary = binary;
        self
    }

    /// Set the parameter encoder.
    pub fn parameter_encoder(mut self, encoder: ParameterEncoder) -> Self {
        self.descriptor.parameter_encoder = encoder;
        self
    }

    /// Build the descriptor.
    pub fn build(self) -> MethodDescriptor {
        self.descriptor
    }
}
