//! Immutable outgoing request.

use crate::descriptor::{MethodDescriptor, PathTemplate};
use crate::{ClientError, Context, Headers, Parameters, Result, path};
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Basic auth credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl Auth {
    /// Create credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Copy of the credentials with the password replaced by `***`.
    pub fn masked(&self) -> Self {
        Self {
            username: self.username.clone(),
            password: "***".to_string(),
        }
    }
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Changes applied by [`Request::enhance`].
#[derive(Debug, Clone, Default)]
pub struct RequestExtras {
    headers: Headers,
    params: Parameters,
    auth: Option<Auth>,
    body: Option<Value>,
    timeout: Option<Duration>,
    host: Option<String>,
    path: Option<String>,
    signal: Option<CancellationToken>,
}

impl RequestExtras {
    /// Create an empty set of changes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header, merged over the existing headers.
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Add headers, merged over the existing headers.
    pub fn headers(mut self, headers: Headers) -> Self {
        for (name, value) in headers {
            self.headers.insert(name.to_ascii_lowercase(), value);
        }
        self
    }

    /// Add a parameter, merged over the existing parameters.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Add parameters, merged over the existing parameters.
    pub fn params(mut self, params: Parameters) -> Self {
        self.params.extend(params);
        self
    }

    /// Replace the credentials.
    pub fn auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Replace the body.
    pub fn body(mut self, body: impl Into<Value>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Replace the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Replace the host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Replace the path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Replace the abort signal.
    pub fn signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// An outgoing request for one resource method.
///
/// Requests are never mutated; [`Request::enhance`] returns a new value.
#[derive(Clone)]
pub struct Request {
    descriptor: Arc<MethodDescriptor>,
    params: Parameters,
    context: Context,
    signal: Option<CancellationToken>,
}

impl Request {
    /// Create a request from a descriptor and call-time parameters.
    pub fn new(descriptor: Arc<MethodDescriptor>, params: Parameters) -> Self {
        Self {
            descriptor,
            params,
            context: Context::new(),
            signal: None,
        }
    }

    /// Attach a context map.
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Attach an abort signal.
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    /// The method descriptor this request was built from.
    pub fn descriptor(&self) -> &Arc<MethodDescriptor> {
        &self.descriptor
    }

    /// Raw call-time parameters, reserved attributes included.
    pub fn request_params(&self) -> &Parameters {
        &self.params
    }

    /// Side context shared with middleware.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Descriptor defaults merged with call-time parameters, reserved
    /// attributes excluded.
    pub fn params(&self) -> Parameters {
        let attributes = self.descriptor.attributes();
        self.descriptor
            .params()
            .iter()
            .chain(self.params.iter())
            .filter(|(key, _)| !attributes.is_reserved(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        self.descriptor.method()
    }

    /// Host without a trailing slash.
    pub fn host(&self) -> String {
        let override_host = if self.descriptor.allow_resource_host_override() {
            self.params
                .get(&self.descriptor.attributes().host)
                .and_then(Value::as_str)
                .filter(|host| !host.is_empty())
        } else {
            None
        };

        let host = override_host.unwrap_or(self.descriptor.host());
        host.strip_suffix('/').unwrap_or(host).to_string()
    }

    fn path_override(&self) -> Option<&str> {
        self.params
            .get(&self.descriptor.attributes().path)
            .and_then(Value::as_str)
            .filter(|path| !path.is_empty())
    }

    /// The path before interpolation, generated if the descriptor path is a
    /// function.
    pub fn path_template(&self) -> Result<String> {
        if let Some(path) = self.path_override() {
            return Ok(path.to_string());
        }

        match self.descriptor.path() {
            PathTemplate::Template(template) => Ok(template.clone()),
            PathTemplate::Generator(generator) => {
                let params = self.params();
                generator(&params).ok_or_else(|| ClientError::InvalidPath {
                    params: Value::Object(params).to_string(),
                })
            }
        }
    }

    /// Interpolated path with the leftover parameters as query string.
    pub fn path(&self) -> Result<String> {
        let template = self.path_template()?;
        path::resolve(
            &template,
            self.params(),
            self.descriptor.query_param_alias(),
            self.descriptor.parameter_encoder(),
        )
    }

    /// Full URL: host followed by path.
    pub fn url(&self) -> Result<String> {
        Ok(format!("{}{}", self.host(), self.path()?))
    }

    /// Descriptor headers merged with call-time headers, names lower-cased.
    pub fn headers(&self) -> Headers {
        let mut headers: Headers = self
            .descriptor
            .headers()
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
            .collect();

        if let Some(Value::Object(extra)) = self.params.get(&self.descriptor.attributes().headers) {
            for (name, value) in extra {
                if value.is_null() {
                    continue;
                }
                headers.insert(name.to_ascii_lowercase(), path::scalar_to_string(value));
            }
        }
        headers
    }

    /// Look up one header, case-insensitively.
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers().remove(&name.to_ascii_lowercase())
    }

    /// Request body.
    pub fn body(&self) -> Option<&Value> {
        self.params
            .get(&self.descriptor.attributes().body)
            .filter(|body| !body.is_null())
    }

    /// Basic auth credentials.
    pub fn auth(&self) -> Option<Auth> {
        self.params
            .get(&self.descriptor.attributes().auth)
            .and_then(|auth| serde_json::from_value(auth.clone()).ok())
    }

    /// Timeout, given in milliseconds by the timeout attribute.
    pub fn timeout(&self) -> Option<Duration> {
        self.params
            .get(&self.descriptor.attributes().timeout)
            .and_then(Value::as_u64)
            .map(Duration::from_millis)
    }

    /// Abort signal.
    pub fn signal(&self) -> Option<&CancellationToken> {
        self.signal.as_ref()
    }

    /// Copy of the request whose auth attribute has its password replaced
    /// by `***`, whether or not the attribute parses as [`Auth`].
    pub fn masked(&self) -> Self {
        Self {
            descriptor: Arc::clone(&self.descriptor),
            params: self.masked_params(),
            context: self.context.clone(),
            signal: self.signal.clone(),
        }
    }

    fn masked_params(&self) -> Parameters {
        let mut params = self.params.clone();
        if let Some(Value::Object(auth)) = params.get_mut(&self.descriptor.attributes().auth) {
            if let Some(password) = auth.get_mut("password") {
                *password = Value::String("***".to_string());
            }
        }
        params
    }

    /// Whether the response body is binary.
    pub fn is_binary(&self) -> bool {
        self.descriptor.binary()
    }

    /// Return a new request with `extras` applied and `context` merged.
    pub fn enhance(&self, extras: RequestExtras, context: Option<Context>) -> Self {
        let attributes = self.descriptor.attributes();
        let mut params = self.params.clone();

        let mut headers = match params.get(&attributes.headers) {
            Some(Value::Object(existing)) => existing.clone(),
            _ => serde_json::Map::new(),
        };
        for (name, value) in extras.headers {
            headers.insert(name, Value::String(value));
        }
        params.insert(attributes.headers.clone(), Value::Object(headers));

        params.extend(extras.params);

        if let Some(auth) = extras.auth {
            params.insert(
                attributes.auth.clone(),
                serde_json::json!({ "username": auth.username, "password": auth.password }),
            );
        }
        if let Some(body) = extras.body {
            params.insert(attributes.body.clone(), body);
        }
        if let Some(timeout) = extras.timeout {
            params.insert(
                attributes.timeout.clone(),
                Value::from(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)),
            );
        }
        if let Some(host) = extras.host {
            params.insert(attributes.host.clone(), Value::String(host));
        }
        if let Some(path) = extras.path {
            params.insert(attributes.path.clone(), Value::String(path));
        }

        let mut next_context = self.context.clone();
        if let Some(context) = context {
            next_context.extend(context);
        }

        Self {
            descriptor: Arc::clone(&self.descriptor),
            params,
            context: next_context,
            signal: extras.signal.or_else(|| self.signal.clone()),
        }
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("descriptor", &self.descriptor)
            .field("params", &self.masked_params())
            .field("context", &self.context)
            .field("signal", &self.signal)
            .finish()
    }
}
