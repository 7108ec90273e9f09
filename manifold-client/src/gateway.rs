//! Gateway contract: the transport behind the pipeline.

use crate::{ClientError, Headers, ParameterEncoder, Request, Response, Result, to_query_string};
use async_trait::async_trait;
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};

/// Options handed to every gateway instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayConfiguration {
    /// Send PUT/PATCH/DELETE as POST with a method override.
    pub emulate_http: bool,
    /// Report timeouts as 408 instead of 400.
    pub enable_http408_on_timeouts: bool,
    /// Timeout used when the request does not carry one.
    pub default_timeout: Option<Duration>,
}

impl GatewayConfiguration {
    /// Apply `overrides` on top of this configuration.
    pub fn merged(&self, overrides: &GatewayOverrides) -> Self {
        Self {
            emulate_http: overrides.emulate_http.unwrap_or(self.emulate_http),
            enable_http408_on_timeouts: overrides
                .enable_http408_on_timeouts
                .unwrap_or(self.enable_http408_on_timeouts),
            default_timeout: overrides
                .timeout_ms
                .map(Duration::from_millis)
                .or(self.default_timeout),
        }
    }
}

/// Partial gateway configuration from a manifest or a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewayOverrides {
    /// Override for [`GatewayConfiguration::emulate_http`].
    pub emulate_http: Option<bool>,
    /// Override for [`GatewayConfiguration::enable_http408_on_timeouts`].
    pub enable_http408_on_timeouts: Option<bool>,
    /// Override for [`GatewayConfiguration::default_timeout`], in milliseconds.
    pub timeout_ms: Option<u64>,
}

impl GatewayOverrides {
    /// Layer `other` on top of these overrides; set fields in `other` win.
    pub fn and(&self, other: &GatewayOverrides) -> Self {
        Self {
            emulate_http: other.emulate_http.or(self.emulate_http),
            enable_http408_on_timeouts: other
                .enable_http408_on_timeouts
                .or(self.enable_http408_on_timeouts),
            timeout_ms: other.timeout_ms.or(self.timeout_ms),
        }
    }
}

/// Transport performing the HTTP exchange for one finalized request.
///
/// Implementations provide [`Gateway::perform`]; the verb methods and
/// [`Gateway::call`] are built on it.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// The request being dispatched.
    fn request(&self) -> &Request;

    /// Effective gateway configuration.
    fn options(&self) -> &GatewayConfiguration;

    /// Perform the exchange with `method`.
    ///
    /// Return the response whatever its status; transport failures may be
    /// returned as errors and are turned into failure responses by
    /// [`Gateway::call`].
    async fn perform(&self, method: &Method) -> Result<Response>;

    /// Perform a GET.
    async fn get(&self) -> Result<Response> {
        self.perform(&Method::GET).await
    }

    /// Perform a HEAD.
    async fn head(&self) -> Result<Response> {
        self.perform(&Method::HEAD).await
    }

    /// Perform a POST.
    async fn post(&self) -> Result<Response> {
        self.perform(&Method::POST).await
    }

    /// Perform a PUT.
    async fn put(&self) -> Result<Response> {
        self.perform(&Method::PUT).await
    }

    /// Perform a PATCH.
    async fn patch(&self) -> Result<Response> {
        self.perform(&Method::PATCH).await
    }

    /// Perform a DELETE.
    async fn delete(&self) -> Result<Response> {
        self.perform(&Method::DELETE).await
    }

    /// Dispatch the request and sort the outcome.
    ///
    /// Resolves with responses whose status is a success and fails with
    /// [`ClientError::Response`] otherwise. Transport errors become a 400
    /// (or 408) failure response.
    async fn call(&self) -> Result<Response> {
        let started = Instant::now();
        let method = self.request().method().clone();

        let outcome = if should_emulate_http(self.options(), &method) {
            self.post().await
        } else {
            match method {
                Method::GET => self.get().await,
                Method::HEAD => self.head().await,
                Method::POST => self.post().await,
                Method::PUT => self.put().await,
                Method::PATCH => self.patch().await,
                Method::DELETE => self.delete().await,
                other => self.perform(&other).await,
            }
        };

        let elapsed = started.elapsed();
        match outcome {
            Ok(response) => dispatch_response(response.with_time_elapsed(elapsed)),
            Err(ClientError::Response(response)) => {
                Err(ClientError::response((*response).with_time_elapsed(elapsed)))
            }
            Err(error) => {
                let response =
                    client_error_response(self.request(), self.options(), &error.to_string(), false);
                Err(ClientError::response(response.with_time_elapsed(elapsed)))
            }
        }
    }
}

/// Creates a gateway for each dispatch.
pub trait GatewayFactory: Send + Sync {
    /// Create the gateway for `request`.
    fn create(&self, request: Request, options: GatewayConfiguration) -> Box<dyn Gateway>;
}

impl<F> GatewayFactory for F
where
    F: Fn(Request, GatewayConfiguration) -> Box<dyn Gateway> + Send + Sync,
{
    fn create(&self, request: Request, options: GatewayConfiguration) -> Box<dyn Gateway> {
        self(request, options)
    }
}

/// Check if PUT/PATCH/DELETE must travel as POST.
pub fn should_emulate_http(options: &GatewayConfiguration, method: &Method) -> bool {
    options.emulate_http && matches!(*method, Method::PUT | Method::PATCH | Method::DELETE)
}

/// Route a response: successes resolve, everything else fails.
pub fn dispatch_response(response: Response) -> Result<Response> {
    if response.success() {
        Ok(response)
    } else {
        Err(ClientError::response(response))
    }
}

/// Failure response for a transport error.
///
/// Status 400, or 408 for timeouts when the configuration asks for it.
pub fn client_error_response(
    request: &Request,
    options: &GatewayConfiguration,
    message: &str,
    timed_out: bool,
) -> Response {
    let status = if timed_out && options.enable_http408_on_timeouts {
        408
    } else {
        400
    };
    Response::failure(request, status, format!("Gateway error: {message}"))
}

/// Body and extra headers to send for `request`.
///
/// String bodies go out as-is. Other bodies are form encoded, with a
/// form content type unless one is set. When emulating HTTP the original
/// method travels in `_method` and `x-http-method-override`.
pub fn prepare_body(request: &Request, options: &GatewayConfiguration) -> (Option<String>, Headers) {
    let mut headers = request.headers();
    let method = request.method();
    let mut body = request.body().cloned();

    if should_emulate_http(options, method) {
        let mut fields = match body.take() {
            Some(Value::Object(fields)) => fields,
            Some(other) => {
                headers.insert("x-http-method-override".to_string(), method.to_string());
                return (Some(body_to_string(&other)), headers);
            }
            None => serde_json::Map::new(),
        };
        fields.insert("_method".to_string(), Value::String(method.to_string()));
        headers.insert("x-http-method-override".to_string(), method.to_string());
        body = Some(Value::Object(fields));
    }

    let Some(body) = body else {
        return (None, headers);
    };

    match body {
        Value::String(text) => (Some(text), headers),
        Value::Object(fields) => {
            headers
                .entry("content-type".to_string())
                .or_insert_with(|| "application/x-www-form-urlencoded;charset=utf-8".to_string());
            (Some(to_query_string(&fields, &ParameterEncoder::default())), headers)
        }
        other => (Some(body_to_string(&other)), headers),
    }
}

fn body_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
