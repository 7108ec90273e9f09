//! Built-in middleware.

use crate::middleware::{Abort, Middleware, MiddlewareFactory, MiddlewareParams, Next, Renew};
use crate::{Auth, ClientError, Request, RequestExtras, Response, ResponseExtras, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Content type set by [`EncodeJson`].
pub const CONTENT_TYPE_JSON: &str = "application/json;charset=utf-8";

/// Serializes object and array bodies as JSON.
///
/// Bodies that are already strings, and requests that carry a content
/// type, are left alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodeJson;

impl MiddlewareFactory for EncodeJson {
    fn name(&self) -> &str {
        "EncodeJsonMiddleware"
    }

    fn create(&self, _params: &MiddlewareParams) -> Box<dyn Middleware> {
        Box::new(*self)
    }
}

#[async_trait]
impl Middleware for EncodeJson {
    async fn prepare_request(&self, next: Next<Request>, _abort: Abort) -> Result<Request> {
        let request = next.run().await?;

        let encoded = match request.body() {
            Some(body @ (Value::Object(_) | Value::Array(_))) if request.header("content-type").is_none() => {
                serde_json::to_string(body)?
            }
            _ => return Ok(request),
        };

        Ok(request.enhance(
            RequestExtras::new()
                .header("content-type", CONTENT_TYPE_JSON)
                .body(encoded),
            None,
        ))
    }
}

/// Supplies credentials to calls that did not bring their own.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    auth: Auth,
}

impl BasicAuth {
    /// Use `auth` as the default credentials.
    pub fn new(auth: Auth) -> Self {
        Self { auth }
    }
}

impl MiddlewareFactory for BasicAuth {
    fn name(&self) -> &str {
        "BasicAuthMiddleware"
    }

    fn create(&self, _params: &MiddlewareParams) -> Box<dyn Middleware> {
        Box::new(self.clone())
    }
}

#[async_trait]
impl Middleware for BasicAuth {
    async fn prepare_request(&self, next: Next<Request>, _abort: Abort) -> Result<Request> {
        let request = next.run().await?;
        if request.auth().is_some() {
            return Ok(request);
        }
        Ok(request.enhance(RequestExtras::new().auth(self.auth.clone()), None))
    }
}

/// Applies a default timeout to calls that did not set one.
#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    timeout: Duration,
}

impl Timeout {
    /// Use `timeout` as the default.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl MiddlewareFactory for Timeout {
    fn name(&self) -> &str {
        "TimeoutMiddleware"
    }

    fn create(&self, _params: &MiddlewareParams) -> Box<dyn Middleware> {
        Box::new(*self)
    }
}

#[async_trait]
impl Middleware for Timeout {
    async fn prepare_request(&self, next: Next<Request>, _abort: Abort) -> Result<Request> {
        let request = next.run().await?;
        if request.timeout().is_some() {
            return Ok(request);
        }
        Ok(request.enhance(RequestExtras::new().timeout(self.timeout), None))
    }
}

/// Header stamped with the dispatch start, in milliseconds since the epoch.
pub const HEADER_STARTED_AT: &str = "x-started-at";
/// Header stamped with the response arrival, in milliseconds since the epoch.
pub const HEADER_ENDED_AT: &str = "x-ended-at";
/// Header carrying the round trip, in milliseconds.
pub const HEADER_DURATION: &str = "x-duration";

/// Measures how long each call takes.
///
/// The request gets `x-started-at`; the response, successful or not, gets
/// `x-started-at`, `x-ended-at` and `x-duration`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestDuration;

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}

impl RequestDuration {
    fn stamp(response: Response) -> Response {
        let ended_at = now_millis();
        let started_at = response
            .request()
            .header(HEADER_STARTED_AT)
            .and_then(|value| value.parse::<u128>().ok())
            .unwrap_or(ended_at);

        response.enhance(
            ResponseExtras::new()
                .header(HEADER_STARTED_AT, started_at.to_string())
                .header(HEADER_ENDED_AT, ended_at.to_string())
                .header(HEADER_DURATION, ended_at.saturating_sub(started_at).to_string()),
        )
    }
}

impl MiddlewareFactory for RequestDuration {
    fn name(&self) -> &str {
        "DurationMiddleware"
    }

    fn create(&self, _params: &MiddlewareParams) -> Box<dyn Middleware> {
        Box::new(*self)
    }
}

#[async_trait]
impl Middleware for RequestDuration {
    async fn prepare_request(&self, next: Next<Request>, _abort: Abort) -> Result<Request> {
        let request = next.run().await?;
        Ok(request.enhance(
            RequestExtras::new().header(HEADER_STARTED_AT, now_millis().to_string()),
            None,
        ))
    }

    async fn response(&self, next: Next<Response>, _renew: Renew) -> Result<Response> {
        match next.run().await {
            Ok(response) => Ok(Self::stamp(response)),
            Err(ClientError::Response(response)) => Err(ClientError::response(Self::stamp(*response))),
            Err(error) => Err(error),
        }
    }
}

/// Emits `tracing` events for every call.
///
/// Successful responses are logged at debug level, failures at warn.
#[derive(Debug, Clone, Copy, Default)]
pub struct Log {
    log_headers: bool,
}

impl Log {
    /// Create a new logging middleware.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also log headers, at trace level.
    pub fn with_headers(mut self) -> Self {
        self.log_headers = true;
        self
    }
}

impl MiddlewareFactory for Log {
    fn name(&self) -> &str {
        "LogMiddleware"
    }

    fn create(&self, _params: &MiddlewareParams) -> Box<dyn Middleware> {
        Box::new(*self)
    }
}

#[async_trait]
impl Middleware for Log {
    async fn prepare_request(&self, next: Next<Request>, _abort: Abort) -> Result<Request> {
        let request = next.run().await?;

        tracing::debug!(
            method = %request.method(),
            url = %request.url().unwrap_or_default(),
            "Sending request"
        );
        if self.log_headers {
            for (name, value) in request.headers() {
                tracing::trace!(header = %name, value = %value, "Request header");
            }
        }

        Ok(request)
    }

    async fn response(&self, next: Next<Response>, _renew: Renew) -> Result<Response> {
        let outcome = next.run().await;

        match &outcome {
            Ok(response) => {
                tracing::debug!(
                    status = response.status(),
                    url = %response.request().url().unwrap_or_default(),
                    elapsed_ms = response.time_elapsed().map(|d| d.as_millis() as u64),
                    "Received response"
                );
                if self.log_headers {
                    for (name, value) in response.headers() {
                        tracing::trace!(header = %name, value = %value, "Response header");
                    }
                }
            }
            Err(ClientError::Response(response)) => {
                tracing::warn!(
                    status = response.status(),
                    url = %response.request().url().unwrap_or_default(),
                    error = response.error().unwrap_or_default(),
                    "Request failed"
                );
            }
            Err(error) => {
                tracing::warn!(error = %error, "Request failed");
            }
        }

        outcome
    }
}

/// Handler invoked with failing responses. Returning `true` recovers the
/// failure.
pub type ErrorHandler = Arc<dyn Fn(&Response) -> bool + Send + Sync>;

/// Routes failing responses through one handler.
///
/// When the handler returns `true` the call resolves with the failing
/// response instead of an error.
#[derive(Clone)]
pub struct GlobalErrorHandler {
    handler: ErrorHandler,
}

impl GlobalErrorHandler {
    /// Create the middleware around `handler`.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Response) -> bool + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
        }
    }
}

impl std::fmt::Debug for GlobalErrorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GlobalErrorHandler(<fn>)")
    }
}

impl MiddlewareFactory for GlobalErrorHandler {
    fn name(&self) -> &str {
        "GlobalErrorHandlerMiddleware"
    }

    fn create(&self, _params: &MiddlewareParams) -> Box<dyn Middleware> {
        Box::new(self.clone())
    }
}

#[async_trait]
impl Middleware for GlobalErrorHandler {
    async fn response(&self, next: Next<Response>, _renew: Renew) -> Result<Response> {
        match next.run().await {
            Err(ClientError::Response(response)) if (self.handler)(&response) => {
                tracing::debug!(status = response.status(), "Failure recovered by error handler");
                Ok(*response)
            }
            outcome => outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Headers, MethodDescriptor, Parameters};
    use futures::FutureExt;
    use serde_json::json;

    fn request(params: Value) -> Request {
        let descriptor = Arc::new(MethodDescriptor::builder("http://example.org", "/users").build());
        let params = match params {
            Value::Object(map) => map,
            _ => Parameters::new(),
        };
        Request::new(descriptor, params)
    }

    async fn prepare(factory: &dyn MiddlewareFactory, request: Request) -> Request {
        factory
            .create(&MiddlewareParams::default())
            .prepare_request(Next::ready(request), Abort::new())
            .await
            .unwrap()
    }

    fn renew() -> Renew {
        Renew::new(|| async { Err(ClientError::other("unused")) }.boxed())
    }

    #[tokio::test]
    async fn test_encode_json() {
        let encoded = prepare(&EncodeJson, request(json!({"body": {"name": "bob"}}))).await;
        assert_eq!(encoded.body(), Some(&json!("{\"name\":\"bob\"}")));
        assert_eq!(encoded.header("content-type").as_deref(), Some(CONTENT_TYPE_JSON));

        let text = prepare(&EncodeJson, request(json!({"body": "plain"}))).await;
        assert_eq!(text.body(), Some(&json!("plain")));
        assert!(text.header("content-type").is_none());

        let typed = request(json!({
            "body": {"name": "bob"},
            "headers": {"Content-Type": "application/x-www-form-urlencoded"}
        }));
        let kept = prepare(&EncodeJson, typed).await;
        assert_eq!(kept.body(), Some(&json!({"name": "bob"})));
    }

    #[tokio::test]
    async fn test_basic_auth_fills_missing_credentials() {
        let factory = BasicAuth::new(Auth::new("bob", "secret"));

        let filled = prepare(&factory, request(json!({}))).await;
        assert_eq!(filled.auth(), Some(Auth::new("bob", "secret")));

        let own = prepare(&factory, request(json!({"auth": {"username": "ann", "password": "pw"}}))).await;
        assert_eq!(own.auth(), Some(Auth::new("ann", "pw")));
    }

    #[tokio::test]
    async fn test_timeout_default() {
        let factory = Timeout::new(Duration::from_millis(500));

        let filled = prepare(&factory, request(json!({}))).await;
        assert_eq!(filled.timeout(), Some(Duration::from_millis(500)));

        let own = prepare(&factory, request(json!({"timeout": 50}))).await;
        assert_eq!(own.timeout(), Some(Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_duration_stamps() {
        let prepared = prepare(&RequestDuration, request(json!({}))).await;
        assert!(prepared.header(HEADER_STARTED_AT).is_some());

        let middleware = RequestDuration.create(&MiddlewareParams::default());
        let next = Next::ready(Response::new(&prepared, 200, None, Headers::new()));
        let response = middleware.response(next, renew()).await.unwrap();

        assert_eq!(
            response.header(HEADER_STARTED_AT).map(str::to_string),
            prepared.header(HEADER_STARTED_AT)
        );
        assert!(response.header(HEADER_ENDED_AT).is_some());
        assert!(response.header(HEADER_DURATION).is_some());
    }

    #[tokio::test]
    async fn test_log_passes_through() {
        let middleware = Log::new().with_headers().create(&MiddlewareParams::default());
        let request = request(json!({}));
        let next = Next::ready(Response::new(&request, 204, None, Headers::new()));
        assert_eq!(middleware.response(next, renew()).await.unwrap().status(), 204);
    }

    #[tokio::test]
    async fn test_global_error_handler() {
        let request = request(json!({}));
        let failing = |status: u16| {
            let response = Response::new(&request, status, None, Headers::new());
            Next::new(move || {
                let response = response.clone();
                async move { Err(ClientError::response(response)) }.boxed()
            })
        };
        let middleware = GlobalErrorHandler::new(|response| response.status() == 401)
            .create(&MiddlewareParams::default());

        let recovered = middleware.response(failing(401), renew()).await.unwrap();
        assert_eq!(recovered.status(), 401);

        let error = middleware.response(failing(500), renew()).await.unwrap_err();
        assert_eq!(error.status_code(), Some(500));
    }
}
