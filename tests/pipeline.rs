//! Integration tests for the middleware pipeline.
//!
//! These tests drive full invocations through `Client` with a recording
//! gateway in place of the network.

use async_trait::async_trait;
use manifold::prelude::*;
use manifold::{
    Bytes, ConfigsBuilder, Gateway, GatewayConfiguration, GatewayFactory, GlobalErrorHandler, Headers,
    MethodDescriptor, Phase, SharedConfigs,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

// =============================================================================
// Recording gateway
// =============================================================================

/// Answers with scripted statuses (200 once the script runs out) and keeps
/// every request it was handed.
#[derive(Default)]
struct Recorder {
    statuses: Mutex<VecDeque<u16>>,
    seen: Mutex<Vec<Request>>,
}

impl Recorder {
    fn new(statuses: &[u16]) -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(statuses.iter().copied().collect()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.seen.lock().len()
    }

    fn request(&self, index: usize) -> Request {
        self.seen.lock()[index].clone()
    }
}

fn gateway(recorder: &Arc<Recorder>) -> Arc<dyn GatewayFactory> {
    Arc::new(RecordingFactory(Arc::clone(recorder)))
}

struct RecordingFactory(Arc<Recorder>);

impl GatewayFactory for RecordingFactory {
    fn create(&self, request: Request, options: GatewayConfiguration) -> Box<dyn Gateway> {
        Box::new(RecordingGateway {
            recorder: Arc::clone(&self.0),
            request,
            options,
        })
    }
}

struct RecordingGateway {
    recorder: Arc<Recorder>,
    request: Request,
    options: GatewayConfiguration,
}

#[async_trait]
impl Gateway for RecordingGateway {
    fn request(&self) -> &Request {
        &self.request
    }

    fn options(&self) -> &GatewayConfiguration {
        &self.options
    }

    async fn perform(&self, _method: &Method) -> Result<Response> {
        self.recorder.seen.lock().push(self.request.clone());
        let status = self.recorder.statuses.lock().pop_front().unwrap_or(200);

        let mut headers = Headers::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Ok(Response::new(&self.request, status, Some(Bytes::from_static(b"{}")), headers))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn configs(recorder: &Arc<Recorder>) -> ConfigsBuilder {
    Configs::builder().gateway(gateway(recorder))
}

fn manifest() -> ManifestBuilder {
    Manifest::builder()
        .host("http://example.org")
        .client_id("test-client")
}

fn by_id() -> ResourceDefinition {
    ResourceDefinition::new("/users/{id}")
}

async fn fetch_user(client: &Client) -> Result<Response> {
    client.call("User", "byId")?.param("id", 1).send().await
}

struct Trace {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Middleware for Trace {
    async fn prepare_request(&self, next: Next<Request>, _abort: Abort) -> Result<Request> {
        let request = next.run().await?;
        self.log.lock().push(format!("prepare:{}", self.name));
        Ok(request)
    }

    async fn response(&self, next: Next<Response>, _renew: Renew) -> Result<Response> {
        self.log.lock().push(format!("response:{}", self.name));
        next.run().await
    }
}

fn trace(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn MiddlewareFactory> {
    let log = Arc::clone(log);
    middleware_fn(name, move |_| {
        Box::new(Trace {
            name,
            log: Arc::clone(&log),
        })
    })
}

struct AlwaysRenew;

#[async_trait]
impl Middleware for AlwaysRenew {
    async fn response(&self, next: Next<Response>, renew: Renew) -> Result<Response> {
        next.run().await?;
        renew.run().await
    }
}

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test]
async fn test_resource_client_global_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let recorder = Recorder::new(&[]);

    let configs = configs(&recorder).middleware(trace("global", &log)).build();
    let manifest = manifest()
        .middleware(trace("client", &log))
        .resource("User", "byId", by_id().middleware(trace("resource", &log)))
        .build();
    let client = Client::new(manifest, configs.into()).unwrap();

    assert_ok!(fetch_user(&client).await);

    assert_eq!(
        *log.lock(),
        vec![
            "prepare:resource",
            "prepare:client",
            "prepare:global",
            "response:global",
            "response:client",
            "response:resource",
        ]
    );
}

#[tokio::test]
async fn test_ignore_global_middleware() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let recorder = Recorder::new(&[]);

    let configs = configs(&recorder).middleware(trace("global", &log)).build();
    let manifest = manifest()
        .ignore_global_middleware(true)
        .middleware(trace("client", &log))
        .resource("User", "byId", by_id())
        .build();
    let client = Client::new(manifest, configs.into()).unwrap();

    assert_ok!(fetch_user(&client).await);

    assert_eq!(*log.lock(), vec!["prepare:client", "response:client"]);
}

#[tokio::test]
async fn test_middleware_params() {
    let captured = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&captured);
    let spy = middleware_fn("Spy", move |params: &MiddlewareParams| {
        *sink.lock() = Some(params.clone());
        Box::new(AlwaysPass)
    });

    struct AlwaysPass;
    impl Middleware for AlwaysPass {}

    let recorder = Recorder::new(&[]);
    let configs = configs(&recorder).context("tenant", "acme").middleware(spy).build();
    let client = Client::new(manifest().resource("User", "byId", by_id()).build(), configs.into()).unwrap();

    client
        .call("User", "byId")
        .unwrap()
        .param("id", 1)
        .context("trace", "t-1")
        .send()
        .await
        .unwrap();

    let params = captured.lock().clone().unwrap();
    assert_eq!(params.client_id.as_deref(), Some("test-client"));
    assert_eq!(params.resource_name, "User");
    assert_eq!(params.resource_method, "byId");
    assert_eq!(params.context.get("tenant"), Some(&serde_json::json!("acme")));
    assert_eq!(params.context.get("trace"), Some(&serde_json::json!("t-1")));
}

// =============================================================================
// Loop guard and renew
// =============================================================================

#[tokio::test]
async fn test_infinite_loop_detected() {
    let recorder = Recorder::new(&[]);
    let manifest = manifest()
        .resource("User", "byId", by_id().middleware(middleware_fn("Renewer", |_| Box::new(AlwaysRenew))))
        .build();
    let client = Client::new(manifest, configs(&recorder).build().into()).unwrap();

    let error = assert_err!(fetch_user(&client).await);

    assert!(matches!(error, ClientError::InfiniteLoop { executions: 3 }));
    assert!(error.to_string().to_lowercase().contains("infinite loop detected"));
    assert_eq!(recorder.calls(), 2);
}

#[tokio::test]
async fn test_configured_execution_limit() {
    let recorder = Recorder::new(&[]);
    let configs = configs(&recorder)
        .max_middleware_stack_execution_allowed(1)
        .middleware(middleware_fn("Renewer", |_| Box::new(AlwaysRenew)))
        .build();
    let client = Client::new(manifest().resource("User", "byId", by_id()).build(), configs.into()).unwrap();

    let error = assert_err!(fetch_user(&client).await);

    assert!(matches!(error, ClientError::InfiniteLoop { executions: 2 }));
    assert_eq!(recorder.calls(), 1);
}

struct RefreshToken {
    token: Arc<Mutex<String>>,
}

#[async_trait]
impl Middleware for RefreshToken {
    async fn prepare_request(&self, next: Next<Request>, _abort: Abort) -> Result<Request> {
        let request = next.run().await?;
        let token = self.token.lock().clone();
        Ok(request.enhance(
            RequestExtras::new().header("Authorization", format!("Bearer {token}")),
            None,
        ))
    }

    async fn response(&self, next: Next<Response>, renew: Renew) -> Result<Response> {
        match next.run().await {
            Err(error) if error.status_code() == Some(401) => {
                *self.token.lock() = "fresh".to_string();
                renew.run().await
            }
            outcome => outcome,
        }
    }
}

#[tokio::test]
async fn test_renew_refreshes_credentials() {
    let recorder = Recorder::new(&[401]);
    let token = Arc::new(Mutex::new("stale".to_string()));
    let store = Arc::clone(&token);
    let configs = configs(&recorder)
        .middleware(middleware_fn("RefreshToken", move |_| {
            Box::new(RefreshToken {
                token: Arc::clone(&store),
            })
        }))
        .build();
    let client = Client::new(manifest().resource("User", "byId", by_id()).build(), configs.into()).unwrap();

    let response = assert_ok!(fetch_user(&client).await);

    assert_eq!(response.status(), 200);
    assert_eq!(recorder.calls(), 2);
    assert_eq!(recorder.request(0).header("authorization").as_deref(), Some("Bearer stale"));
    assert_eq!(recorder.request(1).header("authorization").as_deref(), Some("Bearer fresh"));
}

// =============================================================================
// Request phase failures
// =============================================================================

struct RequireSession;

#[async_trait]
impl Middleware for RequireSession {
    async fn prepare_request(&self, next: Next<Request>, abort: Abort) -> Result<Request> {
        let request = next.run().await?;
        if request.header("x-session").is_none() {
            return Err(abort.abort(ClientError::other("no session")));
        }
        Ok(request)
    }
}

#[tokio::test]
async fn test_abort_surfaces_verbatim() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let recorder = Recorder::new(&[]);
    let manifest = manifest()
        .middleware(trace("client", &log))
        .resource(
            "User",
            "byId",
            by_id().middleware(middleware_fn("RequireSession", |_| Box::new(RequireSession))),
        )
        .build();
    let client = Client::new(manifest, configs(&recorder).build().into()).unwrap();

    let error = assert_err!(fetch_user(&client).await);

    assert!(matches!(&error, ClientError::Other(message) if message == "no session"));
    assert_eq!(recorder.calls(), 0);
    assert!(log.lock().is_empty());

    let ok = client
        .call("User", "byId")
        .unwrap()
        .param("id", 1)
        .header("X-Session", "s-1")
        .send()
        .await;
    assert!(ok.is_ok());
}

struct Faulty;

#[async_trait]
impl Middleware for Faulty {
    async fn prepare_request(&self, next: Next<Request>, _abort: Abort) -> Result<Request> {
        next.run().await?;
        Err(ClientError::other("token store offline"))
    }
}

#[tokio::test]
async fn test_failures_are_attributed() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let recorder = Recorder::new(&[]);
    let manifest = manifest()
        .middleware(trace("client", &log))
        .resource("User", "byId", by_id().middleware(middleware_fn("Faulty", |_| Box::new(Faulty))))
        .build();
    let client = Client::new(manifest, configs(&recorder).build().into()).unwrap();

    let error = assert_err!(fetch_user(&client).await);

    match &error {
        ClientError::MiddlewareFailed {
            middleware,
            phase,
            source,
        } => {
            assert_eq!(middleware, "Faulty");
            assert_eq!(*phase, Phase::Request);
            assert_eq!(source.to_string(), "token store offline");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(error.to_string().contains("failed in the request phase"));
    assert_eq!(recorder.calls(), 0);
}

struct Hijack;

#[async_trait]
impl Middleware for Hijack {
    async fn prepare_request(&self, next: Next<Request>, _abort: Abort) -> Result<Request> {
        next.run().await?;
        let other = Arc::new(MethodDescriptor::builder("http://elsewhere.example", "/").build());
        Ok(Request::new(other, Parameters::new()))
    }
}

#[tokio::test]
async fn test_invalid_middleware_result() {
    let recorder = Recorder::new(&[]);
    let configs = configs(&recorder)
        .middleware(middleware_fn("Hijack", |_| Box::new(Hijack)))
        .build();
    let client = Client::new(manifest().resource("User", "byId", by_id()).build(), configs.into()).unwrap();

    let error = assert_err!(fetch_user(&client).await);

    assert!(matches!(&error, ClientError::InvalidMiddlewareResult { middleware, .. } if middleware == "Hijack"));
    assert_eq!(recorder.calls(), 0);
}

// =============================================================================
// Responses
// =============================================================================

#[tokio::test]
async fn test_auth_is_masked_in_responses() {
    let recorder = Recorder::new(&[]);
    let client = Client::new(
        manifest().resource("User", "byId", by_id()).build(),
        configs(&recorder).build().into(),
    )
    .unwrap();

    let response = client
        .call("User", "byId")
        .unwrap()
        .param("id", 1)
        .auth(Auth::new("bob", "secret"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.request().auth(), Some(Auth::new("bob", "***")));
    assert_eq!(recorder.request(0).auth(), Some(Auth::new("bob", "secret")));
}

#[tokio::test]
async fn test_failures_carry_the_response() {
    let recorder = Recorder::new(&[404]);
    let client = Client::new(
        manifest().resource("User", "byId", by_id()).build(),
        configs(&recorder).build().into(),
    )
    .unwrap();

    let error = assert_err!(fetch_user(&client).await);
    assert_eq!(error.status_code(), Some(404));
    assert_eq!(error.as_response().unwrap().data(), serde_json::json!({}));
}

#[tokio::test]
async fn test_global_error_handler_recovers() {
    let recorder = Recorder::new(&[404]);
    let configs = configs(&recorder)
        .middleware(Arc::new(GlobalErrorHandler::new(|response| response.status() == 404)))
        .build();
    let client = Client::new(manifest().resource("User", "byId", by_id()).build(), configs.into()).unwrap();

    let response = assert_ok!(fetch_user(&client).await);
    assert_eq!(response.status(), 404);
}

#[tokio::test(start_paused = true)]
async fn test_retry_in_pipeline() {
    let recorder = Recorder::new(&[503, 502]);
    let configs = configs(&recorder)
        .middleware(Retry::default().into_factory())
        .build();
    let client = Client::new(manifest().resource("User", "byId", by_id()).build(), configs.into()).unwrap();

    let response = assert_ok!(fetch_user(&client).await);

    assert_eq!(response.status(), 200);
    assert_eq!(response.header("x-manifold-retry-count"), Some("2"));
    assert_eq!(recorder.calls(), 3);
}

// =============================================================================
// Shared configuration
// =============================================================================

#[tokio::test]
async fn test_gateway_read_at_dispatch() {
    let first = Recorder::new(&[]);
    let second = Recorder::new(&[]);
    let shared = SharedConfigs::new(configs(&first).build());
    let client = Client::new(manifest().resource("User", "byId", by_id()).build(), shared.clone()).unwrap();

    shared.update(|configs| configs.gateway = Some(gateway(&second)));
    assert_ok!(fetch_user(&client).await);

    assert_eq!(first.calls(), 0);
    assert_eq!(second.calls(), 1);
}

#[tokio::test]
async fn test_manifest_gateway_wins() {
    let configured = Recorder::new(&[]);
    let own = Recorder::new(&[]);
    let manifest = manifest()
        .gateway(gateway(&own))
        .resource("User", "byId", by_id())
        .build();
    let client = Client::new(manifest, configs(&configured).build().into()).unwrap();

    assert_ok!(fetch_user(&client).await);

    assert_eq!(configured.calls(), 0);
    assert_eq!(own.calls(), 1);
}
