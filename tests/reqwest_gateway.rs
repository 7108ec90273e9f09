//! End-to-end tests against a mock HTTP server.

use manifold::prelude::*;
use manifold::{HttpGatewayConfig, ReqwestGatewayFactory, RequestDuration};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn client(server: &MockServer, configs: ConfigsBuilder) -> Client {
    let manifest = Manifest::from_json(
        &json!({
            "clientId": "github",
            "host": server.uri(),
            "resources": {
                "Repo": {
                    "byName": { "path": "/repos/{owner}/{name}" },
                    "list": { "path": "/orgs/{org}/repos", "queryParamAlias": { "perPage": "per_page" } },
                    "create": { "method": "post", "path": "/orgs/{org}/repos" }
                }
            }
        })
        .to_string(),
    )
    .unwrap();

    let gateway = ReqwestGatewayFactory::new(HttpGatewayConfig::default()).unwrap();
    let mut manifest = manifest;
    manifest.middleware.push(Arc::new(EncodeJson));
    Client::new(manifest, configs.gateway(gateway.into_factory()).build().into()).unwrap()
}

#[tokio::test]
async fn test_get_with_alias_and_json_body() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orgs/rust-lang/repos"))
        .and(query_param("per_page", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"name": "cargo"}])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, Configs::builder().middleware(Arc::new(Log::new())));
    let response = client
        .call("Repo", "list")
        .unwrap()
        .param("org", "rust-lang")
        .param("perPage", 10)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.data(), json!([{"name": "cargo"}]));
}

#[tokio::test]
async fn test_post_json_with_auth() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orgs/acme/repos"))
        .and(header("content-type", "application/json;charset=utf-8"))
        .and(header("authorization", "Basic Ym9iOnNlY3JldA=="))
        .and(body_json(json!({"name": "widgets", "private": true})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 42})))
        .expect(1)
        .mount(&server)
        .await;

    let configs = Configs::builder().middleware(Arc::new(BasicAuth::new(Auth::new("bob", "secret"))));
    let client = client(&server, configs);
    let response = client
        .call("Repo", "create")
        .unwrap()
        .param("org", "acme")
        .body(json!({"name": "widgets", "private": true}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 201);
    assert_eq!(response.data(), json!({"id": 42}));
    assert_eq!(response.request().auth().map(|auth| auth.password), Some("***".to_string()));
}

#[tokio::test]
async fn test_retry_against_server() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/rust-lang/cargo"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/rust-lang/cargo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "cargo"})))
        .mount(&server)
        .await;

    let retry = RetryConfig::default().with_initial_retry_time_in_secs(0.01);
    let configs = Configs::builder()
        .middleware(Retry::new(retry).into_factory())
        .middleware(Arc::new(RequestDuration));
    let client = client(&server, configs);

    let response = client
        .call("Repo", "byName")
        .unwrap()
        .param("owner", "rust-lang")
        .param("name", "cargo")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.header("x-manifold-retry-count"), Some("2"));
    assert!(response.header("x-duration").is_some());
}

#[tokio::test]
async fn test_timeout_default_from_middleware() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let configs = Configs::builder()
        .middleware(Arc::new(Timeout::new(Duration::from_millis(50))))
        .gateway_configs(GatewayConfiguration {
            enable_http408_on_timeouts: true,
            ..Default::default()
        });
    let client = client(&server, configs);

    let error = client
        .call("Repo", "byName")
        .unwrap()
        .param("owner", "rust-lang")
        .param("name", "cargo")
        .send()
        .await
        .unwrap_err();

    assert_eq!(error.status_code(), Some(408));
}
