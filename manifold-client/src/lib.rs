//! # Manifold Client
//!
//! Declarative HTTP clients: describe resources in a manifest, then call
//! them through an ordered middleware stack and a pluggable gateway.
//!
//! ## Features
//!
//! - **Two-phase middleware**: `prepare_request` and `response` hooks with
//!   `abort` and `renew`
//! - **Loop protection**: bounded pipeline runs per invocation
//! - **Retry with Backoff**: randomized exponential backoff for GET requests
//! - **Built-in middleware**: JSON encoding, basic auth, timeouts, duration
//!   stamps, logging and global error handling
//! - **Gateways**: a `reqwest` gateway out of the box, or bring your own
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use manifold_client::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let configs = Configs::builder()
//!         .gateway(ReqwestGatewayFactory::new(HttpGatewayConfig::default())?.into_factory())
//!         .middleware(Retry::default().into_factory())
//!         .build();
//!
//!     let manifest = Manifest::builder()
//!         .host("https://api.example.com")
//!         .middleware(std::sync::Arc::new(EncodeJson))
//!         .resource("User", "byId", ResourceDefinition::new("/users/{id}"))
//!         .build();
//!
//!     let client = Client::new(manifest, configs.into())?;
//!     let response = client.call("User", "byId")?.param("id", 7).send().await?;
//!
//!     println!("Status: {}", response.status());
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod gateway;
mod http_gateway;
mod interceptor;
mod manifest;
mod middleware;
mod pipeline;
mod retry;

pub use client::{CallBuilder, Client, Resource};
pub use config::{
    Configs, ConfigsBuilder, DEFAULT_MAX_MIDDLEWARE_STACK_EXECUTION_ALLOWED, HttpGatewayConfig, SharedConfigs,
};
pub use gateway::{
    Gateway, GatewayConfiguration, GatewayFactory, GatewayOverrides, client_error_response, dispatch_response,
    prepare_body, should_emulate_http,
};
pub use http_gateway::{ReqwestGateway, ReqwestGatewayFactory};
pub use interceptor::{
    BasicAuth, CONTENT_TYPE_JSON, EncodeJson, ErrorHandler, GlobalErrorHandler, HEADER_DURATION, HEADER_ENDED_AT,
    HEADER_STARTED_AT, Log, RequestDuration, Timeout,
};
pub use manifest::{Manifest, ManifestBuilder, ManifestFormat, ResourceDefinition, ResourceMethods};
pub use middleware::{
    Abort, FnMiddlewareFactory, Middleware, MiddlewareFactory, MiddlewareParams, Next, Renew, middleware_fn,
    request_hook,
};
pub use pipeline::PipelineExecutor;
pub use retry::{
    RandomSource, Retry, RetryConfig, ThreadRandom, ValidateRetry, calculate_exponential_retry_time,
    random_from_retry_time,
};

pub use manifold_core::{
    Attributes, Auth, Bytes, CancellationToken, ClientError, Context, Headers, Method, MethodDescriptor,
    MethodDescriptorBuilder, ParameterEncoder, Parameters, PathGenerator, PathTemplate, Phase, Request,
    RequestExtras, Response, ResponseExtras, Result, encode_uri_component, to_query_string,
};

/// Prelude for common imports.
///
/// ```
/// use manifold_client::prelude::*;
/// ```
pub mod prelude {
    pub use crate::client::{CallBuilder, Client, Resource};
    pub use crate::config::{Configs, ConfigsBuilder, HttpGatewayConfig, SharedConfigs};
    pub use crate::gateway::{Gateway, GatewayConfiguration, GatewayFactory, GatewayOverrides};
    pub use crate::http_gateway::ReqwestGatewayFactory;
    pub use crate::interceptor::{BasicAuth, EncodeJson, GlobalErrorHandler, Log, RequestDuration, Timeout};
    pub use crate::manifest::{Manifest, ManifestBuilder, ResourceDefinition};
    pub use crate::middleware::{
        Abort, Middleware, MiddlewareFactory, MiddlewareParams, Next, Renew, middleware_fn, request_hook,
    };
    pub use crate::retry::{Retry, RetryConfig};
    pub use manifold_core::{
        Auth, ClientError, Method, Parameters, Request, RequestExtras, Response, ResponseExtras, Result,
    };
}
