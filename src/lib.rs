// Manifold - declarative HTTP clients for Rust
//
// Describe resources in a manifest and call them through an ordered
// middleware stack and a pluggable gateway.

// Re-export value objects and errors
pub use manifold_core::*;

// Re-export the client
pub use manifold_client::{
    Abort, BasicAuth, CallBuilder, Client, Configs, ConfigsBuilder, EncodeJson, Gateway,
    GatewayConfiguration, GatewayFactory, GatewayOverrides, GlobalErrorHandler, HttpGatewayConfig, Log,
    Manifest, ManifestBuilder, ManifestFormat, Middleware, MiddlewareFactory, MiddlewareParams, Next,
    PipelineExecutor, RandomSource, Renew, RequestDuration, Resource, ResourceDefinition, Retry, RetryConfig,
    ReqwestGateway, ReqwestGatewayFactory, SharedConfigs, Timeout, middleware_fn, request_hook,
};

pub use manifold_client;
pub use manifold_core;

// Prelude for common imports
pub mod prelude {
    pub use manifold_client::prelude::*;
}
