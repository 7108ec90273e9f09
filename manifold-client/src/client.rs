//! Client built from a manifest.

use crate::config::SharedConfigs;
use crate::gateway::{GatewayFactory, GatewayOverrides};
use crate::manifest::{Manifest, ResourceDefinition};
use crate::middleware::{MiddlewareFactory, MiddlewareInstance, MiddlewareParams};
use crate::pipeline::PipelineExecutor;
use crate::{
    Auth, CancellationToken, ClientError, Context, MethodDescriptor, Parameters, PathTemplate, Request,
    Response, Result,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One resource method, ready to be invoked.
struct ResourceMethod {
    descriptor: Arc<MethodDescriptor>,
    middleware: Vec<Arc<dyn MiddlewareFactory>>,
    gateway_configs: GatewayOverrides,
}

struct ClientInner {
    client_id: Option<String>,
    resources: BTreeMap<String, BTreeMap<String, ResourceMethod>>,
    middleware: Vec<Arc<dyn MiddlewareFactory>>,
    gateway: Option<Arc<dyn GatewayFactory>>,
    gateway_configs: GatewayOverrides,
    ignore_global_middleware: bool,
    configs: SharedConfigs,
}

/// Client exposing the resource methods of a [`Manifest`].
///
/// Cheap to clone; clones share the resource definitions and the
/// configuration.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Build a client from `manifest`.
    ///
    /// Fails when a method has no path or an invalid HTTP method, or when
    /// neither the manifest nor `configs` provide a gateway.
    pub fn new(manifest: Manifest, configs: SharedConfigs) -> Result<Self> {
        if manifest.gateway.is_none() && configs.read(|c| c.gateway.is_none()) {
            return Err(ClientError::MissingGateway);
        }
        check_max_executions(configs.read(|c| c.max_middleware_stack_execution_allowed))?;

        let mut resources = BTreeMap::new();
        for (resource_name, methods) in &manifest.resources {
            let mut built = BTreeMap::new();
            for (method_name, definition) in methods {
                let method = build_method(&manifest, resource_name, method_name, definition)?;
                built.insert(method_name.clone(), method);
            }
            resources.insert(resource_name.clone(), built);
        }

        debug!(
            client_id = ?manifest.client_id,
            resources = resources.len(),
            "Client created"
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                client_id: manifest.client_id,
                resources,
                middleware: manifest.middleware,
                gateway: manifest.gateway,
                gateway_configs: manifest.gateway_configs,
                ignore_global_middleware: manifest.ignore_global_middleware,
                configs,
            }),
        })
    }

    /// Client identifier from the manifest.
    pub fn client_id(&self) -> Option<&str> {
        self.inner.client_id.as_deref()
    }

    /// Shared configuration used by this client.
    pub fn configs(&self) -> &SharedConfigs {
        &self.inner.configs
    }

    /// Names of the resources.
    pub fn resource_names(&self) -> impl Iterator<Item = &str> {
        self.inner.resources.keys().map(String::as_str)
    }

    /// Look up a resource.
    pub fn resource(&self, name: &str) -> Result<Resource<'_>> {
        let (name, methods) = self
            .inner
            .resources
            .get_key_value(name)
            .ok_or_else(|| ClientError::UnknownResource(name.to_string()))?;
        Ok(Resource {
            client: self,
            name,
            methods,
        })
    }

    /// Start a call to `resource.method`.
    pub fn call(&self, resource: &str, method: &str) -> Result<CallBuilder<'_>> {
        self.resource(resource)?.method(method)
    }

    /// Invoke `resource.method` with `params`.
    pub async fn invoke(&self, resource: &str, method: &str, params: Parameters) -> Result<Response> {
        self.call(resource, method)?.params(params).send().await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("client_id", &self.inner.client_id)
            .field("resources", &self.inner.resources.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn build_method(
    manifest: &Manifest,
    resource: &str,
    method: &str,
    definition: &ResourceDefinition,
) -> Result<ResourceMethod> {
    let path = match &definition.path_generator {
        Some(generator) => PathTemplate::Generator(Arc::clone(generator)),
        None if definition.path.is_empty() => {
            return Err(ClientError::Manifest(format!(
                "path is required for \"{resource}.{method}\""
            )));
        }
        None => PathTemplate::from(definition.path.as_str()),
    };

    let host = definition.host.as_deref().unwrap_or(&manifest.host);
    let mut builder = MethodDescriptor::builder(host, path)
        .method(definition.http_method()?)
        .allow_resource_host_override(manifest.allow_resource_host_override)
        .headers(definition.headers.clone())
        .params(definition.params.clone())
        .query_param_aliases(definition.query_param_alias.clone())
        .binary(definition.binary)
        .parameter_encoder(manifest.parameter_encoder.clone());
    if let Some(attributes) = &definition.attributes {
        builder = builder.attributes(attributes.clone());
    }

    Ok(ResourceMethod {
        descriptor: Arc::new(builder.build()),
        middleware: definition.middleware.clone(),
        gateway_configs: definition.gateway_configs.clone(),
    })
}

/// A resource of a [`Client`].
pub struct Resource<'a> {
    client: &'a Client,
    name: &'a str,
    methods: &'a BTreeMap<String, ResourceMethod>,
}

impl<'a> Resource<'a> {
    /// Resource name.
    pub fn name(&self) -> &str {
        self.name
    }

    /// Names of the methods.
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Start a call to one of the methods.
    pub fn method(&self, name: &str) -> Result<CallBuilder<'a>> {
        let (method_name, method) =
            self.methods
                .get_key_value(name)
                .ok_or_else(|| ClientError::UnknownMethod {
                    resource: self.name.to_string(),
                    method: name.to_string(),
                })?;
        Ok(CallBuilder {
            client: self.client,
            resource: self.name,
            name: method_name,
            method,
            params: Parameters::new(),
            headers: serde_json::Map::new(),
            context: Context::new(),
            signal: None,
        })
    }
}

/// Builder for one resource method call.
pub struct CallBuilder<'a> {
    client: &'a Client,
    resource: &'a str,
    name: &'a str,
    method: &'a ResourceMethod,
    params: Parameters,
    headers: serde_json::Map<String, Value>,
    context: Context,
    signal: Option<CancellationToken>,
}

impl CallBuilder<'_> {
    /// Set a parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Set several parameters.
    pub fn params(mut self, params: Parameters) -> Self {
        self.params.extend(params);
        self
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), Value::String(value.into()));
        self
    }

    /// Set the body.
    pub fn body(self, body: impl Into<Value>) -> Self {
        let key = self.method.descriptor.attributes().body.clone();
        self.param(key, body)
    }

    /// Set the body from a serializable value.
    pub fn json<T: serde::Serialize>(self, body: &T) -> Result<Self> {
        let body = serde_json::to_value(body)?;
        Ok(self.body(body))
    }

    /// Set basic auth credentials.
    pub fn auth(self, auth: Auth) -> Self {
        let key = self.method.descriptor.attributes().auth.clone();
        self.param(key, serde_json::json!({ "username": auth.username, "password": auth.password }))
    }

    /// Set the timeout.
    pub fn timeout(self, timeout: Duration) -> Self {
        let key = self.method.descriptor.attributes().timeout.clone();
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.param(key, millis)
    }

    /// Override the host, when the manifest allows it.
    pub fn host(self, host: impl Into<String>) -> Self {
        let key = self.method.descriptor.attributes().host.clone();
        self.param(key, host.into())
    }

    /// Add a context entry.
    pub fn context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Attach a cancellation token.
    pub fn signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Build the request without sending it.
    ///
    /// Fails when the path cannot be resolved.
    pub fn build_request(&self) -> Result<Request> {
        let mut params = self.params.clone();
        if !self.headers.is_empty() {
            let key = self.method.descriptor.attributes().headers.clone();
            let mut headers = match params.remove(&key) {
                Some(Value::Object(existing)) => existing,
                _ => serde_json::Map::new(),
            };
            headers.extend(self.headers.clone());
            params.insert(key, Value::Object(headers));
        }

        let mut context = self.client.inner.configs.read(|c| c.context.clone());
        context.extend(self.context.clone());

        let mut request = Request::new(Arc::clone(&self.method.descriptor), params).with_context(context);
        if let Some(signal) = &self.signal {
            request = request.with_signal(signal.clone());
        }

        request.path()?;
        Ok(request)
    }

    /// Run the call through the middleware stack and the gateway.
    pub async fn send(self) -> Result<Response> {
        let request = self.build_request()?;
        let inner = &self.client.inner;

        let (global, max_executions) = inner.configs.read(|c| {
            let global = if inner.ignore_global_middleware {
                Vec::new()
            } else {
                c.middleware.clone()
            };
            (global, c.max_middleware_stack_execution_allowed)
        });
        check_max_executions(max_executions)?;

        let params = MiddlewareParams {
            client_id: inner.client_id.clone(),
            resource_name: self.resource.to_string(),
            resource_method: self.name.to_string(),
            context: request.context().clone(),
        };

        let stack: Vec<MiddlewareInstance> = self
            .method
            .middleware
            .iter()
            .chain(inner.middleware.iter())
            .chain(global.iter())
            .map(|factory| MiddlewareInstance::create(factory.as_ref(), &params))
            .collect();

        debug!(
            resource = self.resource,
            method = self.name,
            middleware = ?stack.iter().map(|m| m.name.as_ref()).collect::<Vec<_>>(),
            "Invoking resource method"
        );

        let overrides = inner.gateway_configs.and(&self.method.gateway_configs);
        PipelineExecutor::new(
            stack,
            inner.configs.clone(),
            inner.gateway.clone(),
            overrides,
            max_executions,
        )
        .execute(request)
        .await
    }
}

fn check_max_executions(max: usize) -> Result<()> {
    if max == 0 {
        return Err(ClientError::Manifest(
            "max_middleware_stack_execution_allowed must be at least 1".to_string(),
        ));
    }
    Ok(())
}
