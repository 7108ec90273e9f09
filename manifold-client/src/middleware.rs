//! Middleware contract.

use crate::{ClientError, Context, Request, Response, Result};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::sync::Arc;

/// Continuation handed to a middleware hook.
///
/// Calling [`Next::run`] runs everything downstream of the middleware. It may
/// be called more than once; every call is a fresh run.
pub struct Next<T> {
    inner: Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>,
}

impl<T> Next<T> {
    pub(crate) fn new<F>(f: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<T>> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// Run the rest of the chain.
    pub fn run(&self) -> BoxFuture<'static, Result<T>> {
        (self.inner)()
    }
}

impl<T: Clone + Send + Sync + 'static> Next<T> {
    /// A continuation that always yields `value`.
    pub fn ready(value: T) -> Self {
        Self::new(move || {
            let value = value.clone();
            async move { Ok(value) }.boxed()
        })
    }
}

impl<T> Clone for Next<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Next<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Next(<fn>)")
    }
}

/// Handle a `prepare_request` hook uses to stop the pipeline with its own
/// error.
#[derive(Debug, Clone, Copy, Default)]
pub struct Abort {
    _private: (),
}

impl Abort {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wrap `error` so it reaches the caller unchanged.
    ///
    /// ```rust,ignore
    /// return Err(abort.abort(ClientError::other("no session")));
    /// ```
    pub fn abort(&self, error: ClientError) -> ClientError {
        ClientError::Aborted(Box::new(error))
    }
}

/// Handle a `response` hook uses to run the whole pipeline again.
#[derive(Clone)]
pub struct Renew {
    inner: Arc<dyn Fn() -> BoxFuture<'static, Result<Response>> + Send + Sync>,
}

impl Renew {
    pub(crate) fn new<F>(f: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<Response>> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// Run a fresh request phase and dispatch, returning the new response.
    pub fn run(&self) -> BoxFuture<'static, Result<Response>> {
        (self.inner)()
    }
}

impl fmt::Debug for Renew {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Renew(<fn>)")
    }
}

/// Metadata handed to a [`MiddlewareFactory`] for each invocation.
#[derive(Debug, Clone, Default)]
pub struct MiddlewareParams {
    /// Client identifier from the manifest.
    pub client_id: Option<String>,
    /// Resource name.
    pub resource_name: String,
    /// Resource method name.
    pub resource_method: String,
    /// Configured context.
    pub context: Context,
}

/// A middleware instance, created per invocation.
///
/// Both hooks default to pass-through.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Transform the outgoing request.
    ///
    /// Await `next` to obtain the request as prepared by every middleware
    /// ahead of this one in the stack.
    async fn prepare_request(&self, next: Next<Request>, abort: Abort) -> Result<Request> {
        let _ = abort;
        next.run().await
    }

    /// Transform the response or the failure coming back from the gateway.
    async fn response(&self, next: Next<Response>, renew: Renew) -> Result<Response> {
        let _ = renew;
        next.run().await
    }
}

/// Creates [`Middleware`] instances.
pub trait MiddlewareFactory: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Create the instance for one invocation.
    fn create(&self, params: &MiddlewareParams) -> Box<dyn Middleware>;
}

/// Factory backed by a closure.
pub struct FnMiddlewareFactory<F> {
    name: String,
    create: F,
}

impl<F> MiddlewareFactory for FnMiddlewareFactory<F>
where
    F: Fn(&MiddlewareParams) -> Box<dyn Middleware> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, params: &MiddlewareParams) -> Box<dyn Middleware> {
        (self.create)(params)
    }
}

/// Build a factory from a name and a closure.
pub fn middleware_fn<F>(name: impl Into<String>, create: F) -> Arc<dyn MiddlewareFactory>
where
    F: Fn(&MiddlewareParams) -> Box<dyn Middleware> + Send + Sync + 'static,
{
    Arc::new(FnMiddlewareFactory {
        name: name.into(),
        create,
    })
}

type RequestHookFn = Arc<dyn Fn(Request) -> Request + Send + Sync>;

struct RequestHook {
    hook: RequestHookFn,
}

#[async_trait]
impl Middleware for RequestHook {
    async fn prepare_request(&self, next: Next<Request>, _abort: Abort) -> Result<Request> {
        let request = next.run().await?;
        Ok((self.hook)(request))
    }
}

/// Adapt a synchronous request hook into a middleware.
///
/// Kept for hooks that only rewrite the request; new code should implement
/// [`Middleware::prepare_request`].
pub fn request_hook<F>(name: impl Into<String>, hook: F) -> Arc<dyn MiddlewareFactory>
where
    F: Fn(Request) -> Request + Send + Sync + 'static,
{
    let hook: RequestHookFn = Arc::new(hook);
    middleware_fn(name, move |_| {
        Box::new(RequestHook {
            hook: Arc::clone(&hook),
        })
    })
}

/// A middleware instance paired with its factory's name.
#[derive(Clone)]
pub(crate) struct MiddlewareInstance {
    pub(crate) name: Arc<str>,
    pub(crate) middleware: Arc<dyn Middleware>,
}

impl MiddlewareInstance {
    pub(crate) fn create(factory: &dyn MiddlewareFactory, params: &MiddlewareParams) -> Self {
        Self {
            name: Arc::from(factory.name()),
            middleware: Arc::from(factory.create(params)),
        }
    }
}

impl fmt::Debug for MiddlewareInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareInstance")
            .field("name", &self.name)
            .finish()
    }
}
