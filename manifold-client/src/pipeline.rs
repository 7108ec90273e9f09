//! Middleware stack execution.
//!
//! One invocation runs in two phases around a gateway dispatch:
//!
//! 1. **Request phase**: every `prepare_request` hook is composed around the
//!    initial request. The first middleware in the stack is innermost, so
//!    its changes are applied first.
//! 2. **Response phase**: every `response` hook is composed around the
//!    gateway call in the same order, so the first middleware is the closest
//!    to the gateway and sees the response first.
//!
//! `renew` re-runs both phases with a fresh dispatch. Each run counts
//! against `max_middleware_stack_execution_allowed`.

use crate::config::SharedConfigs;
use crate::gateway::{GatewayFactory, GatewayOverrides};
use crate::middleware::{Abort, MiddlewareInstance, Next, Renew};
use crate::{ClientError, Phase, Request, Response, Result};
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, trace, warn};

/// Drives one logical invocation through the middleware stack.
#[derive(Clone)]
pub struct PipelineExecutor {
    inner: Arc<Execution>,
}

struct Execution {
    stack: Vec<MiddlewareInstance>,
    configs: SharedConfigs,
    gateway: Option<Arc<dyn GatewayFactory>>,
    gateway_overrides: GatewayOverrides,
    max_executions: usize,
    executions: AtomicUsize,
}

impl PipelineExecutor {
    pub(crate) fn new(
        stack: Vec<MiddlewareInstance>,
        configs: SharedConfigs,
        gateway: Option<Arc<dyn GatewayFactory>>,
        gateway_overrides: GatewayOverrides,
        max_executions: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Execution {
                stack,
                configs,
                gateway,
                gateway_overrides,
                max_executions,
                executions: AtomicUsize::new(0),
            }),
        }
    }

    /// Number of pipeline runs so far.
    pub fn executions(&self) -> usize {
        self.inner.executions.load(Ordering::SeqCst)
    }

    /// Run the invocation for `request`.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        debug!(
            middleware = self.inner.stack.len(),
            method = %request.method(),
            "Executing middleware stack"
        );
        Arc::clone(&self.inner).run(request).await
    }
}

impl Execution {
    fn run(self: Arc<Self>, request: Request) -> BoxFuture<'static, Result<Response>> {
        async move {
            let prepared = self.prepare_request(request.clone()).await?;

            let executions = self.executions.fetch_add(1, Ordering::SeqCst) + 1;
            if executions > self.max_executions {
                warn!(
                    executions,
                    max = self.max_executions,
                    "Infinite loop detected in middleware stack"
                );
                return Err(ClientError::InfiniteLoop { executions });
            }

            let renew = {
                let execution = Arc::clone(&self);
                Renew::new(move || {
                    debug!("Renewing middleware stack execution");
                    Arc::clone(&execution).run(request.clone())
                })
            };

            self.response_chain(prepared, renew).run().await
        }
        .boxed()
    }

    async fn prepare_request(&self, initial: Request) -> Result<Request> {
        let descriptor = Arc::clone(initial.descriptor());
        let mut next = Next::ready(initial);

        for instance in &self.stack {
            let inner = next.clone();
            let instance = instance.clone();
            let descriptor = Arc::clone(&descriptor);

            next = Next::new(move || {
                let inner = inner.clone();
                let instance = instance.clone();
                let descriptor = Arc::clone(&descriptor);

                async move {
                    trace!(middleware = %instance.name, "Preparing request");
                    match instance.middleware.prepare_request(inner, Abort::new()).await {
                        Ok(request) if Arc::ptr_eq(request.descriptor(), &descriptor) => Ok(request),
                        Ok(request) => Err(ClientError::InvalidMiddlewareResult {
                            middleware: instance.name.to_string(),
                            returned: format!(
                                "a request built for another method descriptor ({} {:?})",
                                request.method(),
                                request.descriptor().path()
                            ),
                        }),
                        Err(error) if error.is_attributed() => Err(error),
                        Err(error) => Err(ClientError::MiddlewareFailed {
                            middleware: instance.name.to_string(),
                            phase: Phase::Request,
                            source: Box::new(error),
                        }),
                    }
                }
                .boxed()
            });
        }

        next.run().await.map_err(|error| match error {
            ClientError::Aborted(error) => *error,
            other => other,
        })
    }

    fn response_chain(&self, request: Request, renew: Renew) -> Next<Response> {
        let configs = self.configs.clone();
        let gateway = self.gateway.clone();
        let overrides = self.gateway_overrides.clone();

        let mut next = Next::new(move || {
            let request = request.clone();
            let configs = configs.clone();
            let gateway = gateway.clone();
            let overrides = overrides.clone();

            async move {
                let (factory, options) = configs.read(|current| {
                    let factory = gateway.or_else(|| current.gateway.clone());
                    (factory, current.gateway_configs.merged(&overrides))
                });
                let factory = factory.ok_or(ClientError::MissingGateway)?;

                debug!(method = %request.method(), "Dispatching request to gateway");
                factory.create(request, options).call().await
            }
            .boxed()
        });

        for instance in &self.stack {
            let inner = next.clone();
            let instance = instance.clone();
            let renew = renew.clone();

            next = Next::new(move || {
                let inner = inner.clone();
                let instance = instance.clone();
                let renew = renew.clone();

                async move {
                    trace!(middleware = %instance.name, "Handling response");
                    instance.middleware.response(inner, renew).await
                }
                .boxed()
            });
        }

        next
    }
}
