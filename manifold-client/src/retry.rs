//! Retry middleware with randomized exponential backoff.

use crate::middleware::{Abort, Middleware, MiddlewareFactory, MiddlewareParams, Next, Renew};
use crate::{ClientError, Request, Response, ResponseExtras, Result};
use async_trait::async_trait;
use http::Method;
use parking_lot::Mutex;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Predicate deciding whether a response should be retried.
pub type ValidateRetry = Arc<dyn Fn(&Response) -> bool + Send + Sync>;

/// Source of uniformly distributed numbers for the backoff jitter.
pub trait RandomSource: Send + Sync {
    /// A number in `[min, max)`. Returns `min` when the range is empty.
    fn uniform(&self, min: f64, max: f64) -> f64;
}

/// [`RandomSource`] backed by the thread-local `rand` generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn uniform(&self, min: f64, max: f64) -> f64 {
        if min >= max {
            return min;
        }
        rand::rng().random_range(min..max)
    }
}

/// Retry configuration.
#[derive(Clone)]
pub struct RetryConfig {
    /// Header carrying the number of retries performed.
    pub header_retry_count: String,
    /// Header carrying the last retry delay, in milliseconds.
    pub header_retry_time: String,
    /// Maximum delay between attempts, in seconds.
    pub max_retry_time_in_secs: f64,
    /// Base delay, in seconds.
    pub initial_retry_time_in_secs: f64,
    /// Jitter factor applied around the previous delay.
    pub factor: f64,
    /// Growth applied to each delay.
    pub multiplier: f64,
    /// Maximum number of retries.
    pub retries: u32,
    /// Decides which responses are retried.
    pub validate_retry: ValidateRetry,
    /// Random source for the jitter.
    pub random: Arc<dyn RandomSource>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            header_retry_count: "x-manifold-retry-count".to_string(),
            header_retry_time: "x-manifold-retry-time".to_string(),
            max_retry_time_in_secs: 5.0,
            initial_retry_time_in_secs: 0.1,
            factor: 0.2,
            multiplier: 2.0,
            retries: 5,
            validate_retry: Arc::new(|response: &Response| response.status() >= 500),
            random: Arc::new(ThreadRandom),
        }
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("header_retry_count", &self.header_retry_count)
            .field("header_retry_time", &self.header_retry_time)
            .field("max_retry_time_in_secs", &self.max_retry_time_in_secs)
            .field("initial_retry_time_in_secs", &self.initial_retry_time_in_secs)
            .field("factor", &self.factor)
            .field("multiplier", &self.multiplier)
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

impl RetryConfig {
    /// Set the maximum number of retries.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the jitter factor.
    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    /// Set the delay multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set the maximum delay, in seconds.
    pub fn with_max_retry_time_in_secs(mut self, secs: f64) -> Self {
        self.max_retry_time_in_secs = secs;
        self
    }

    /// Set the base delay, in seconds.
    pub fn with_initial_retry_time_in_secs(mut self, secs: f64) -> Self {
        self.initial_retry_time_in_secs = secs;
        self
    }

    /// Rename the retry headers.
    pub fn with_headers(mut self, retry_count: impl Into<String>, retry_time: impl Into<String>) -> Self {
        self.header_retry_count = retry_count.into();
        self.header_retry_time = retry_time.into();
        self
    }

    /// Set the retry predicate.
    pub fn with_validate_retry<F>(mut self, validate: F) -> Self
    where
        F: Fn(&Response) -> bool + Send + Sync + 'static,
    {
        self.validate_retry = Arc::new(validate);
        self
    }

    /// Set the random source.
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }
}

/// A delay drawn uniformly around `retry_time`, `factor` setting the spread.
pub fn random_from_retry_time(retry_time: f64, factor: f64, random: &dyn RandomSource) -> f64 {
    let delta = factor * retry_time;
    random.uniform(retry_time - delta, retry_time + delta)
}

/// Delay following `retry_time`, in milliseconds.
///
/// ```text
/// delta = factor * retry_time
/// candidate = uniform(retry_time - delta, retry_time + delta)
/// next = min(candidate * multiplier, max_retry_time_in_secs * 1000)
/// ```
pub fn calculate_exponential_retry_time(retry_time: f64, config: &RetryConfig) -> f64 {
    let max = config.max_retry_time_in_secs * 1000.0;
    let candidate = random_from_retry_time(retry_time, config.factor, config.random.as_ref());
    (candidate * config.multiplier).min(max)
}

/// Factory for the retry middleware. Only GET requests are retried.
#[derive(Debug, Clone, Default)]
pub struct Retry {
    config: RetryConfig,
}

impl Retry {
    /// Create the factory.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Wrap the factory for use in a middleware list.
    pub fn into_factory(self) -> Arc<dyn MiddlewareFactory> {
        Arc::new(self)
    }
}

impl MiddlewareFactory for Retry {
    fn name(&self) -> &str {
        "RetryMiddleware"
    }

    fn create(&self, _params: &MiddlewareParams) -> Box<dyn Middleware> {
        Box::new(RetryMiddleware {
            config: self.config.clone(),
            state: Mutex::new(RetryState::default()),
        })
    }
}

#[derive(Debug, Default)]
struct RetryState {
    enabled: bool,
    inbound: Option<Request>,
}

struct RetryMiddleware {
    config: RetryConfig,
    state: Mutex<RetryState>,
}

impl RetryMiddleware {
    /// Turn a downstream failure into a response, or hand it back when it
    /// must reach the caller untouched.
    fn failure_response(&self, error: ClientError) -> std::result::Result<Response, ClientError> {
        match error {
            ClientError::Response(response) => Ok(*response),
            error @ ClientError::InfiniteLoop { .. } => Err(error),
            error if error.is_attributed() => Err(error),
            error => match &self.state.lock().inbound {
                Some(request) => Ok(Response::failure(request, 400, error.to_string())),
                None => Err(error),
            },
        }
    }

    fn stamp(&self, response: Response, retry_count: u32, retry_time: f64) -> Response {
        response.enhance(
            ResponseExtras::new()
                .header(&self.config.header_retry_count, retry_count.to_string())
                .header(&self.config.header_retry_time, format!("{}", retry_time.round() as u64)),
        )
    }
}

#[async_trait]
impl Middleware for RetryMiddleware {
    async fn prepare_request(&self, next: Next<Request>, _abort: Abort) -> Result<Request> {
        let request = next.run().await?;
        let mut state = self.state.lock();
        state.enabled = *request.method() == Method::GET;
        state.inbound = Some(request.clone());
        Ok(request)
    }

    async fn response(&self, next: Next<Response>, _renew: Renew) -> Result<Response> {
        if !self.state.lock().enabled {
            return next.run().await;
        }

        let config = &self.config;
        let mut retry_count = 0;
        let mut retry_time = random_from_retry_time(
            config.initial_retry_time_in_secs * 1000.0,
            config.factor,
            config.random.as_ref(),
        );

        loop {
            let next_retry_time = calculate_exponential_retry_time(retry_time, config);
            let should_retry = retry_count < config.retries;

            let (response, failed) = match next.run().await {
                Ok(response) => (response, false),
                Err(error) => (self.failure_response(error)?, true),
            };

            if should_retry && (config.validate_retry)(&response) {
                debug!(
                    status = response.status(),
                    retry = retry_count + 1,
                    delay_ms = retry_time,
                    "Retrying request"
                );
                tokio::time::sleep(Duration::from_secs_f64(retry_time.max(0.0) / 1000.0)).await;
                retry_count += 1;
                retry_time = next_retry_time;
                continue;
            }

            let response = self.stamp(response, retry_count, retry_time);
            return if failed {
                Err(ClientError::response(response))
            } else {
                Ok(response)
            };
        }
    }
}
