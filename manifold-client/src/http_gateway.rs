//! Gateway backed by `reqwest`.

use crate::config::HttpGatewayConfig;
use crate::gateway::{Gateway, GatewayConfiguration, GatewayFactory, client_error_response, prepare_body};
use crate::{ClientError, Headers, Request, Response, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Creates a [`ReqwestGateway`] per dispatch, all sharing one connection
/// pool.
#[derive(Debug, Clone)]
pub struct ReqwestGatewayFactory {
    client: reqwest::Client,
}

impl ReqwestGatewayFactory {
    /// Build the underlying `reqwest` client from `config`.
    pub fn new(config: HttpGatewayConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .user_agent(&config.user_agent);

        if config.compression {
            builder = builder.gzip(true).brotli(true);
        }
        builder = match config.max_redirects {
            Some(max) => builder.redirect(reqwest::redirect::Policy::limited(max)),
            None => builder.redirect(reqwest::redirect::Policy::none()),
        };

        let client = builder
            .build()
            .map_err(|e| ClientError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Reuse an existing `reqwest` client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Wrap the factory for use in configs or manifests.
    pub fn into_factory(self) -> Arc<dyn GatewayFactory> {
        Arc::new(self)
    }
}

impl GatewayFactory for ReqwestGatewayFactory {
    fn create(&self, request: Request, options: GatewayConfiguration) -> Box<dyn Gateway> {
        Box::new(ReqwestGateway {
            client: self.client.clone(),
            request,
            options,
        })
    }
}

/// Gateway performing the exchange with `reqwest`.
///
/// The request timeout (or the configured default) bounds the whole
/// exchange and the request's cancellation token aborts it.
pub struct ReqwestGateway {
    client: reqwest::Client,
    request: Request,
    options: GatewayConfiguration,
}

impl ReqwestGateway {
    fn failure(&self, message: &str, timed_out: bool) -> ClientError {
        ClientError::response(client_error_response(&self.request, &self.options, message, timed_out))
    }

    async fn exchange(&self, method: &Method) -> Result<(u16, Headers, Bytes)> {
        let raw_url = self.request.url()?;
        let url = Url::parse(&raw_url).map_err(|e| ClientError::InvalidUrl(format!("{raw_url}: {e}")))?;
        let (body, headers) = prepare_body(&self.request, &self.options);

        let mut builder = self.client.request(method.clone(), url);
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(auth) = self.request.auth() {
            builder = builder.basic_auth(auth.username, Some(auth.password));
        }
        if let Some(timeout) = self.request.timeout().or(self.options.default_timeout) {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        debug!(method = %method, url = %raw_url, "Sending HTTP request");

        let response = builder.send().await.map_err(|e| self.reqwest_error(e))?;
        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let bytes = response.bytes().await.map_err(|e| self.reqwest_error(e))?;

        debug!(status, bytes = bytes.len(), "Received HTTP response");
        Ok((status, headers, bytes))
    }

    fn reqwest_error(&self, error: reqwest::Error) -> ClientError {
        if error.is_timeout() {
            let timeout = self
                .request
                .timeout()
                .or(self.options.default_timeout)
                .map(|t| t.as_millis())
                .unwrap_or_default();
            self.failure(&format!("Timeout ({timeout}ms)"), true)
        } else {
            ClientError::Transport(error.to_string())
        }
    }
}

#[async_trait]
impl Gateway for ReqwestGateway {
    fn request(&self) -> &Request {
        &self.request
    }

    fn options(&self) -> &GatewayConfiguration {
        &self.options
    }

    async fn perform(&self, method: &Method) -> Result<Response> {
        let outcome = match self.request.signal() {
            Some(signal) => tokio::select! {
                _ = signal.cancelled() => {
                    debug!("Request cancelled before completion");
                    return Err(self.failure("The operation was aborted", false));
                }
                outcome = self.exchange(method) => outcome,
            },
            None => self.exchange(method).await,
        };

        let (status, headers, bytes) = outcome?;
        let raw = (!bytes.is_empty()).then_some(bytes);
        Ok(Response::new(&self.request, status, raw, headers))
    }
}

fn collect_headers(map: &reqwest::header::HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in map {
        let Ok(value) = value.to_str() else {
            continue;
        };
        headers
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    headers
}
