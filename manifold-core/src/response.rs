//! Immutable response wrapper.

use crate::request::Request;
use crate::{ClientError, Headers, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

/// Changes applied by [`Response::enhance`].
#[derive(Debug, Clone, Default)]
pub struct ResponseExtras {
    status: Option<u16>,
    raw_data: Option<Bytes>,
    headers: Headers,
    error: Option<String>,
}

impl ResponseExtras {
    /// Create an empty set of changes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the status.
    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Replace the raw payload.
    pub fn raw_data(mut self, raw_data: impl Into<Bytes>) -> Self {
        self.raw_data = Some(raw_data.into());
        self
    }

    /// Add a header, merged over the existing headers.
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Add headers, merged over the existing headers.
    pub fn headers(mut self, headers: Headers) -> Self {
        for (name, value) in headers {
            self.headers.insert(name.to_ascii_lowercase(), value);
        }
        self
    }

    /// Append an error.
    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Response to a resource method call.
///
/// The originating request is kept with its password masked.
#[derive(Debug, Clone)]
pub struct Response {
    request: Request,
    status: u16,
    raw_data: Option<Bytes>,
    headers: Headers,
    errors: Vec<String>,
    time_elapsed: Option<Duration>,
}

impl Response {
    /// Create a response for `request`.
    pub fn new(request: &Request, status: u16, raw_data: Option<Bytes>, headers: Headers) -> Self {
        Self::with_errors(request, status, raw_data, headers, Vec::new())
    }

    /// Create a response carrying errors.
    pub fn with_errors(
        request: &Request,
        status: u16,
        raw_data: Option<Bytes>,
        headers: Headers,
        errors: Vec<String>,
    ) -> Self {
        let request = request.masked();

        Self {
            request,
            status,
            raw_data,
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), value))
                .collect(),
            errors,
            time_elapsed: None,
        }
    }

    /// Minimal failure response carrying one error message.
    pub fn failure(request: &Request, status: u16, error: impl Into<String>) -> Self {
        Self::with_errors(request, status, None, Headers::new(), vec![error.into()])
    }

    /// The originating request, credentials masked.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Status code. A 1223 reported by some transports is read as 204.
    pub fn status(&self) -> u16 {
        if self.status == 1223 { 204 } else { self.status }
    }

    /// Check if the status is in `[200, 400)`.
    pub fn success(&self) -> bool {
        (200..400).contains(&self.status())
    }

    /// Response headers, names lower-cased.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Look up one header, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Raw payload.
    pub fn raw_data(&self) -> Option<&Bytes> {
        self.raw_data.as_ref()
    }

    /// Check if the content type is `application/json` or `application/*+json`.
    pub fn is_content_type_json(&self) -> bool {
        let Some(content_type) = self.header("content-type") else {
            return false;
        };
        let Some(subtype) = content_type.strip_prefix("application/") else {
            return false;
        };
        let subtype = subtype.split(';').next().unwrap_or_default().trim();
        subtype == "json" || subtype.starts_with("json") || subtype.ends_with("+json")
    }

    /// Payload as JSON when the content type says so, otherwise as text.
    ///
    /// A JSON payload that fails to parse is returned as text.
    pub fn data(&self) -> Value {
        let Some(raw) = &self.raw_data else {
            return Value::Null;
        };

        if self.is_content_type_json()
            && let Ok(value) = serde_json::from_slice(raw)
        {
            return value;
        }
        Value::String(String::from_utf8_lossy(raw).into_owned())
    }

    /// Payload as text.
    pub fn text(&self) -> Result<String> {
        let raw = self.raw_data.clone().unwrap_or_default();
        String::from_utf8(raw.to_vec()).map_err(|e| ClientError::Json(e.to_string()))
    }

    /// Parse the payload as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let raw = self.raw_data.clone().unwrap_or_default();
        serde_json::from_slice(&raw).map_err(ClientError::from)
    }

    /// Most recent error.
    pub fn error(&self) -> Option<&str> {
        self.errors.last().map(String::as_str)
    }

    /// All errors, oldest first.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Time the gateway spent on the exchange.
    pub fn time_elapsed(&self) -> Option<Duration> {
        self.time_elapsed
    }

    /// Return the same response with the elapsed time set.
    pub fn with_time_elapsed(mut self, elapsed: Duration) -> Self {
        self.time_elapsed = Some(elapsed);
        self
    }

    /// Return a new response with `extras` applied.
    ///
    /// Headers are merged (new values win), an error is appended, and the
    /// elapsed time is carried over.
    pub fn enhance(&self, extras: ResponseExtras) -> Self {
        let mut headers = self.headers.clone();
        headers.extend(extras.headers);

        let mut errors = self.errors.clone();
        if let Some(error) = extras.error {
            errors.push(error);
        }

        Self {
            request: self.request.clone(),
            status: extras.status.unwrap_or(self.status),
            raw_data: extras.raw_data.or_else(|| self.raw_data.clone()),
            headers,
            errors,
            time_elapsed: self.time_elapsed,
        }
    }
}
