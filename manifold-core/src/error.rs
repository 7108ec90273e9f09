//! Client error types.

use crate::Response;
use std::fmt;
use thiserror::Error;

/// Result type for Manifold operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Pipeline phase a middleware failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The prepare-request phase, before dispatch.
    Request,
    /// The response phase, after dispatch.
    Response,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Request => f.write_str("request"),
            Phase::Response => f.write_str("response"),
        }
    }
}

/// Errors surfaced by a resource method invocation.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The manifest is missing or malformed.
    #[error("Invalid manifest: {0}")]
    Manifest(String),

    /// No gateway factory was configured.
    #[error("No gateway configured, set one on the configs or on the manifest")]
    MissingGateway,

    /// The manifest has no resource with this name.
    #[error("Resource \"{0}\" not found")]
    UnknownResource(String),

    /// The resource has no method with this name.
    #[error("Resource method \"{resource}.{method}\" not found")]
    UnknownMethod {
        /// Resource name.
        resource: String,
        /// Method name.
        method: String,
    },

    /// A path generator produced no path.
    #[error("Method descriptor path function did not return a path, params={params}")]
    InvalidPath {
        /// Parameters handed to the generator, as JSON.
        params: String,
    },

    /// A required `{segment}` could not be resolved.
    #[error("Required parameter missing ({parameter}), \"{template}\" cannot be resolved")]
    MissingPathParameter {
        /// Name of the unresolved segment.
        parameter: String,
        /// The path template.
        template: String,
    },

    /// The resolved URL is not valid.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A middleware failed and the failure was attributed to it.
    #[error("Middleware \"{middleware}\" failed in the {phase} phase: {source}")]
    MiddlewareFailed {
        /// Name of the failing middleware.
        middleware: String,
        /// Phase the failure happened in.
        phase: Phase,
        /// The original failure.
        #[source]
        source: Box<ClientError>,
    },

    /// A middleware broke the prepare-request contract.
    #[error("Middleware \"{middleware}\" should return a request for this resource method but returned {returned}")]
    InvalidMiddlewareResult {
        /// Name of the offending middleware.
        middleware: String,
        /// Description of what was returned instead.
        returned: String,
    },

    /// The middleware stack ran more times than allowed for one invocation.
    #[error(
        "Infinite loop detected (middleware stack invoked {executions} times), check the use of \"renew\" in one of the middleware"
    )]
    InfiniteLoop {
        /// Number of executions attempted.
        executions: usize,
    },

    /// An error handed to `abort` by a middleware. The pipeline unwraps it
    /// before it reaches the caller.
    #[error("{0}")]
    Aborted(Box<ClientError>),

    /// An unsuccessful response.
    #[error("Request failed with status {}", .0.status())]
    Response(Box<Response>),

    /// Transport level failure that was not turned into a response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// Any other failure raised by a middleware or gateway.
    #[error("{0}")]
    Other(String),
}

impl ClientError {
    /// Create an [`ClientError::Other`] from a message.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Wrap an unsuccessful response.
    pub fn response(response: Response) -> Self {
        Self::Response(Box::new(response))
    }

    /// Check if this error carries a response.
    pub fn is_response(&self) -> bool {
        matches!(self, Self::Response(_))
    }

    /// Borrow the carried response, if any.
    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Self::Response(response) => Some(response),
            _ => None,
        }
    }

    /// Take the carried response, if any.
    pub fn into_response(self) -> Option<Response> {
        match self {
            Self::Response(response) => Some(*response),
            _ => None,
        }
    }

    /// Get the HTTP status code if this error carries a response.
    pub fn status_code(&self) -> Option<u16> {
        self.as_response().map(Response::status)
    }

    /// Check if this is a build-time failure, raised before any middleware ran.
    pub fn is_build_error(&self) -> bool {
        matches!(
            self,
            Self::Manifest(_)
                | Self::MissingGateway
                | Self::UnknownResource(_)
                | Self::UnknownMethod { .. }
                | Self::InvalidPath { .. }
                | Self::MissingPathParameter { .. }
        )
    }

    /// Errors that already name their origin and must cross outer
    /// middleware untouched.
    pub fn is_attributed(&self) -> bool {
        matches!(
            self,
            Self::Aborted(_) | Self::MiddlewareFailed { .. } | Self::InvalidMiddlewareResult { .. }
        )
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(error: serde_json::Error) -> Self {
        Self::Json(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_middleware_failure_keeps_source() {
        let error = ClientError::MiddlewareFailed {
            middleware: "AuthMiddleware".to_string(),
            phase: Phase::Request,
            source: Box::new(ClientError::other("token store offline")),
        };

        assert_eq!(
            error.to_string(),
            "Middleware \"AuthMiddleware\" failed in the request phase: token store offline"
        );
        let source = std::error::Error::source(&error).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("token store offline"));
        assert!(error.is_attributed());
    }

    #[test]
    fn test_infinite_loop_names_count() {
        let error = ClientError::InfiniteLoop { executions: 3 };
        assert!(error.to_string().contains("invoked 3 times"));
        assert!(!error.is_build_error());
    }

    #[test]
    fn test_build_errors() {
        assert!(ClientError::MissingGateway.is_build_error());
        assert!(
            ClientError::MissingPathParameter {
                parameter: "id".to_string(),
                template: "/users/{id}".to_string(),
            }
            .is_build_error()
        );
        assert!(!ClientError::other("boom").is_build_error());
    }
}
