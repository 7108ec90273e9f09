//! # Manifold Core
//!
//! Immutable value objects shared by every part of a Manifold client:
//! method descriptors, requests, responses and the client error type.
//!
//! ## Features
//!
//! - **Immutable requests**: every change goes through [`Request::enhance`]
//! - **Path templating**: `{segment}` and `{segment?}` interpolation with
//!   query string encoding and per-parameter aliases
//! - **Credential masking**: responses never hold the original password
//!
//! ## Quick Start
//!
//! ```rust
//! use manifold_core::{MethodDescriptor, Parameters, Request};
//! use std::sync::Arc;
//!
//! let descriptor = Arc::new(MethodDescriptor::builder("https://api.example.com", "/users/{id}").build());
//!
//! let mut params = Parameters::new();
//! params.insert("id".to_string(), 7.into());
//! params.insert("expand".to_string(), "teams".into());
//!
//! let request = Request::new(descriptor, params);
//! assert_eq!(request.url().unwrap(), "https://api.example.com/users/7?expand=teams");
//! ```

mod descriptor;
mod error;
mod path;
mod request;
mod response;

use std::collections::BTreeMap;

pub use descriptor::{
    Attributes, MethodDescriptor, MethodDescriptorBuilder, ParameterEncoder, PathGenerator,
    PathTemplate,
};
pub use error::{ClientError, Phase, Result};
pub use path::{encode_uri_component, to_query_string};
pub use request::{Auth, Request, RequestExtras};
pub use response::{Response, ResponseExtras};

// Re-export common types
pub use bytes::Bytes;
pub use http::Method;
pub use tokio_util::sync::CancellationToken;

/// Call-time parameters.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// Side context carried by a request and handed to middleware factories.
pub type Context = serde_json::Map<String, serde_json::Value>;

/// Header map keyed by lower-cased names.
pub type Headers = BTreeMap<String, String>;
