use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

use crate::core::backend::TargetUrl;

/// Custom error type for forwarding operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ForwardError {
    /// Error when the connection to the upstream fails
    #[error("Connection error: {0}")]
    Connection(String),

    /// Error when the request cannot be rewritten for the upstream
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type alias for forwarding operations
pub type ForwardResult<T> = Result<T, ForwardError>;

/// ForwardingEngine defines the port (interface) for relaying one HTTP
/// exchange to an upstream target.
///
/// The caller supplies a target it holds exclusively for the lifetime of the
/// exchange; the engine performs the full request/response relay and streams
/// the upstream response back to the original caller.
#[async_trait]
pub trait ForwardingEngine: Send + Sync + 'static {
    /// Relay a request to the given upstream target
    ///
    /// # Arguments
    /// * `target` - The upstream address the exchange is bound to
    /// * `req` - The inbound request to relay
    ///
    /// # Returns
    /// A future that resolves to the upstream's response or an error
    async fn forward(
        &self,
        target: &TargetUrl,
        req: Request<AxumBody>,
    ) -> ForwardResult<Response<AxumBody>>;
}
