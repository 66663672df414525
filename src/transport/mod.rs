//! Outbound call execution.

mod http_transport;

use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;

use crate::dispatch::DispatchRequest;
use crate::error::DispatchError;

pub use http_transport::HttpTransport;

/// Response body as a stream of raw chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, DispatchError>> + Send>>;

/// A connected response whose body has not been read yet.
pub struct DispatchResponse {
    pub status: http::StatusCode,
    pub body: ByteStream,
}

impl fmt::Debug for DispatchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Executes outbound requests.
///
/// Implementations must not retry: a failure surfaces to the pipeline as is.
#[async_trait::async_trait]
pub trait DispatchTransport: Send + Sync {
    /// Send the request and return once response headers arrived.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Transport`] or [`DispatchError::Timeout`] when
    /// the request cannot be completed.
    async fn execute(&self, request: &DispatchRequest) -> Result<DispatchResponse, DispatchError>;
}
