//! Secure transport to the broker
//!
//! [`SecureTransport`] turns an [`Endpoint`] into an encrypted,
//! mutually-authenticated byte stream. The [`Transport`] trait lets the
//! supervisor re-run setup against any stream source, which tests use to
//! substitute in-memory pipes.

use crate::error::TailError;
use tokio::io::{AsyncRead, AsyncWrite};

pub mod endpoint;
pub mod tls;

pub use endpoint::{Endpoint, DEFAULT_STOMP_TLS_PORT};
pub use tls::{Identity, SecureStream, SecureTransport, TransportOptions, TrustStore};

/// Source of connected byte streams
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open one connection to the broker
    async fn establish(&self, endpoint: &Endpoint) -> Result<Self::Stream, TailError>;
}

#[async_trait::async_trait]
impl<T: Transport> Transport for std::sync::Arc<T> {
    type Stream = T::Stream;

    async fn establish(&self, endpoint: &Endpoint) -> Result<Self::Stream, TailError> {
        self.as_ref().establish(endpoint).await
    }
}
