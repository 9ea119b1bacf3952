//! Query endpoints ("apis") that topics fan their query out to.
//!
//! An endpoint is resolved by name through an [`ApiRegistry`] and exposes a
//! single operation: run a query and return a result count. Endpoints
//! classify their own failures; only [`ApiError::Unavailable`] is retried by
//! a topic.

use std::future::Future;

use async_trait::async_trait;

mod registry;

pub use registry::{ApiRegistry, ApiRegistryBuilder};

/// Failure returned by an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Temporarily unreachable. Drives the topic's retry state machine.
    #[error("api unavailable: {0}")]
    Unavailable(String),
    /// Any other failure. Never retried.
    #[error("api failed: {0}")]
    Failed(String),
}

impl ApiError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// True for failures a topic should retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Trait implemented by endpoints that can be queried by topics.
#[async_trait]
pub trait ApiEndpoint: Send + Sync {
    /// Run `query` and return how many results it produced.
    async fn query(&self, query: String) -> Result<i64, ApiError>;
}

/// Function wrapper that implements `ApiEndpoint`.
pub struct FnApi<F, Fut>(pub F)
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<i64, ApiError>> + Send + 'static;

#[async_trait]
impl<F, Fut> ApiEndpoint for FnApi<F, Fut>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<i64, ApiError>> + Send + 'static,
{
    async fn query(&self, query: String) -> Result<i64, ApiError> {
        (self.0)(query).await
    }
}
