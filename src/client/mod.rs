//! Client Module
//!
//! The capability interface every backend implements, plus the built-in
//! OpenAI-compatible HTTP backend.

pub mod http;

pub use http::HttpBackend;

use crate::api::{GenerationRequest, GenerationResponse};
use crate::config::ClientConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// A text-generation backend.
///
/// `execute` reports ordinary failures inside the returned response instead
/// of erroring, and owns the only same-backend retry tier. Switching to a
/// different backend is the router's job.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Run one request against the backend
    async fn execute(&self, request: &GenerationRequest) -> GenerationResponse;

    /// Best-effort, bounded-time self test
    async fn health_check(&self) -> bool;

    /// Advertised price of one usage unit
    fn cost_per_unit(&self) -> f64;
}

/// Build a client from its configuration
pub fn create_client(backend_id: &str, config: &ClientConfig) -> Result<Arc<dyn BackendClient>> {
    match config {
        ClientConfig::Http(http) => Ok(Arc::new(HttpBackend::new(backend_id, http.clone())?)),
    }
}
