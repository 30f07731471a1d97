//! Configuration Module
//!
//! Handles router configuration loading and validation.

pub mod backend;
pub mod loader;
pub mod settings;

pub use backend::{BackendConfig, CircuitBreakerConfig, ClientConfig, HttpClientConfig};
pub use loader::ConfigLoader;
pub use settings::RouterConfig;
