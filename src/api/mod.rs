//! API Module
//!
//! Request and response types exchanged between callers, the router and
//! backend clients.

pub mod request;
pub mod response;

pub use request::{GenerationParams, GenerationRequest, Priority, DEFAULT_TIMEOUT};
pub use response::{BackendFailure, GenerationResponse};

/// Serde helper encoding a `Duration` as integer milliseconds
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
