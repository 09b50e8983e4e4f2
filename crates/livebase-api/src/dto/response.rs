//! Response DTOs.

use serde::{Deserialize, Serialize};

use livebase_realtime::EngineStatus;

/// Standard success response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    /// Whether the request was successful.
    pub success: bool,
    /// Response data.
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    /// Creates a successful response.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the store is unreachable.
    pub status: String,
    /// Server version.
    pub version: String,
    /// `connected`, `unavailable` or `disabled`.
    pub database: String,
    /// Realtime engine counters.
    pub realtime: EngineStatus,
}
