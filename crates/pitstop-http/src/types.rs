//! Response bodies of the system and quota endpoints.

use pitstop_admission::TierUsage;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the counter store is unreachable.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Counter store reachability ("ok" or "unreachable").
    pub store: String,
    /// Server uptime in seconds.
    pub uptime_seconds: u64,
}

#[derive(Serialize, ToSchema)]
pub struct RateLimitStatusResponse {
    /// Active tier policy ("standard" or "api_key_scoped").
    pub policy: String,
    /// Usage of every tier that applies to the caller, in evaluation order.
    pub tiers: Vec<TierUsage>,
}
