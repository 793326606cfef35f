//! Quota status for the calling identity.

use axum::extract::{Json, Request, State};
use pitstop_admission::TierPolicy;

use crate::error::ApiError;
use crate::middleware::admission::request_identity;
use crate::state::AppState;
use crate::types::RateLimitStatusResponse;

/// Get the caller's quota usage.
///
/// Reads the counters of every tier that applies to this request's identity
/// in the current hour. The read itself does not consume quota, but the
/// request carrying it was admitted (and charged) like any other.
#[utoipa::path(
    get,
    path = "/api/v1/rate-limit",
    responses(
        (status = 200, description = "Current usage per tier", body = RateLimitStatusResponse),
        (status = 400, description = "Missing identity signal", body = crate::error::ErrorBody),
        (status = 500, description = "Counter store failure", body = crate::error::ErrorBody),
    ),
    tag = "Rate Limit"
)]
pub async fn rate_limit_status(
    State(state): State<AppState>,
    req: Request,
) -> Result<Json<RateLimitStatusResponse>, ApiError> {
    let identity = request_identity(&req, state.trust_forwarded_for());
    let cancel = state.shutdown().child_token();
    let tiers = state.status(&identity, &cancel).await?;

    let policy = match state.config().policy {
        TierPolicy::Standard => "standard",
        TierPolicy::ApiKeyScoped => "api_key_scoped",
    };

    Ok(Json(RateLimitStatusResponse {
        policy: policy.to_string(),
        tiers,
    }))
}
