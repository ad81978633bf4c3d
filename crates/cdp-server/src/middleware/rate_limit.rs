//! Rate limiting middleware using tower-governor

use std::sync::Arc;

use axum::Router;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tracing::warn;

use crate::config::ApiRateLimitConfig;

/// Attach a per-client-IP rate limit to the router.
///
/// For 100 requests per minute the bucket replenishes one permit every 600ms
/// with a burst capacity of 100.
pub fn apply(router: Router, config: &ApiRateLimitConfig) -> Router {
    let requests_per_minute = config.requests_per_minute.max(1);
    let replenishment_ms = (60_000 / requests_per_minute).max(1);
    let burst_size = u32::try_from(requests_per_minute).unwrap_or(u32::MAX);

    match GovernorConfigBuilder::default()
        .per_millisecond(replenishment_ms)
        .burst_size(burst_size)
        .finish()
    {
        Some(governor_conf) => router.layer(GovernorLayer {
            config: Arc::new(governor_conf),
        }),
        None => {
            warn!(requests_per_minute, "invalid rate limit configuration, limiter disabled");
            router
        },
    }
}
