//! Telemetry metric name constants.
//!
//! Centralised metric names for heimdall operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `heimdall_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `provider`: provider name ("claude", "openai")
//! - `status`: usage log status ("success", "failed", "cached", "rate_limited")
//! - `direction`: token direction, "prompt" or "completion"
//! - `window`: rate-limit window, "minute" or "hour"
//! - `tier`: cache tier that answered, "fast" or "durable"

/// Total requests that reached a terminal pipeline decision.
///
/// Labels: `provider`, `status`.
pub const REQUESTS_TOTAL: &str = "heimdall_requests_total";

/// End-to-end request duration in seconds.
///
/// Labels: `provider`.
pub const REQUEST_DURATION_SECONDS: &str = "heimdall_request_duration_seconds";

/// Total retry attempts (not counting the initial request).
///
/// Labels: `provider`.
pub const RETRIES_TOTAL: &str = "heimdall_retries_total";

/// Total tokens consumed by upstream calls.
///
/// Labels: `provider`, `direction` ("prompt" | "completion").
pub const TOKENS_TOTAL: &str = "heimdall_tokens_total";

/// Total response cache hits.
///
/// Labels: `provider`, `tier` ("fast" | "durable").
pub const CACHE_HITS_TOTAL: &str = "heimdall_cache_hits_total";

/// Total response cache misses.
///
/// Labels: `provider`.
pub const CACHE_MISSES_TOTAL: &str = "heimdall_cache_misses_total";

/// Total requests rejected by the sliding-window limiter.
///
/// Labels: `provider`, `window`.
pub const RATE_LIMITED_TOTAL: &str = "heimdall_rate_limited_total";

/// Total limiter checks let through because the window store failed.
///
/// Labels: `provider`.
pub const RATE_LIMIT_FAIL_OPEN_TOTAL: &str = "heimdall_rate_limit_fail_open_total";

/// Total circuit breaker state transitions.
///
/// Labels: `provider`, `to` ("closed" | "open" | "half_open").
pub const CIRCUIT_TRANSITIONS_TOTAL: &str = "heimdall_circuit_transitions_total";

/// Total requests rejected because the breaker was open.
///
/// Labels: `provider`.
pub const CIRCUIT_REJECTIONS_TOTAL: &str = "heimdall_circuit_rejections_total";

/// Total threat classifications.
///
/// Labels: `level` ("low" | "medium" | "high" | "critical").
pub const THREAT_CLASSIFICATIONS_TOTAL: &str = "heimdall_threat_classifications_total";

/// Total requests rejected by spend or request quotas.
///
/// Labels: `provider`, `period` ("daily" | "monthly").
pub const QUOTA_REJECTIONS_TOTAL: &str = "heimdall_quota_rejections_total";

/// Total upstream spend in micro-dollars.
///
/// Labels: `provider`.
pub const SPEND_MICRO_USD_TOTAL: &str = "heimdall_spend_micro_usd_total";
