//! The single-request pipeline.
//!
//! Order, with short-circuits:
//!
//! 1. client and structural validation
//! 2. threat classification (critical is rejected)
//! 3. minute and hour rate windows, scaled by threat level
//! 4. cache lookup; a hit reads the quota but skips breaker, spend and provider
//! 5. circuit breaker check
//! 6. quota check
//! 7. provider call with per-attempt timeout and bounded retries
//! 8. on success: price, cache, commit quota
//!
//! Every outcome, including each rejection, is written to the usage log
//! exactly once by [`Gateway::chat`].

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::Gateway;
use crate::cache::{CacheEntry, Fingerprint, fingerprint};
use crate::providers::with_retry;
use crate::telemetry;
use crate::types::{
    ChatCompletion, ChatRequest, ClientMeta, GatewayResponse, Provider, RequestStatus, Usage,
    UsageLogEntry,
};
use crate::{HeimdallError, Result};

/// A successful pipeline outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayReply {
    pub completion: ChatCompletion,
    /// Served from the response cache.
    pub cached: bool,
    /// Spend for this call; zero for cache hits.
    pub cost_usd: f64,
    pub fingerprint: Fingerprint,
    pub response_time: Duration,
    /// Slots left in the tightest rate window.
    pub rate_limit_remaining: u32,
    /// Spend left before a quota ceiling; absent if the commit failed.
    pub quota_remaining_usd: Option<f64>,
}

impl From<GatewayReply> for GatewayResponse {
    fn from(reply: GatewayReply) -> Self {
        Self {
            success: true,
            data: Some(reply.completion),
            error: None,
            cached: reply.cached,
            cost: reply.cost_usd,
            response_time_ms: Some(millis(reply.response_time)),
            rate_limit_remaining: Some(reply.rate_limit_remaining),
            quota_remaining: reply.quota_remaining_usd,
            status: 200,
        }
    }
}

/// What the usage log needs to know about a request as it progresses.
struct Trace {
    identity: String,
    provider: Provider,
    model: Option<String>,
    fingerprint: Option<Fingerprint>,
    usage: Usage,
}

impl Gateway {
    /// Run one request through the full pipeline.
    ///
    /// Cancelling `cancel` while the provider call is in flight aborts it;
    /// nothing is cached or billed and the request is logged as failed.
    #[instrument(skip_all, fields(provider = %request.provider, identity = %request.caller))]
    pub async fn chat(
        &self,
        request: ChatRequest,
        client: &ClientMeta,
        cancel: &CancellationToken,
    ) -> Result<GatewayReply> {
        let started = Instant::now();
        let mut trace = Trace {
            identity: request.caller.key(),
            provider: request.provider,
            model: request.model.clone(),
            fingerprint: None,
            usage: Usage::default(),
        };

        let result = self.run(&request, client, cancel, &mut trace, started).await;
        let elapsed = started.elapsed();

        let (status, cost, error) = match &result {
            Ok(reply) if reply.cached => (RequestStatus::Cached, 0.0, None),
            Ok(reply) => (RequestStatus::Success, reply.cost_usd, None),
            Err(e @ HeimdallError::RateLimited { .. }) => (RequestStatus::RateLimited, 0.0, Some(e)),
            Err(e) => (RequestStatus::Failed, 0.0, Some(e)),
        };
        if let Some(e) = error {
            match e.status_code() {
                500.. => warn!(code = e.code(), error = %e, "request failed"),
                _ => info!(code = e.code(), error = %e, "request rejected"),
            }
        }

        metrics::counter!(telemetry::REQUESTS_TOTAL,
            "provider" => trace.provider.as_str(),
            "status" => status.as_str(),
        )
        .increment(1);
        metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS,
            "provider" => trace.provider.as_str(),
        )
        .record(elapsed.as_secs_f64());

        self.write_usage_log(trace, status, cost, millis(elapsed), error)
            .await;
        result
    }

    /// [`chat`](Self::chat), folded into the outbound response envelope.
    pub async fn handle(
        &self,
        request: ChatRequest,
        client: &ClientMeta,
        cancel: &CancellationToken,
    ) -> GatewayResponse {
        let started = Instant::now();
        match self.chat(request, client, cancel).await {
            Ok(reply) => reply.into(),
            Err(e) => {
                let mut response = GatewayResponse::from_error(&e);
                response.response_time_ms = Some(millis(started.elapsed()));
                response
            }
        }
    }

    async fn run(
        &self,
        request: &ChatRequest,
        client: &ClientMeta,
        cancel: &CancellationToken,
        trace: &mut Trace,
        started: Instant,
    ) -> Result<GatewayReply> {
        let provider = request.provider;

        // 1. validation
        self.security.validate_client(client)?;
        let messages = self.security.validate_structure(request)?;
        let adapter = self.providers.get(provider)?;

        // 2. threat classification
        let classification = self.security.classify(&request.text_content());
        if classification.is_critical() {
            warn!(issues = ?classification.issues, "blocking critical threat");
            return Err(HeimdallError::CriticalThreat {
                issues: classification.issues,
            });
        }

        // 3. rate limits
        let decision = self
            .limiter
            .check_request(&trace.identity, provider, classification.level)
            .await?;

        // 4. cache
        let normalized = adapter.normalize(request, messages, self.token_limits());
        let fp = fingerprint(&normalized);
        trace.model = Some(normalized.model.clone());
        trace.fingerprint = Some(fp.clone());

        if let Some(entry) = self.cache.get(provider, &fp).await {
            // over-quota callers are refused even a free answer
            let quota = self.quotas.check(&trace.identity, provider).await?;
            trace.usage = entry.response.usage;
            return Ok(GatewayReply {
                completion: entry.response,
                cached: true,
                cost_usd: 0.0,
                fingerprint: fp,
                response_time: started.elapsed(),
                rate_limit_remaining: decision.remaining,
                quota_remaining_usd: Some(quota.remaining_usd()),
            });
        }

        // 5. circuit breaker
        let permit = self.breakers.check(provider, &normalized.model).await?;

        // 6. quota
        self.quotas
            .check_and_reserve(&trace.identity, provider)
            .await?;

        // 7. provider call
        debug!(model = %normalized.model, fingerprint = fp.short(), probe = permit.is_probe(), "calling provider");
        let call = with_retry(&self.retry, provider, self.config.provider_timeout, || {
            adapter.send(&normalized)
        });
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HeimdallError::Cancelled),
            result = call => result,
        };

        let completion = match outcome {
            Ok(completion) => {
                self.breakers.record_success(permit).await;
                completion
            }
            Err(HeimdallError::Cancelled) => {
                drop(permit);
                return Err(HeimdallError::Cancelled);
            }
            Err(e) => {
                self.breakers.record_failure(permit).await;
                return Err(e);
            }
        };

        // 8. price, cache, bill
        let cost = adapter.pricing(&normalized.model).cost(&completion.usage);
        trace.usage = completion.usage;
        let now = self.clock.now();

        self.cache
            .put(CacheEntry::new(
                &fp,
                normalized.clone(),
                completion.clone(),
                cost,
                now,
                self.cache.ttl(),
            ))
            .await;

        let quota_remaining = match self.quotas.commit(&trace.identity, provider, cost).await {
            Ok(record) => Some(record.remaining_usd()),
            Err(e) => {
                error!(error = %e, cost, "failed to commit quota spend");
                None
            }
        };

        let tokens = completion.usage.total_tokens();
        self.limiter
            .record_usage(&trace.identity, provider, u64::from(tokens))
            .await;

        metrics::counter!(telemetry::TOKENS_TOTAL,
            "provider" => provider.as_str(),
            "direction" => "prompt",
        )
        .increment(u64::from(completion.usage.prompt_tokens));
        metrics::counter!(telemetry::TOKENS_TOTAL,
            "provider" => provider.as_str(),
            "direction" => "completion",
        )
        .increment(u64::from(completion.usage.completion_tokens));
        metrics::counter!(telemetry::SPEND_MICRO_USD_TOTAL,
            "provider" => provider.as_str(),
        )
        .increment((cost * 1_000_000.0).round() as u64);

        Ok(GatewayReply {
            completion,
            cached: false,
            cost_usd: cost,
            fingerprint: fp,
            response_time: started.elapsed(),
            rate_limit_remaining: decision.remaining,
            quota_remaining_usd: quota_remaining,
        })
    }

    async fn write_usage_log(
        &self,
        trace: Trace,
        status: RequestStatus,
        cost_usd: f64,
        response_time_ms: u64,
        error: Option<&HeimdallError>,
    ) {
        let entry = UsageLogEntry {
            identity: trace.identity,
            provider: trace.provider,
            model: trace.model,
            fingerprint: trace.fingerprint.map(Fingerprint::into_string),
            status,
            prompt_tokens: trace.usage.prompt_tokens,
            completion_tokens: trace.usage.completion_tokens,
            cost_usd,
            response_time_ms,
            error_code: error.map(|e| e.code().to_string()),
            error_message: error.map(|e| e.to_string()),
            created_at: self.clock.now(),
        };
        if let Err(e) = self.usage.append(entry).await {
            error!(error = %e, "failed to write usage log");
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
