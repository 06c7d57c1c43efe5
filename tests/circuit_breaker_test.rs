//! Tests for the circuit breaker state machine.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::manual_clock;
use heimdall::circuit::{BreakerKey, CircuitBreakerRegistry};
use heimdall::store::BreakerStore;
use heimdall::{BreakerConfig, BreakerState, Clock, HeimdallError, ManualClock, MemoryStore, Provider};

fn registry(threshold: u32) -> (CircuitBreakerRegistry, Arc<MemoryStore>, Arc<ManualClock>) {
    let store = Arc::new(MemoryStore::new());
    let clock = manual_clock();
    let registry = CircuitBreakerRegistry::new(
        store.clone(),
        clock.clone(),
        BreakerConfig::new()
            .failure_threshold(threshold)
            .recovery_timeout(Duration::from_secs(30)),
    );
    (registry, store, clock)
}

async fn fail(registry: &CircuitBreakerRegistry, provider: Provider) {
    let permit = registry.check(provider, "m").await.unwrap();
    registry.record_failure(permit).await;
}

#[tokio::test]
async fn opens_after_threshold_failures() {
    let (registry, _, _) = registry(3);

    for _ in 0..2 {
        fail(&registry, Provider::Claude).await;
    }
    let record = registry.provider_state(Provider::Claude).await.unwrap();
    assert_eq!(record.state, BreakerState::Closed);
    assert_eq!(record.failure_count, 2);

    fail(&registry, Provider::Claude).await;
    let err = registry.check(Provider::Claude, "m").await.unwrap_err();
    match err {
        HeimdallError::CircuitOpen { provider, retry_after } => {
            assert_eq!(provider, Provider::Claude);
            assert_eq!(retry_after, Some(Duration::from_secs(30)));
        }
        other => panic!("expected CircuitOpen, got {other:?}"),
    }

    // Rejections do not count as failures.
    let record = registry.provider_state(Provider::Claude).await.unwrap();
    assert_eq!(record.failure_count, 3);
}

#[tokio::test]
async fn half_open_admits_exactly_one_probe() {
    let (registry, _, clock) = registry(1);
    fail(&registry, Provider::Claude).await;

    clock.advance(chrono::Duration::seconds(29));
    assert!(registry.check(Provider::Claude, "m").await.is_err());

    clock.advance(chrono::Duration::seconds(1));
    let probe = registry.check(Provider::Claude, "m").await.unwrap();
    assert!(probe.is_probe());
    assert_eq!(
        registry.provider_state(Provider::Claude).await.unwrap().state,
        BreakerState::HalfOpen
    );
    assert!(registry.check(Provider::Claude, "m").await.is_err());

    registry.record_success(probe).await;
    let record = registry.provider_state(Provider::Claude).await.unwrap();
    assert_eq!(record.state, BreakerState::Closed);
    assert_eq!(record.failure_count, 0);

    let permit = registry.check(Provider::Claude, "m").await.unwrap();
    assert!(!permit.is_probe());
}

#[tokio::test]
async fn failed_probe_reopens() {
    let (registry, _, clock) = registry(1);
    fail(&registry, Provider::Claude).await;
    clock.advance(chrono::Duration::seconds(30));

    let probe = registry.check(Provider::Claude, "m").await.unwrap();
    registry.record_failure(probe).await;

    let record = registry.provider_state(Provider::Claude).await.unwrap();
    assert_eq!(record.state, BreakerState::Open);
    assert_eq!(record.next_attempt_at, Some(clock.now() + chrono::Duration::seconds(30)));
}

#[tokio::test]
async fn providers_are_isolated() {
    let (registry, _, _) = registry(1);
    fail(&registry, Provider::Claude).await;

    assert!(registry.check(Provider::Claude, "m").await.is_err());
    assert!(registry.check(Provider::OpenAi, "m").await.is_ok());
}

#[tokio::test]
async fn state_is_persisted_and_reloaded() {
    let (registry, store, clock) = registry(1);
    fail(&registry, Provider::OpenAi).await;

    let saved = store
        .load_breaker(&BreakerKey::provider(Provider::OpenAi))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.state, BreakerState::Open);

    // A fresh registry over the same store sees the open breaker.
    let restarted =
        CircuitBreakerRegistry::new(store.clone(), clock, BreakerConfig::new().failure_threshold(1));
    assert!(restarted.check(Provider::OpenAi, "m").await.is_err());
}

#[tokio::test]
async fn manual_reset_closes() {
    let (registry, _, _) = registry(1);
    fail(&registry, Provider::Claude).await;

    let reset = registry.reset(Provider::Claude, None).await.unwrap();
    assert_eq!(reset.len(), 1);
    assert_eq!(reset[0].state, BreakerState::Closed);
    assert!(registry.check(Provider::Claude, "m").await.is_ok());
}

#[tokio::test]
async fn snapshot_reflects_stored_and_live_state() {
    let (registry, store, clock) = registry(2);
    fail(&registry, Provider::Claude).await;

    let live = registry.snapshot(&BreakerKey::provider(Provider::Claude)).await;
    assert_eq!(live.state, BreakerState::Closed);
    assert_eq!(live.failure_count, 1);

    // Unknown keys load from the store on first sight.
    let restarted = CircuitBreakerRegistry::new(store, clock, BreakerConfig::new());
    let loaded = restarted.snapshot(&BreakerKey::provider(Provider::Claude)).await;
    assert_eq!(loaded.failure_count, 1);
    let fresh = restarted.snapshot(&BreakerKey::provider(Provider::OpenAi)).await;
    assert_eq!(fresh.failure_count, 0);
}
