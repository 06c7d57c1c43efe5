//! Tests for metrics emitted by the gateway pipeline.
//!
//! Uses `metrics_util::debugging::DebuggingRecorder` to capture and assert
//! on emitted metrics without needing a real exporter.

mod common;

use std::sync::Arc;

use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use tokio_util::sync::CancellationToken;

use common::{MockAdapter, ask};
use heimdall::{BreakerConfig, ClientMeta, Gateway, Heimdall, Provider, RetryConfig, telemetry};

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

/// Sum all counter values matching a given metric name.
fn counter_total(snapshot: &SnapshotVec, name: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Sum counter values for `name` whose label `label` equals `value`.
fn counter_with_label(snapshot: &SnapshotVec, name: &str, label: &str, value: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| {
            key.kind() == MetricKind::Counter
                && key.key().name() == name
                && key
                    .key()
                    .labels()
                    .any(|l| l.key() == label && l.value() == value)
        })
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

fn has_histogram(snapshot: &SnapshotVec, name: &str) -> bool {
    snapshot
        .iter()
        .any(|(key, _, _, _)| key.kind() == MetricKind::Histogram && key.key().name() == name)
}

fn gateway(adapter: MockAdapter) -> Gateway {
    Heimdall::builder()
        .adapter(Arc::new(adapter))
        .retry(RetryConfig::disabled())
        .circuit_breaker(BreakerConfig::new().failure_threshold(1))
        .build()
        .unwrap()
}

/// Runs async code within a local recorder scope on the multi-thread runtime.
///
/// `block_in_place` ensures the sync `with_local_recorder` closure stays
/// on the current thread while `block_on` drives the inner async work.
fn record<F: std::future::Future<Output = ()>>(recorder: &DebuggingRecorder, fut: F) {
    metrics::with_local_recorder(recorder, || {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(fut))
    });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn success_then_cache_hit() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    record(&recorder, async {
        let gateway = gateway(MockAdapter::ok(Provider::Claude));
        for _ in 0..2 {
            gateway
                .chat(
                    ask(Provider::Claude, "u1", "hello"),
                    &ClientMeta::new(),
                    &CancellationToken::new(),
                )
                .await
                .unwrap();
        }
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::REQUESTS_TOTAL), 2);
    assert_eq!(
        counter_with_label(&snapshot, telemetry::REQUESTS_TOTAL, "status", "cached"),
        1
    );
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_HITS_TOTAL), 1);
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_MISSES_TOTAL), 1);
    assert_eq!(counter_total(&snapshot, telemetry::TOKENS_TOTAL), 150);
    assert!(counter_total(&snapshot, telemetry::SPEND_MICRO_USD_TOTAL) > 0);
    assert!(has_histogram(&snapshot, telemetry::REQUEST_DURATION_SECONDS));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn failures_open_the_circuit() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    record(&recorder, async {
        let gateway = gateway(MockAdapter::failing_first(Provider::Claude, u32::MAX));
        for _ in 0..2 {
            let _ = gateway
                .chat(
                    ask(Provider::Claude, "u1", "hello"),
                    &ClientMeta::new(),
                    &CancellationToken::new(),
                )
                .await;
        }
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        counter_with_label(&snapshot, telemetry::REQUESTS_TOTAL, "status", "failed"),
        2
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::CIRCUIT_TRANSITIONS_TOTAL, "to", "open"),
        1
    );
    assert_eq!(counter_total(&snapshot, telemetry::CIRCUIT_REJECTIONS_TOTAL), 1);
}

#[tokio::test]
async fn metrics_are_noop_without_recorder() {
    let gateway = gateway(MockAdapter::ok(Provider::Claude));
    gateway
        .chat(
            ask(Provider::Claude, "u1", "hello"),
            &ClientMeta::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
}
