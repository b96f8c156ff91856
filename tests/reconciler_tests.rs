//! Result reconciliation: store-then-push ordering, delayed redelivery on
//! backend failure, the redelivery ceiling, and the status relay.


use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use droidcheck::bus::{InMemoryBus, MessageBus};
use droidcheck::config::CoordinatorConfig;
use droidcheck::coordinator::ResultReconciler;
use droidcheck::events::{CheckResultEvent, CheckStatusEvent};
use droidcheck::store::{DispatchRecord, InMemoryRecordStore, RecordStore};

use harness::FakeBackend;

struct Fixture {
    reconciler: Arc<ResultReconciler>,
    backend: Arc<FakeBackend>,
    store: Arc<InMemoryRecordStore>,
    bus: Arc<InMemoryBus>,
}

fn fixture(backend: FakeBackend, max_redeliveries: u32) -> Fixture {
    let backend = Arc::new(backend);
    let store = Arc::new(InMemoryRecordStore::new());
    let bus = Arc::new(InMemoryBus::new());
    let config = CoordinatorConfig {
        result_retry_delay_ms: 10,
        max_result_redeliveries: max_redeliveries,
        ..Default::default()
    };
    let reconciler = Arc::new(ResultReconciler::new(
        bus.clone(),
        store.clone(),
        backend.clone(),
        config,
    ));
    Fixture {
        reconciler,
        backend,
        store,
        bus,
    }
}

async fn open_record(store: &InMemoryRecordStore, step_id: i64) -> Uuid {
    let id = Uuid::new_v4();
    store
        .insert(DispatchRecord {
            id,
            attempt_id: 1,
            attempt_step_id: step_id,
            sent_at: Utc::now(),
            serialized_request: "{}".to_string(),
            last_serialized_status: None,
            serialized_result: None,
        })
        .await
        .unwrap();
    id
}

/// Poll `condition` until it holds or the deadline passes.
async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

#[tokio::test]
async fn result_is_stored_then_pushed_to_the_backend() {
    let fx = fixture(FakeBackend::default(), 60);
    let job = open_record(&fx.store, 11).await;

    let cancel = CancellationToken::new();
    let reconciler = fx.reconciler.clone();
    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { reconciler.run(cancel).await })
    };

    fx.bus
        .publish_result(CheckResultEvent {
            submission_id: job,
            serialized_result: "{\"type\":\"check_result\"}".to_string(),
            delivery_attempts: 0,
        })
        .await
        .unwrap();

    assert!(wait_for(|| !fx.backend.results.lock().unwrap().is_empty()).await);
    let results = fx.backend.results.lock().unwrap().clone();
    assert_eq!(results, vec![(11, "{\"type\":\"check_result\"}".to_string())]);

    let record = fx.store.find_by_step(11).await.unwrap().unwrap();
    assert_eq!(
        record.serialized_result.as_deref(),
        Some("{\"type\":\"check_result\"}")
    );

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn failed_push_is_redelivered_until_it_succeeds() {
    let backend = FakeBackend::default();
    backend.result_failures.store(2, Ordering::SeqCst);
    let fx = fixture(backend, 60);
    let job = open_record(&fx.store, 11).await;

    let cancel = CancellationToken::new();
    let reconciler = fx.reconciler.clone();
    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { reconciler.run(cancel).await })
    };

    fx.bus
        .publish_result(CheckResultEvent {
            submission_id: job,
            serialized_result: "{}".to_string(),
            delivery_attempts: 0,
        })
        .await
        .unwrap();

    assert!(wait_for(|| !fx.backend.results.lock().unwrap().is_empty()).await);
    // Two failures plus the delivery that stuck.
    assert_eq!(fx.backend.result_attempts.load(Ordering::SeqCst), 3);
    // The record was written on the first pass already.
    assert!(fx
        .store
        .find_by_step(11)
        .await
        .unwrap()
        .unwrap()
        .serialized_result
        .is_some());

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn redelivery_stops_at_the_ceiling() {
    let backend = FakeBackend::default();
    backend.result_failures.store(u32::MAX, Ordering::SeqCst);
    let fx = fixture(backend, 2);
    let job = open_record(&fx.store, 11).await;

    let cancel = CancellationToken::new();
    let reconciler = fx.reconciler.clone();
    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { reconciler.run(cancel).await })
    };

    fx.bus
        .publish_result(CheckResultEvent {
            submission_id: job,
            serialized_result: "{}".to_string(),
            delivery_attempts: 0,
        })
        .await
        .unwrap();

    // First delivery plus two redeliveries, then the event is dropped.
    assert!(wait_for(|| fx.backend.result_attempts.load(Ordering::SeqCst) >= 3).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fx.backend.result_attempts.load(Ordering::SeqCst), 3);
    assert!(fx.backend.results.lock().unwrap().is_empty());

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn result_without_a_record_never_reaches_the_backend() {
    let fx = fixture(FakeBackend::default(), 0);

    let cancel = CancellationToken::new();
    let reconciler = fx.reconciler.clone();
    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { reconciler.run(cancel).await })
    };

    fx.bus
        .publish_result(CheckResultEvent {
            submission_id: Uuid::new_v4(),
            serialized_result: "{}".to_string(),
            delivery_attempts: 0,
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fx.backend.result_attempts.load(Ordering::SeqCst), 0);
    assert!(fx.backend.results.lock().unwrap().is_empty());

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn status_relay_persists_and_forwards() {
    let fx = fixture(FakeBackend::default(), 60);
    let job = open_record(&fx.store, 11).await;

    let cancel = CancellationToken::new();
    let reconciler = fx.reconciler.clone();
    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { reconciler.run_status_relay(cancel).await })
    };

    fx.bus
        .publish_status(CheckStatusEvent {
            submission_id: job,
            serialized_status: "gradle_build".to_string(),
        })
        .await
        .unwrap();

    assert!(wait_for(|| !fx.backend.statuses.lock().unwrap().is_empty()).await);
    let statuses = fx.backend.statuses.lock().unwrap().clone();
    assert_eq!(statuses, vec![(11, "gradle_build".to_string())]);

    let record = fx.store.find_by_step(11).await.unwrap().unwrap();
    assert_eq!(record.last_serialized_status.as_deref(), Some("gradle_build"));

    cancel.cancel();
    handle.await.unwrap();
}
