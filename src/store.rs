//! Dispatch record store.
//!
//! One record per dispatch attempt, keyed by the coordinator-issued job ID
//! and indexed by source step and parent attempt. The synchronizer owns
//! record creation; the reconciler owns the result column; both go through
//! record-level read-modify-write so concurrent updates cannot lose writes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{CheckerError, Result};

/// One dispatched check. A new record is only created when no record exists
/// for the step or the existing one is stale (see the synchronizer).
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRecord {
    /// Coordinator-issued job identifier, independent of backend IDs.
    pub id: Uuid,
    pub attempt_id: i64,
    pub attempt_step_id: i64,
    pub sent_at: DateTime<Utc>,
    pub serialized_request: String,
    pub last_serialized_status: Option<String>,
    pub serialized_result: Option<String>,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert(&self, record: DispatchRecord) -> Result<()>;

    async fn find_by_step(&self, attempt_step_id: i64) -> Result<Option<DispatchRecord>>;

    /// Most recent dispatch timestamp among records of `attempt_id`.
    async fn latest_dispatch_time(&self, attempt_id: i64) -> Result<Option<DateTime<Utc>>>;

    /// Store a result on the record for `job_id` and return the updated
    /// record. Missing record is [`CheckerError::RecordNotFound`]: job IDs
    /// are coordinator-issued, so absence is an invariant violation.
    async fn store_result(&self, job_id: Uuid, serialized_result: &str) -> Result<DispatchRecord>;

    /// Store the last observed status on the record for `job_id`.
    async fn store_status(&self, job_id: Uuid, serialized_status: &str) -> Result<DispatchRecord>;
}

/// In-memory store; the single mutex gives each call transactional
/// read-modify-write semantics.
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    records: Arc<Mutex<HashMap<Uuid, DispatchRecord>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn insert(&self, record: DispatchRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        records.insert(record.id, record);
        Ok(())
    }

    async fn find_by_step(&self, attempt_step_id: i64) -> Result<Option<DispatchRecord>> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .filter(|r| r.attempt_step_id == attempt_step_id)
            .max_by_key(|r| r.sent_at)
            .cloned())
    }

    async fn latest_dispatch_time(&self, attempt_id: i64) -> Result<Option<DateTime<Utc>>> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .filter(|r| r.attempt_id == attempt_id)
            .map(|r| r.sent_at)
            .max())
    }

    async fn store_result(&self, job_id: Uuid, serialized_result: &str) -> Result<DispatchRecord> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&job_id)
            .ok_or(CheckerError::RecordNotFound(job_id))?;
        record.serialized_result = Some(serialized_result.to_string());
        Ok(record.clone())
    }

    async fn store_status(&self, job_id: Uuid, serialized_status: &str) -> Result<DispatchRecord> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&job_id)
            .ok_or(CheckerError::RecordNotFound(job_id))?;
        record.last_serialized_status = Some(serialized_status.to_string());
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(attempt_id: i64, step_id: i64, sent_at: DateTime<Utc>) -> DispatchRecord {
        DispatchRecord {
            id: Uuid::new_v4(),
            attempt_id,
            attempt_step_id: step_id,
            sent_at,
            serialized_request: "{}".to_string(),
            last_serialized_status: None,
            serialized_result: None,
        }
    }

    #[tokio::test]
    async fn latest_dispatch_time_spans_the_attempt() {
        let store = InMemoryRecordStore::new();
        let early = Utc::now() - Duration::minutes(10);
        let late = Utc::now();

        store.insert(record(1, 11, early)).await.unwrap();
        store.insert(record(1, 12, late)).await.unwrap();
        store.insert(record(2, 21, early)).await.unwrap();

        assert_eq!(store.latest_dispatch_time(1).await.unwrap(), Some(late));
        assert_eq!(store.latest_dispatch_time(2).await.unwrap(), Some(early));
        assert_eq!(store.latest_dispatch_time(3).await.unwrap(), None);
    }

    #[tokio::test]
    async fn find_by_step_returns_newest_record() {
        let store = InMemoryRecordStore::new();
        let early = Utc::now() - Duration::minutes(5);
        let late = Utc::now();

        store.insert(record(1, 11, early)).await.unwrap();
        let newest = record(1, 11, late);
        store.insert(newest.clone()).await.unwrap();

        assert_eq!(store.find_by_step(11).await.unwrap(), Some(newest));
    }

    #[tokio::test]
    async fn store_result_for_unknown_job_is_an_invariant_violation() {
        let store = InMemoryRecordStore::new();
        let missing = Uuid::new_v4();
        match store.store_result(missing, "{}").await {
            Err(CheckerError::RecordNotFound(id)) => assert_eq!(id, missing),
            other => panic!("expected record-not-found, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn store_result_is_idempotent_under_redelivery() {
        let store = InMemoryRecordStore::new();
        let rec = record(1, 11, Utc::now());
        let id = rec.id;
        store.insert(rec).await.unwrap();

        store.store_result(id, "{\"grade\":1.0}").await.unwrap();
        let second = store.store_result(id, "{\"grade\":1.0}").await.unwrap();
        assert_eq!(second.serialized_result.as_deref(), Some("{\"grade\":1.0}"));
    }
}
