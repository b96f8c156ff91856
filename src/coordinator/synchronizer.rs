use std::sync::Arc;
use std::time::Duration;

use base64::prelude::*;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::Backend;
use crate::bus::MessageBus;
use crate::cache::FileCache;
use crate::config::CoordinatorConfig;
use crate::error::{CheckerError, Result};
use crate::events::CheckRequestEvent;
use crate::store::{DispatchRecord, RecordStore};

/// Polls the backend for pending work and turns it into bus dispatches.
///
/// Exclusively owns creation of dispatch records. Correctness relies only
/// on per-step serialization: every step is handled in a single
/// read-modify-write pass against the record store.
pub struct Synchronizer {
    backend: Arc<dyn Backend>,
    store: Arc<dyn RecordStore>,
    bus: Arc<dyn MessageBus>,
    cache: FileCache,
    config: CoordinatorConfig,
}

impl Synchronizer {
    pub fn new(
        backend: Arc<dyn Backend>,
        store: Arc<dyn RecordStore>,
        bus: Arc<dyn MessageBus>,
        cache: FileCache,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            backend,
            store,
            bus,
            cache,
            config,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            self.poll_cycle(&cancel).await;
            if sleep_or_cancelled(self.config.poll_interval_ms, &cancel).await {
                return;
            }
        }
    }

    /// One polling cycle: fetch pending work and synchronize every step.
    pub async fn poll_cycle(&self, cancel: &CancellationToken) {
        let work = match self.backend.pending_work().await {
            Ok(work) => work,
            Err(e) => {
                tracing::error!(error = %e, "could not poll backend for pending work");
                return;
            }
        };
        for (attempt_id, step_ids) in work {
            let latest = match self.store.latest_dispatch_time(attempt_id).await {
                Ok(latest) => latest,
                Err(e) => {
                    tracing::error!(attempt_id, error = %e, "could not read dispatch history");
                    continue;
                }
            };
            for step_id in step_ids {
                // A single failing step never stops the loop.
                if let Err(e) = self.sync_step(attempt_id, step_id, latest).await {
                    tracing::error!(attempt_id, step_id, error = %e, "step synchronization failed");
                }
                // Back-pressure between steps.
                if sleep_or_cancelled(self.config.step_delay_ms, cancel).await {
                    return;
                }
            }
        }
    }

    /// The dispatch predicate. Intentionally defensive against duplicate or
    /// out-of-order backend signals: a fresh dispatch happens only when no
    /// record exists or the current record is both timestamp-current and
    /// already resolved, which collapses to "don't double-dispatch open
    /// work". A resolved record whose timestamp fell behind the attempt's
    /// latest is replayed to the backend instead.
    async fn sync_step(
        &self,
        attempt_id: i64,
        step_id: i64,
        latest: Option<DateTime<Utc>>,
    ) -> Result<()> {
        match self.store.find_by_step(step_id).await? {
            Some(record)
                if Some(record.sent_at) != latest && record.serialized_result.is_some() =>
            {
                tracing::info!(attempt_id, step_id, job = %record.id, "replaying completed check");
                if let Some(status) = &record.last_serialized_status {
                    self.backend.set_status(step_id, status).await?;
                }
                if let Some(result) = &record.serialized_result {
                    self.backend.set_result(step_id, result).await?;
                }
                Ok(())
            }
            Some(record)
                if Some(record.sent_at) == latest && record.serialized_result.is_some() =>
            {
                self.dispatch(attempt_id, step_id).await
            }
            None => self.dispatch(attempt_id, step_id).await,
            Some(_) => Ok(()), // open work, a dispatch is already in flight
        }
    }

    async fn dispatch(&self, attempt_id: i64, step_id: i64) -> Result<()> {
        let submission = self.backend.submission(attempt_id, &[]).await?;

        let missing: Vec<(String, String)> = submission
            .file_hashes()
            .filter(|(_, hash)| !self.cache.exists(hash))
            .map(|(name, hash)| (name.to_string(), hash.to_string()))
            .collect();

        let submission = if missing.is_empty() {
            submission
        } else {
            // Refetch with the missing hashes so the backend inlines their
            // content, then populate the cache.
            let hashes: Vec<String> = missing.iter().map(|(_, hash)| hash.clone()).collect();
            let with_content = self.backend.submission(attempt_id, &hashes).await?;
            for (name, hash) in &missing {
                let content = with_content.files.get(name).ok_or_else(|| {
                    CheckerError::Backend(format!("backend did not inline content of {}", name))
                })?;
                let bytes = BASE64_STANDARD.decode(content)?;
                self.cache.write(hash, &bytes)?;
                tracing::info!(file = %name, hash = %hash, "cached submission file");
            }
            with_content
        };

        let job_id = Uuid::new_v4();
        let request = CheckRequestEvent {
            submission_id: job_id,
            files: submission
                .file_hashes()
                .map(|(name, hash)| (name.to_string(), hash.to_string()))
                .collect(),
            plain_parameters: submission.parameters.clone(),
        };
        let record = DispatchRecord {
            id: job_id,
            attempt_id,
            attempt_step_id: step_id,
            sent_at: Utc::now(),
            serialized_request: serde_json::to_string(&request)?,
            last_serialized_status: None,
            serialized_result: None,
        };

        self.store.insert(record).await?;
        self.bus
            .publish_request(&submission.checker_system_name, request)
            .await?;
        tracing::info!(job = %job_id, attempt_id, step_id, topic = %submission.checker_system_name, "dispatched check request");
        Ok(())
    }
}

/// Sleep for `ms`, returning true when cancelled instead.
pub(crate) async fn sleep_or_cancelled(ms: u64, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(Duration::from_millis(ms)) => false,
    }
}
