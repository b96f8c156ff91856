use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::backend::Backend;
use crate::bus::MessageBus;
use crate::config::CoordinatorConfig;
use crate::error::Result;
use crate::events::CheckResultEvent;
use crate::store::RecordStore;

/// Consumes result and status events and relays them to the backend.
///
/// Results are never dropped on failure: the whole event is republished
/// after a fixed delay, bounded by the redelivery ceiling. Both the record
/// write and the backend push are safe to repeat, so the handler is
/// idempotent under at-least-once delivery. Statuses are observational and
/// lossy by design.
pub struct ResultReconciler {
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn RecordStore>,
    backend: Arc<dyn Backend>,
    config: CoordinatorConfig,
}

impl ResultReconciler {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        store: Arc<dyn RecordStore>,
        backend: Arc<dyn Backend>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            bus,
            store,
            backend,
            config,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = self.bus.next_result() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if let Err(e) = self.handle_result(&event).await {
                tracing::error!(job = %event.submission_id, error = %e, "could not reconcile result");
                self.schedule_redelivery(event).await;
            }
        }
        tracing::info!("result reconciler stopped");
    }

    async fn handle_result(&self, event: &CheckResultEvent) -> Result<()> {
        let record = self
            .store
            .store_result(event.submission_id, &event.serialized_result)
            .await?;
        self.backend
            .set_result(record.attempt_step_id, &event.serialized_result)
            .await?;
        tracing::info!(job = %event.submission_id, step_id = record.attempt_step_id, "result reconciled");
        Ok(())
    }

    async fn schedule_redelivery(&self, mut event: CheckResultEvent) {
        event.delivery_attempts += 1;
        if event.delivery_attempts > self.config.max_result_redeliveries {
            // Dead-letter policy: past the ceiling the event survives only
            // in the log.
            tracing::error!(
                job = %event.submission_id,
                attempts = event.delivery_attempts,
                result = %event.serialized_result,
                "dropping result event after redelivery ceiling"
            );
            return;
        }
        let delay = Duration::from_millis(self.config.result_retry_delay_ms);
        if let Err(e) = self.bus.publish_result_delayed(event, delay).await {
            tracing::error!(error = %e, "could not schedule result redelivery");
        }
    }

    /// Status relay loop: persist the last observed status on the record
    /// and forward it to the backend. Failures are logged and the status is
    /// dropped; the synchronizer replays the last persisted status when the
    /// staleness window moves.
    pub async fn run_status_relay(&self, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = self.bus.next_status() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            match self
                .store
                .store_status(event.submission_id, &event.serialized_status)
                .await
            {
                Ok(record) => {
                    if let Err(e) = self
                        .backend
                        .set_status(record.attempt_step_id, &event.serialized_status)
                        .await
                    {
                        tracing::warn!(job = %event.submission_id, error = %e, "status push failed");
                    }
                }
                Err(e) => {
                    tracing::warn!(job = %event.submission_id, error = %e, "could not persist status");
                }
            }
        }
        tracing::info!("status relay stopped");
    }
}
