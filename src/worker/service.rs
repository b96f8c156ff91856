use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::bus::MessageBus;
use crate::error::CheckerError;
use crate::events::CheckResultEvent;
use crate::worker::{BusStatusSink, SubmissionChecker};

/// Bus consumption loop: one job at a time per worker instance.
pub struct CheckWorker {
    bus: Arc<dyn MessageBus>,
    checker: Arc<SubmissionChecker>,
    topic: String,
}

impl CheckWorker {
    pub fn new(bus: Arc<dyn MessageBus>, checker: Arc<SubmissionChecker>, topic: String) -> Self {
        Self { bus, checker, topic }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            let request = tokio::select! {
                _ = cancel.cancelled() => break,
                request = self.bus.next_request(&self.topic) => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            let job_id = request.submission_id;
            tracing::info!(job = %job_id, topic = %self.topic, "picked up check request");

            let status = BusStatusSink::new(Arc::clone(&self.bus), job_id);
            match self.checker.check(&request, &status, &cancel).await {
                Ok(verdict) => {
                    let serialized = match serde_json::to_string(&verdict) {
                        Ok(serialized) => serialized,
                        Err(e) => {
                            tracing::error!(job = %job_id, error = %e, "could not serialize verdict");
                            continue;
                        }
                    };
                    let event = CheckResultEvent {
                        submission_id: job_id,
                        serialized_result: serialized,
                        delivery_attempts: 0,
                    };
                    if let Err(e) = self.bus.publish_result(event).await {
                        tracing::error!(job = %job_id, error = %e, "could not publish result");
                    }
                }
                Err(CheckerError::Cancelled) => {
                    tracing::info!(job = %job_id, "check cancelled");
                }
                Err(e) => {
                    // Infrastructure fault: no verdict is published, the
                    // dispatch record stays open and a staleness change on
                    // the backend re-dispatches the step.
                    tracing::error!(job = %job_id, error = %e, "check failed");
                }
            }
        }
        tracing::info!(topic = %self.topic, "check worker stopped");
    }
}
