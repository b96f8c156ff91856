//! Worker half: the submission check execution pipeline.
//!
//! A worker consumes check requests from its bus topic and runs each
//! through a strictly sequential pipeline:
//!
//! 1. Extract the submission archive, then the template archive over it
//!    (template wins on conflicting paths)
//! 2. Validate the project shape (gradle wrapper present, exactly one
//!    project, named `app`)
//! 3. Build the app and the instrumentation test package
//! 4. Fan out K parallel test attempts, each on its own reserved device
//! 5. Keep the attempt with the best grade and publish it as the verdict
//!
//! # Components
//!
//! - [`SubmissionChecker`]: the pipeline itself
//! - [`CheckWorker`]: the bus consumption loop around it
//! - [`StatusSink`]: where lifecycle statuses go (the bus, in production)

pub mod checker;
pub mod service;

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::bus::MessageBus;
use crate::error::Result;
use crate::events::CheckStatusEvent;
use crate::verdict::ProcessingStatus;

pub use checker::SubmissionChecker;
pub use service::CheckWorker;

/// Receives the pipeline's lifecycle statuses. Statuses are observational;
/// the pipeline emits them in stage order and never reads them back.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn set_status(&self, status: ProcessingStatus) -> Result<()>;
}

/// Publishes statuses for one job onto the bus.
pub struct BusStatusSink {
    bus: Arc<dyn MessageBus>,
    submission_id: Uuid,
}

impl BusStatusSink {
    pub fn new(bus: Arc<dyn MessageBus>, submission_id: Uuid) -> Self {
        Self { bus, submission_id }
    }
}

#[async_trait]
impl StatusSink for BusStatusSink {
    async fn set_status(&self, status: ProcessingStatus) -> Result<()> {
        self.bus
            .publish_status(CheckStatusEvent {
                submission_id: self.submission_id,
                serialized_status: status.to_string(),
            })
            .await
    }
}
