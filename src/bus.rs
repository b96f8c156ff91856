//! Message bus seam between coordinator and worker.
//!
//! The design assumes an at-least-once, ordered-enough pub/sub with a
//! delayed-republish primitive for retries; both halves stay idempotent
//! under duplicate delivery. [`InMemoryBus`] is the in-process
//! implementation used when coordinator and worker share a process, and by
//! the tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::error::{CheckerError, Result};
use crate::events::{CheckRequestEvent, CheckResultEvent, CheckStatusEvent};

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a job request, topic-keyed by the target checker system name.
    async fn publish_request(&self, topic: &str, event: CheckRequestEvent) -> Result<()>;

    async fn publish_status(&self, event: CheckStatusEvent) -> Result<()>;

    async fn publish_result(&self, event: CheckResultEvent) -> Result<()>;

    /// Republish a result after `delay`; the reconciler's retry primitive.
    async fn publish_result_delayed(&self, event: CheckResultEvent, delay: Duration) -> Result<()>;

    /// Next job request on `topic`. Resolves to `None` when the bus shuts down.
    async fn next_request(&self, topic: &str) -> Option<CheckRequestEvent>;

    async fn next_status(&self) -> Option<CheckStatusEvent>;

    async fn next_result(&self) -> Option<CheckResultEvent>;
}

type RequestChannel = (
    mpsc::UnboundedSender<CheckRequestEvent>,
    Arc<Mutex<mpsc::UnboundedReceiver<CheckRequestEvent>>>,
);

struct BusInner {
    requests: Mutex<HashMap<String, RequestChannel>>,
    status_tx: mpsc::UnboundedSender<CheckStatusEvent>,
    status_rx: Mutex<mpsc::UnboundedReceiver<CheckStatusEvent>>,
    result_tx: mpsc::UnboundedSender<CheckResultEvent>,
    result_rx: Mutex<mpsc::UnboundedReceiver<CheckResultEvent>>,
}

#[derive(Clone)]
pub struct InMemoryBus {
    inner: Arc<BusInner>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(BusInner {
                requests: Mutex::new(HashMap::new()),
                status_tx,
                status_rx: Mutex::new(status_rx),
                result_tx,
                result_rx: Mutex::new(result_rx),
            }),
        }
    }

    async fn topic_channel(&self, topic: &str) -> RequestChannel {
        let mut topics = self.inner.requests.lock().await;
        let (tx, rx) = topics.entry(topic.to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            (tx, Arc::new(Mutex::new(rx)))
        });
        (tx.clone(), Arc::clone(rx))
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish_request(&self, topic: &str, event: CheckRequestEvent) -> Result<()> {
        let (tx, _) = self.topic_channel(topic).await;
        tx.send(event)
            .map_err(|_| CheckerError::Bus(format!("request topic {} closed", topic)))
    }

    async fn publish_status(&self, event: CheckStatusEvent) -> Result<()> {
        self.inner
            .status_tx
            .send(event)
            .map_err(|_| CheckerError::Bus("status channel closed".to_string()))
    }

    async fn publish_result(&self, event: CheckResultEvent) -> Result<()> {
        self.inner
            .result_tx
            .send(event)
            .map_err(|_| CheckerError::Bus("result channel closed".to_string()))
    }

    async fn publish_result_delayed(&self, event: CheckResultEvent, delay: Duration) -> Result<()> {
        let tx = self.inner.result_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(event).is_err() {
                tracing::warn!("result channel closed before delayed republish");
            }
        });
        Ok(())
    }

    async fn next_request(&self, topic: &str) -> Option<CheckRequestEvent> {
        let (_, rx) = self.topic_channel(topic).await;
        let mut rx = rx.lock().await;
        rx.recv().await
    }

    async fn next_status(&self) -> Option<CheckStatusEvent> {
        let mut rx = self.inner.status_rx.lock().await;
        rx.recv().await
    }

    async fn next_result(&self) -> Option<CheckResultEvent> {
        let mut rx = self.inner.result_rx.lock().await;
        rx.recv().await
    }
}
