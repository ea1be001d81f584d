//! Refresh coalescer with statum state machine
//!
//! Collects entity ids whose state should be re-read and sends them to the gateway as
//! one `getState` request per interval. A burst of events for the same thermostat
//! within one window results in a single request.
//!
//! # State Machine
//!
//! ```text
//! Idle ──► Armed ──► Draining ──► Idle ──► Armed ...
//!            │
//!            └── (stop) ──► close queue ──► final Draining ──► Idle, task ends
//! ```
//!
//! # Lifecycle
//!
//! [`RefreshCoalescer::start`] spawns the worker task. [`RefreshCoalescer::stop`]
//! interrupts the current wait, closes the queue, publishes whatever is still pending
//! and waits for the task to finish.

use statum::{machine, state};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::mqtt::message_manager::{OutboundMessage, PublishError, Publisher};

pub const GET_STATE_TOPIC: &str = "cloudapp/QBUSMQTTGW/getState";

#[derive(Debug, thiserror::Error)]
pub enum CoalescerError {
    #[error("Refresh queue closed, dropping {0}")]
    Closed(String),

    #[error("Coalescer already started")]
    AlreadyStarted,

    #[error("Failed to publish refresh request: {0}")]
    Publish(#[from] PublishError),

    #[error("Coalescer task panicked: {0}")]
    Task(String),
}

/// Deduplicated ids taken from the queue in one cycle, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshBatch {
    pub ids: Vec<String>,
}

impl RefreshBatch {
    fn collect(ids: impl IntoIterator<Item = String>) -> Self {
        let mut seen = HashSet::new();
        let ids = ids.into_iter().filter(|id| seen.insert(id.clone())).collect();
        Self { ids }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum CoalescerState {
    Idle,
    Armed,
    Draining(RefreshBatch),
}

#[machine]
pub struct RefreshWorker<S: CoalescerState> {
    receiver: mpsc::UnboundedReceiver<String>,
    publisher: Arc<dyn Publisher>,
    interval: Duration,
}

impl RefreshWorker<Idle> {
    pub fn create(
        receiver: mpsc::UnboundedReceiver<String>,
        publisher: Arc<dyn Publisher>,
        interval: Duration,
    ) -> Self {
        Self::new(receiver, publisher, interval)
    }

    pub fn arm(self) -> RefreshWorker<Armed> {
        trace!("Refresh worker armed ({}ms window)", self.interval.as_millis());
        self.transition()
    }
}

impl RefreshWorker<Armed> {
    /// Waits one interval or until `shutdown` fires. Returns `true` on shutdown.
    pub async fn wait(&mut self, shutdown: &mut oneshot::Receiver<()>) -> bool {
        tokio::select! {
            _ = shutdown => true,
            _ = tokio::time::sleep(self.interval) => false,
        }
    }

    /// Refuses further ids; everything already queued is still drained.
    pub fn close(&mut self) {
        self.receiver.close();
    }

    /// Empties the queue into a deduplicated batch.
    pub fn drain(mut self) -> RefreshWorker<Draining> {
        let mut pending = Vec::new();
        while let Ok(id) = self.receiver.try_recv() {
            pending.push(id);
        }

        let batch = RefreshBatch::collect(pending);
        if !batch.is_empty() {
            debug!("Drained {} ids for refresh", batch.ids.len());
        }
        self.transition_with(batch)
    }
}

impl RefreshWorker<Draining> {
    /// Publishes the batch, if any, and returns to idle.
    pub fn publish(self) -> RefreshWorker<Idle> {
        if let Some(batch) = self.get_state_data() {
            if !batch.is_empty() {
                if let Err(e) = publish_batch(self.publisher.as_ref(), batch) {
                    error!("{}", e);
                }
            }
        }
        self.transition()
    }
}

fn publish_batch(publisher: &dyn Publisher, batch: &RefreshBatch) -> Result<(), CoalescerError> {
    let payload = serde_json::to_vec(&batch.ids).map_err(PublishError::from)?;
    info!("Requesting state refresh for {:?}", batch.ids);
    publisher.publish(OutboundMessage::command(GET_STATE_TOPIC, payload))?;
    Ok(())
}

/// Enqueueing side of the coalescer, cheap to clone into handlers.
#[derive(Clone, Debug)]
pub struct RefreshSender {
    sender: mpsc::UnboundedSender<String>,
}

impl RefreshSender {
    pub fn enqueue(&self, id: impl Into<String>) -> Result<(), CoalescerError> {
        self.sender
            .send(id.into())
            .map_err(|e| CoalescerError::Closed(e.0))
    }
}

/// Owns the worker task and its queue.
pub struct RefreshCoalescer {
    interval: Duration,
    publisher: Arc<dyn Publisher>,
    sender: RefreshSender,
    receiver: Option<mpsc::UnboundedReceiver<String>>,
    task_handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl RefreshCoalescer {
    pub fn new(publisher: Arc<dyn Publisher>, interval: Duration) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            interval,
            publisher,
            sender: RefreshSender { sender },
            receiver: Some(receiver),
            task_handle: None,
            shutdown_tx: None,
        }
    }

    pub fn sender(&self) -> RefreshSender {
        self.sender.clone()
    }

    pub fn enqueue(&self, id: impl Into<String>) -> Result<(), CoalescerError> {
        self.sender.enqueue(id)
    }

    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }

    /// Spawns the drain cycle. The first drain happens one interval after start.
    pub fn start(&mut self) -> Result<(), CoalescerError> {
        let receiver = self.receiver.take().ok_or(CoalescerError::AlreadyStarted)?;
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let worker = RefreshWorker::create(receiver, self.publisher.clone(), self.interval);
        let task_handle = tokio::spawn(async move {
            let mut idle = worker;
            loop {
                let mut armed = idle.arm();
                let stopping = armed.wait(&mut shutdown_rx).await;
                if stopping {
                    debug!("Refresh worker stopping, flushing pending ids");
                    armed.close();
                }

                idle = armed.drain().publish();

                if stopping {
                    break;
                }
            }
            info!("Refresh worker stopped");
        });

        self.task_handle = Some(task_handle);
        info!("Refresh coalescer started ({}ms window)", self.interval.as_millis());
        Ok(())
    }

    /// Flushes pending ids and waits for the worker to end.
    ///
    /// Enqueueing fails once this returns.
    pub async fn stop(&mut self) -> Result<(), CoalescerError> {
        if let Some(tx) = self.shutdown_tx.take() {
            if tx.send(()).is_err() {
                warn!("Refresh worker already terminated");
            }
        }

        // Never started: nothing to flush, just refuse further ids
        if let Some(mut receiver) = self.receiver.take() {
            receiver.close();
        }

        match self.task_handle.take() {
            Some(handle) => handle.await.map_err(|e| CoalescerError::Task(e.to_string())),
            None => Ok(()),
        }
    }
}
