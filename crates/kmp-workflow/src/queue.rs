//! Asynchronous resume dispatch.
//!
//! A [`ResumeTask`] carries the same tuple as a direct resume call, so it can
//! travel through any at-least-once queue. [`ResumeQueue`] is the sending
//! half of a tokio channel; [`ResumeWorker`] drains it and calls
//! [`WorkflowEngine::resume_workflow`]. Per-task failures are logged and
//! counted, never propagated, so one bad message cannot wedge the worker.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::engine::{ResumeOutcome, WorkflowEngine};
use crate::error::{Result, WorkflowError};

/// Default channel capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// A resume signal in message form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeTask {
    pub instance_id: String,
    pub node_id: String,
    pub port: String,
    #[serde(default)]
    pub data: Value,
}

impl ResumeTask {
    pub fn new(
        instance_id: impl Into<String>,
        node_id: impl Into<String>,
        port: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            node_id: node_id.into(),
            port: port.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Cloneable sender for resume tasks.
#[derive(Clone)]
pub struct ResumeQueue {
    tx: mpsc::Sender<ResumeTask>,
}

impl ResumeQueue {
    /// Create a queue and the receiver a [`ResumeWorker`] drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ResumeTask>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue a task, waiting for capacity.
    pub async fn enqueue(&self, task: ResumeTask) -> Result<()> {
        self.tx.send(task).await.map_err(|_| WorkflowError::QueueClosed)
    }

    /// Enqueue without waiting; fails if the queue is full or closed.
    pub fn try_enqueue(&self, task: ResumeTask) -> Result<()> {
        self.tx.try_send(task).map_err(|e| match e {
            TrySendError::Full(_) => WorkflowError::QueueFull,
            TrySendError::Closed(_) => WorkflowError::QueueClosed,
        })
    }
}

/// Counters for a worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub advanced: usize,
    pub stale: usize,
    pub failed: usize,
}

/// Drains a resume channel into the engine.
pub struct ResumeWorker {
    engine: Arc<WorkflowEngine>,
    rx: mpsc::Receiver<ResumeTask>,
}

impl ResumeWorker {
    pub fn new(engine: Arc<WorkflowEngine>, rx: mpsc::Receiver<ResumeTask>) -> Self {
        Self { engine, rx }
    }

    /// Process tasks until every [`ResumeQueue`] clone has been dropped.
    pub async fn run(mut self) -> WorkerStats {
        let mut stats = WorkerStats::default();
        info!("Resume worker started");

        while let Some(task) = self.rx.recv().await {
            match self.process(&task).await {
                Ok(ResumeOutcome::Advanced(report)) => {
                    debug!(instance_id = %report.instance_id, status = %report.status, "Resume task applied");
                    stats.advanced += 1;
                }
                Ok(ResumeOutcome::Stale { .. }) => stats.stale += 1,
                Err(e) => {
                    warn!(
                        instance_id = %task.instance_id,
                        node_id = %task.node_id,
                        port = %task.port,
                        error = %e,
                        "Resume task failed"
                    );
                    stats.failed += 1;
                }
            }
        }

        info!(
            advanced = stats.advanced,
            stale = stats.stale,
            failed = stats.failed,
            "Resume worker stopped"
        );
        stats
    }

    async fn process(&self, task: &ResumeTask) -> Result<ResumeOutcome> {
        self.engine
            .resume_workflow(&task.instance_id, &task.node_id, &task.port, task.data.clone())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_parses_without_data() {
        let task: ResumeTask = serde_json::from_str(
            r#"{"instance_id":"i-1","node_id":"gate","port":"approved"}"#,
        )
        .unwrap();
        assert_eq!(task, ResumeTask::new("i-1", "gate", "approved"));
        assert!(task.data.is_null());
    }

    #[test]
    fn test_task_with_data() {
        let task = ResumeTask::new("i-1", "pause", "elapsed").with_data(json!({"paid": true}));
        let text = serde_json::to_string(&task).unwrap();
        assert!(text.contains("\"paid\":true"));
    }

    #[tokio::test]
    async fn test_enqueue_after_receiver_dropped() {
        let (queue, rx) = ResumeQueue::channel(4);
        drop(rx);
        let err = queue
            .enqueue(ResumeTask::new("i", "n", "p"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::QueueClosed));
    }

    #[tokio::test]
    async fn test_try_enqueue_full() {
        let (queue, _rx) = ResumeQueue::channel(1);
        queue.try_enqueue(ResumeTask::new("i", "n", "p")).unwrap();
        let err = queue.try_enqueue(ResumeTask::new("i", "n", "p")).unwrap_err();
        assert!(matches!(err, WorkflowError::QueueFull));
        assert_eq!(err.code(), "QueueFull");
    }

    #[tokio::test]
    async fn test_try_enqueue_closed() {
        let (queue, rx) = ResumeQueue::channel(1);
        drop(rx);
        let err = queue.try_enqueue(ResumeTask::new("i", "n", "p")).unwrap_err();
        assert!(matches!(err, WorkflowError::QueueClosed));
    }
}
