#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Stratus Queue Memory Driver
//!
//! In-memory bounded task queue implementing the [`TaskDispatcher`] port.
//!
//! The engine queues TASK and TASK_CHAIN work through [`TaskDispatcher`];
//! executors pull it with [`MemoryTaskQueue::next_task`] and report results
//! through the engine's callback entry point, using the task id as the
//! correlation id.
//!
//! Suitable for desktop and single-process deployments where durability
//! is not required.
//!
//! # Examples
//!
//! ```rust,no_run
//! use stratus_queue_memory::MemoryTaskQueue;
//! use stratus_ports::TaskDispatcher;
//! use stratus_step::TaskRequest;
//! use stratus_core::NodeExecutionId;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = MemoryTaskQueue::new(1024);
//! let request = TaskRequest::new("shell", serde_json::json!({"cmd": "make"}));
//! let task_id = queue.queue_task(NodeExecutionId::new(), &request).await?;
//! if let Some(task) = queue.next_task(Duration::from_secs(1)).await {
//!     assert_eq!(task.task_id, task_id);
//!     // run the task, then report back to the engine...
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use stratus_core::NodeExecutionId;
use stratus_ports::TaskDispatcher;
use stratus_ports::error::PortsError;
use stratus_step::TaskRequest;
use tokio::sync::{Mutex, mpsc};

/// A task waiting for an executor.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    /// Task id, also the callback correlation id.
    pub task_id: String,
    /// Node execution that queued the task.
    pub node_execution_id: NodeExecutionId,
    /// What to run.
    pub request: TaskRequest,
}

/// In-memory bounded task queue.
///
/// Aborted tasks that are still queued are dropped when dequeued.
pub struct MemoryTaskQueue {
    sender: mpsc::Sender<QueuedTask>,
    receiver: Arc<Mutex<mpsc::Receiver<QueuedTask>>>,
    aborted: DashSet<String>,
    queued_count: AtomicUsize,
}

impl MemoryTaskQueue {
    /// Create a new task queue with the given capacity.
    ///
    /// Queueing fails with `PortsError::Internal` when the queue is full.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            aborted: DashSet::new(),
            queued_count: AtomicUsize::new(0),
        }
    }

    /// Waits up to `timeout` for the next task that has not been aborted.
    pub async fn next_task(&self, timeout: Duration) -> Option<QueuedTask> {
        let mut rx = self.receiver.lock().await;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let item = tokio::time::timeout_at(deadline, rx.recv()).await.ok()??;
            self.queued_count.fetch_sub(1, Ordering::Relaxed);
            if self.aborted.remove(&item.task_id).is_none() {
                return Some(item);
            }
        }
    }

    /// Returns `true` if `task_id` was aborted before an executor took it.
    #[must_use]
    pub fn is_aborted(&self, task_id: &str) -> bool {
        self.aborted.contains(task_id)
    }

    /// Number of tasks waiting in the queue.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queued_count.load(Ordering::Relaxed)
    }

    /// Returns `true` when no task is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for MemoryTaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTaskQueue")
            .field("queued", &self.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TaskDispatcher for MemoryTaskQueue {
    async fn queue_task(
        &self,
        node_execution_id: NodeExecutionId,
        request: &TaskRequest,
    ) -> Result<String, PortsError> {
        let task_id = uuid::Uuid::new_v4().to_string();
        let item = QueuedTask {
            task_id: task_id.clone(),
            node_execution_id,
            request: request.clone(),
        };
        self.sender
            .try_send(item)
            .map_err(|e| PortsError::Internal(format!("task queue full or closed: {e}")))?;
        self.queued_count.fetch_add(1, Ordering::Relaxed);
        Ok(task_id)
    }

    async fn abort_task(&self, task_id: &str) -> Result<(), PortsError> {
        self.aborted.insert(task_id.to_owned());
        Ok(())
    }
}
