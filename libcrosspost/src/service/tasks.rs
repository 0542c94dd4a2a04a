//! Background task queue
//!
//! Request handlers persist a post and enqueue a [`Task`]; a worker loop
//! picks tasks up and runs them with bounded concurrency. Posts stranded
//! in `publishing` by a crash are re-enqueued at startup by
//! [`CrosspostService::recover_in_flight`](super::CrosspostService::recover_in_flight).

use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, warn};

use super::CrosspostService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Fan a freshly created post out to its platforms
    Publish { post_id: String },
    /// Replace already-published copies of an edited post
    Repost { post_id: String },
}

impl Task {
    pub fn post_id(&self) -> &str {
        match self {
            Task::Publish { post_id } | Task::Repost { post_id } => post_id,
        }
    }
}

/// Sending half, cloned into every service that enqueues work
#[derive(Debug, Clone)]
pub struct TaskQueue {
    sender: mpsc::UnboundedSender<Task>,
}

pub struct TaskReceiver {
    receiver: mpsc::UnboundedReceiver<Task>,
}

impl TaskQueue {
    pub fn channel() -> (TaskQueue, TaskReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (TaskQueue { sender }, TaskReceiver { receiver })
    }

    /// Enqueue a task. Returns `false` if no worker loop is alive; the post
    /// stays in its persisted state and is picked up by startup recovery.
    pub fn submit(&self, task: Task) -> bool {
        debug!(?task, "Enqueueing task");
        match self.sender.send(task) {
            Ok(()) => true,
            Err(mpsc::error::SendError(task)) => {
                warn!(post_id = task.post_id(), "Task queue closed, task dropped");
                false
            }
        }
    }
}

impl TaskReceiver {
    pub async fn recv(&mut self) -> Option<Task> {
        self.receiver.recv().await
    }

    /// Next queued task without waiting
    pub fn try_recv(&mut self) -> Option<Task> {
        self.receiver.try_recv().ok()
    }
}

/// Run queued tasks until every [`TaskQueue`] handle is dropped.
///
/// At most `concurrency` tasks run at once. A failing task is logged and
/// never stops the loop.
pub async fn run_workers(service: CrosspostService, mut receiver: TaskReceiver, concurrency: usize) {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));

    while let Some(task) = receiver.recv().await {
        let permit = match Arc::clone(&permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let service = service.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let post_id = task.post_id().to_string();
            if let Err(e) = service.run_task(task).await {
                error!(post_id = %post_id, error = %e, "Background task failed");
            }
        });
    }

    // Wait for in-flight tasks before returning
    let _ = permits.acquire_many(concurrency.max(1) as u32).await;
    debug!("Task workers stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_submit_and_receive_in_order() {
        let (queue, mut receiver) = TaskQueue::channel();
        assert!(queue.submit(Task::Publish {
            post_id: "a".to_string()
        }));
        assert!(queue.submit(Task::Repost {
            post_id: "b".to_string()
        }));

        assert_eq!(receiver.recv().await.unwrap().post_id(), "a");
        assert_eq!(
            receiver.try_recv(),
            Some(Task::Repost {
                post_id: "b".to_string()
            })
        );
        assert_eq!(receiver.try_recv(), None);
    }

    #[test]
    fn test_submit_after_receiver_dropped() {
        let (queue, receiver) = TaskQueue::channel();
        drop(receiver);
        assert!(!queue.submit(Task::Publish {
            post_id: "a".to_string()
        }));
    }
}
