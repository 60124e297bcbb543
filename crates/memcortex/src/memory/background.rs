//! Owned background work queue
//!
//! A single consumer task takes jobs in submission order and chains them per
//! user: a user's jobs run one at a time in that order, while jobs of
//! different users run concurrently. Every job gets a [`TaskHandle`] that can
//! be awaited or dropped, and every outcome is published as a [`TaskEvent`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::{CortexError, Result};

type BoxedJob = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

const EVENT_CAPACITY: usize = 256;

/// How a background job ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "error", rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded,
    Failed(String),
}

/// Published once per finished job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskEvent {
    pub label: String,
    pub user_id: String,
    pub outcome: TaskOutcome,
}

struct QueuedTask {
    label: String,
    user_id: String,
    job: BoxedJob,
    done: oneshot::Sender<Result<()>>,
}

/// Completion of one submitted job
#[derive(Debug)]
pub struct TaskHandle {
    label: String,
    receiver: oneshot::Receiver<Result<()>>,
}

impl TaskHandle {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Wait for the job and return its result
    pub async fn wait(self) -> Result<()> {
        self.receiver.await.map_err(|_| {
            CortexError::Queue(format!("background task {} was dropped", self.label))
        })?
    }
}

/// Bounded queue of labelled jobs, ordered per user, with one owned consumer
pub struct BackgroundTasks {
    sender: RwLock<Option<mpsc::Sender<QueuedTask>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<TaskEvent>,
}

impl BackgroundTasks {
    /// Start the consumer. Must be called from within a tokio runtime.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let consumer = tokio::spawn(run_consumer(receiver, events.clone()));

        Self {
            sender: RwLock::new(Some(sender)),
            consumer: Mutex::new(Some(consumer)),
            events,
        }
    }

    /// Receive an event for every job that finishes from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Queue `job`, waiting for space if the queue is full.
    ///
    /// After [`shutdown`](Self::shutdown) the returned handle resolves to a
    /// queue error and the job never runs.
    pub async fn submit<F>(&self, label: &str, user_id: &str, job: F) -> TaskHandle
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let (done, receiver) = oneshot::channel();
        let task = QueuedTask {
            label: label.to_string(),
            user_id: user_id.to_string(),
            job: Box::pin(job),
            done,
        };

        let sender = self.sender.read().await.clone();
        let rejected = match sender {
            Some(sender) => sender.send(task).await.err().map(|e| e.0),
            None => Some(task),
        };

        if let Some(task) = rejected {
            warn!("Background queue closed, dropping {} for {}", task.label, task.user_id);
            let _ = task
                .done
                .send(Err(CortexError::Queue("background queue is closed".to_string())));
        }

        TaskHandle {
            label: label.to_string(),
            receiver,
        }
    }

    /// Stop accepting jobs, run what is queued, and wait until every user's
    /// chain has finished
    pub async fn shutdown(&self) {
        self.sender.write().await.take();

        let consumer = self.consumer.lock().await.take();
        if let Some(consumer) = consumer {
            if let Err(e) = consumer.await {
                error!("Background consumer ended abnormally: {}", e);
            }
        }
        debug!("Background tasks shut down");
    }
}

async fn run_consumer(
    mut receiver: mpsc::Receiver<QueuedTask>,
    events: broadcast::Sender<TaskEvent>,
) {
    // Completion signal of the newest job per user; the next job for that
    // user waits on it before starting.
    let mut tails: HashMap<String, oneshot::Receiver<()>> = HashMap::new();

    while let Some(task) = receiver.recv().await {
        tails.retain(|_, tail| matches!(tail.try_recv(), Err(TryRecvError::Empty)));

        let (finished, tail) = oneshot::channel();
        let previous = tails.insert(task.user_id.clone(), tail);
        let events = events.clone();

        tokio::spawn(async move {
            if let Some(previous) = previous {
                // Err only if the previous runner vanished; go ahead anyway
                let _ = previous.await;
            }
            run_task(task, &events).await;
            let _ = finished.send(());
        });
    }

    for (_, tail) in tails {
        let _ = tail.await;
    }
}

async fn run_task(task: QueuedTask, events: &broadcast::Sender<TaskEvent>) {
    // Each job runs on its own task so a panic only fails that job.
    let result = match tokio::spawn(task.job).await {
        Ok(result) => result,
        Err(e) => Err(CortexError::General(format!("task panicked: {e}"))),
    };

    let outcome = match &result {
        Ok(()) => {
            debug!("Background {} for {} finished", task.label, task.user_id);
            TaskOutcome::Succeeded
        }
        Err(e) => {
            error!("Background {} for {} failed: {}", task.label, task.user_id, e);
            TaskOutcome::Failed(e.to_string())
        }
    };

    // No subscribers is fine.
    let _ = events.send(TaskEvent {
        label: task.label,
        user_id: task.user_id,
        outcome,
    });
    let _ = task.done.send(result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_handle_returns_job_result() {
        let tasks = BackgroundTasks::new(8);

        let ok = tasks.submit("ok", "u1", async { Ok::<(), CortexError>(()) }).await;
        let failed = tasks
            .submit("bad", "u1", async {
                Err::<(), CortexError>(CortexError::Memory("boom".to_string()))
            })
            .await;

        assert_eq!(ok.label(), "ok");
        assert!(ok.wait().await.is_ok());
        let err = failed.wait().await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_jobs_run_in_submission_order() {
        let tasks = BackgroundTasks::new(8);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5u64 {
            let order = Arc::clone(&order);
            handles.push(
                tasks
                    .submit("step", "u1", async move {
                        // later jobs sleep less; only sequential execution keeps the order
                        tokio::time::sleep(Duration::from_millis(10 * (5 - i))).await;
                        order.lock().unwrap().push(i);
                        Ok::<(), CortexError>(())
                    })
                    .await,
            );
        }
        for handle in handles {
            handle.wait().await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_slow_user_does_not_hold_up_others() {
        let tasks = BackgroundTasks::new(8);
        let (release, gate) = oneshot::channel::<()>();
        let second_ran = Arc::new(AtomicBool::new(false));

        let slow = tasks
            .submit("slow", "u1", async move {
                let _ = gate.await;
                Ok::<(), CortexError>(())
            })
            .await;
        let flag = Arc::clone(&second_ran);
        let behind = tasks
            .submit("behind", "u1", async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<(), CortexError>(())
            })
            .await;
        let other = tasks.submit("fast", "u2", async { Ok::<(), CortexError>(()) }).await;

        let other = tokio::time::timeout(Duration::from_secs(1), other.wait()).await;
        assert!(matches!(other, Ok(Ok(()))));
        // u1's second job still waits for its first
        assert!(!second_ran.load(Ordering::SeqCst));

        release.send(()).unwrap();
        slow.wait().await.unwrap();
        behind.wait().await.unwrap();
        assert!(second_ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_users_interleave_but_keep_own_order() {
        let tasks = BackgroundTasks::new(16);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..4u64 {
            for user in ["u1", "u2"] {
                let order = Arc::clone(&order);
                handles.push(
                    tasks
                        .submit("step", user, async move {
                            tokio::time::sleep(Duration::from_millis(5 * (4 - i))).await;
                            order.lock().unwrap().push((user, i));
                            Ok::<(), CortexError>(())
                        })
                        .await,
                );
            }
        }
        for handle in handles {
            handle.wait().await.unwrap();
        }

        let order = order.lock().unwrap();
        for user in ["u1", "u2"] {
            let steps: Vec<u64> = order
                .iter()
                .filter(|(u, _)| *u == user)
                .map(|(_, i)| *i)
                .collect();
            assert_eq!(steps, vec![0, 1, 2, 3]);
        }
    }

    #[tokio::test]
    async fn test_events_report_failures() {
        let tasks = BackgroundTasks::new(8);
        let mut events = tasks.subscribe();

        let handle = tasks
            .submit("save", "u7", async {
                Err::<(), CortexError>(CortexError::Storage("disk full".to_string()))
            })
            .await;
        drop(handle);

        let event = events.recv().await.unwrap();
        assert_eq!(event.label, "save");
        assert_eq!(event.user_id, "u7");
        match event.outcome {
            TaskOutcome::Failed(msg) => assert!(msg.contains("disk full")),
            TaskOutcome::Succeeded => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_stop_consumer() {
        let tasks = BackgroundTasks::new(8);

        let bad = tasks
            .submit("panics", "u1", async {
                if true {
                    panic!("job exploded");
                }
                Ok::<(), CortexError>(())
            })
            .await;
        let good = tasks.submit("after", "u1", async { Ok::<(), CortexError>(()) }).await;

        assert!(bad.wait().await.is_err());
        assert!(good.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_rejects() {
        let tasks = BackgroundTasks::new(8);
        let ran = Arc::new(AtomicUsize::new(0));

        let mut queued = Vec::new();
        for user in ["u1", "u1", "u2"] {
            let counter = Arc::clone(&ran);
            queued.push(
                tasks
                    .submit("slow", user, async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok::<(), CortexError>(())
                    })
                    .await,
            );
        }

        tasks.shutdown().await;
        assert_eq!(ran.load(Ordering::SeqCst), 3);
        for handle in queued {
            assert!(handle.wait().await.is_ok());
        }

        let late = tasks.submit("late", "u1", async { Ok::<(), CortexError>(()) }).await;
        assert!(matches!(late.wait().await, Err(CortexError::Queue(_))));
    }
}
