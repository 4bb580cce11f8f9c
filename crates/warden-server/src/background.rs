use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::metrics::Metrics;

type Task = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

enum Message {
    Run { name: &'static str, task: Task },
    Flush(oneshot::Sender<()>),
}

/// Bounded queue of fire-and-forget work, drained by one worker task.
///
/// Submitted futures are owned by the worker, so cancelling the submitter
/// never interrupts them. A full queue drops the task.
#[derive(Debug, Clone)]
pub struct BackgroundTasks {
    sender: mpsc::Sender<Message>,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::Run { name, .. } => write!(f, "Run({name})"),
            Message::Flush(_) => write!(f, "Flush"),
        }
    }
}

impl BackgroundTasks {
    /// Starts the worker on the current tokio runtime.
    pub fn spawn(capacity: usize, metrics: Arc<Metrics>) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        tokio::spawn(run_worker(receiver, Arc::clone(&metrics)));
        Self { sender, metrics }
    }

    /// Queues `task` without waiting. Returns `false` when it was dropped.
    pub fn submit<F, E>(&self, name: &'static str, task: F) -> bool
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display,
    {
        let task: Task = Box::pin(async move { task.await.map_err(|e| e.to_string()) });
        match self.sender.try_send(Message::Run { name, task }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(task = name, "background queue full, dropping task");
                self.metrics.record_background_dropped();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(task = name, "background worker stopped, dropping task");
                self.metrics.record_background_dropped();
                false
            }
        }
    }

    /// Waits until every task submitted before this call has finished.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.sender.send(Message::Flush(done_tx)).await.is_err() {
            return;
        }
        let _ = done_rx.await;
    }
}

async fn run_worker(mut receiver: mpsc::Receiver<Message>, metrics: Arc<Metrics>) {
    while let Some(message) = receiver.recv().await {
        match message {
            Message::Run { name, task } => match tokio::spawn(task).await {
                Ok(Ok(())) => metrics.record_background_completed(),
                Ok(Err(error)) => {
                    tracing::warn!(task = name, %error, "background task failed");
                    metrics.record_background_failed();
                }
                Err(join_error) => {
                    tracing::error!(task = name, error = %join_error, "background task panicked");
                    metrics.record_background_failed();
                }
            },
            Message::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("background worker stopped");
}
