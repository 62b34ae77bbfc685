//! The `JobQueue` port: an optional hand-off point for background work
//! messages. Its absence (no `QUEUE_DRIVER` configured) is a legitimate
//! state — the Job Processor falls back to executing jobs inline — so
//! callers hold `Option<Arc<dyn JobQueue>>`, never a null-object adapter.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Accepts pre-serialized job messages for asynchronous processing.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Hands a single message to the queue.
    async fn send(&self, message: String) -> Result<()>;

    /// Hands a batch of messages to the queue.
    async fn send_batch(&self, messages: Vec<String>) -> Result<()> {
        for message in messages {
            self.send(message).await?;
        }
        Ok(())
    }
}

/// The default/local adapter: an in-process bounded channel. A paired
/// consumer task drains it and dispatches to the Job Processor's handlers;
/// this is "asynchronous" only in the sense of decoupling the producer
/// from handler latency, not in surviving a process restart.
#[derive(Clone)]
pub struct InProcessJobQueue {
    sender: mpsc::Sender<String>,
}

impl InProcessJobQueue {
    /// Builds a queue with the given channel capacity and returns the
    /// receiving half for the caller to spawn a consumer over.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl JobQueue for InProcessJobQueue {
    async fn send(&self, message: String) -> Result<()> {
        self.sender
            .send(message)
            .await
            .map_err(|_| Error::InvalidInput("job queue receiver dropped".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_is_received() {
        let (queue, mut rx) = InProcessJobQueue::new(8);
        queue.send("hello".to_string()).await.unwrap();
        assert_eq!(rx.recv().await, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn send_batch_preserves_order() {
        let (queue, mut rx) = InProcessJobQueue::new(8);
        queue
            .send_batch(vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some("a".to_string()));
        assert_eq!(rx.recv().await, Some("b".to_string()));
    }

    #[tokio::test]
    async fn send_fails_once_receiver_dropped() {
        let (queue, rx) = InProcessJobQueue::new(1);
        drop(rx);
        assert!(queue.send("x".to_string()).await.is_err());
    }
}
