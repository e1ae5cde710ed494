use crate::error::{AppError, AppResult};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Unit of work consumed by the pipeline worker
#[derive(Debug, Clone, PartialEq)]
pub enum JobMessage {
    /// Begin a new attempt for a `pending` job
    Start { job_id: Uuid },
    /// Continue a suspended attempt from its checkpoint
    Resume {
        job_id: Uuid,
        attempt: i32,
        resume_from: usize,
        partial_audio_ref: String,
    },
}

impl JobMessage {
    pub fn job_id(&self) -> Uuid {
        match self {
            JobMessage::Start { job_id } | JobMessage::Resume { job_id, .. } => *job_id,
        }
    }
}

/// Producer side of the in-process work queue
#[derive(Clone)]
pub struct WorkQueue {
    sender: mpsc::UnboundedSender<JobMessage>,
}

impl WorkQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<JobMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn enqueue(&self, message: JobMessage) -> AppResult<()> {
        self.sender
            .send(message)
            .map_err(|_| AppError::Internal("Work queue is closed".to_string()))
    }

    /// Deliver `message` after `delay` without blocking the caller
    pub fn enqueue_after(&self, delay: Duration, message: JobMessage) {
        let sender = self.sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let job_id = message.job_id();
            if sender.send(message).is_err() {
                tracing::warn!(job_id = %job_id, "Work queue closed before delayed message was delivered");
            }
        });
    }
}
