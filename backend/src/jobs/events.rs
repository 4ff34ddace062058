//! Real-time job events via a broadcast channel.
//!
//! Every state change and progress update of a job is published here and
//! can be streamed to clients over SSE. Publishing never blocks and never
//! fails: with no subscriber the event is simply dropped, and a subscriber
//! that falls behind skips the events it missed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::registry::{Job, JobState};

const CHANNEL_CAPACITY: usize = 256;

/// A snapshot of one job at the moment it changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub task_id: String,
    pub state: JobState,
    pub progress: f64,
    pub rows_processed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl From<&Job> for JobEvent {
    fn from(job: &Job) -> Self {
        Self {
            task_id: job.task_id.clone(),
            state: job.state,
            progress: job.progress_fraction,
            rows_processed: job.rows_processed,
            output_file_id: job.result.as_ref().map(|r| r.output_file_id.clone()),
            error: job.error.clone(),
            at: Utc::now(),
        }
    }
}

/// Broadcasts job events to all connected subscribers.
#[derive(Debug, Clone)]
pub struct JobEvents {
    sender: broadcast::Sender<JobEvent>,
}

impl JobEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Log a transition and send it to subscribers.
    pub fn publish(&self, event: JobEvent) {
        match event.state {
            JobState::Failed => warn!(
                task_id = %event.task_id,
                error = event.error.as_deref().unwrap_or(""),
                "job failed"
            ),
            JobState::Processing => {}
            state => info!(
                task_id = %event.task_id,
                %state,
                rows = event.rows_processed,
                "job state changed"
            ),
        }
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::registry::JobRegistry;
    use crate::models::PreprocessOptions;

    #[tokio::test]
    async fn test_subscriber_sees_queued_event() {
        let registry = JobRegistry::new();
        let mut rx = registry.events().subscribe();

        let job = registry.create("file-1", PreprocessOptions::default());
        let event = rx.recv().await.unwrap();

        assert_eq!(event.task_id, job.task_id);
        assert_eq!(event.state, JobState::Queued);
        assert_eq!(event.progress, 0.0);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let events = JobEvents::new();
        let registry = JobRegistry::with_events(events.clone());
        registry.create("file-1", PreprocessOptions::default());
    }
}
