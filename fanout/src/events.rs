use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::job::{JobId, JobStatus};
use crate::runtime::RunOutcome;

/// Identifier of one `Scheduler::run` call.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata envelope attached to every run event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventMeta {
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
}

impl EventMeta {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunEvent {
    pub meta: EventMeta,
    pub payload: RunEventPayload,
}

impl RunEvent {
    pub fn new(run_id: RunId, payload: RunEventPayload) -> Self {
        Self {
            meta: EventMeta::new(run_id),
            payload,
        }
    }
}

/// Progress of a run, in the order the scheduler observes it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
#[non_exhaustive]
pub enum RunEventPayload {
    RunStarted {
        total_jobs: usize,
        concurrency: usize,
    },
    /// A worker was started; `live` counts it.
    Dispatched {
        job_id: JobId,
        sequence: usize,
        entry_point: String,
        live: usize,
    },
    SpawnFailed {
        job_id: JobId,
        sequence: usize,
        error: String,
    },
    Finished {
        job_id: JobId,
        sequence: usize,
        status: JobStatus,
    },
    /// The scheduler saw the cancellation signal and stopped dispatching.
    CancellationObserved {
        live: usize,
        undispatched: usize,
    },
    /// A cleaner pass finished. `job_id` is `None` for the cancellation pass
    /// covering several jobs.
    ArtifactsRemoved {
        job_id: Option<JobId>,
        removed: usize,
        warnings: usize,
    },
    RunFinished {
        outcome: RunOutcome,
        dispatched: usize,
    },
}

/// Sink for run events.
///
/// Publishing must not block the scheduler loop.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: RunEvent) -> anyhow::Result<()>;
}

/// Source of run events for progress displays.
pub trait EventSubscriber: Send + Sync {
    /// Multiple subscribers each receive every event (fan-out).
    fn subscribe(&self) -> broadcast::Receiver<RunEvent>;
}

/// In-process event bus using a tokio broadcast channel.
///
/// Publishing never waits for slow subscribers: when a subscriber falls more
/// than `capacity` events behind it receives `RecvError::Lagged` and resumes
/// from the oldest retained event.
pub struct InProcEventBus {
    sender: broadcast::Sender<RunEvent>,
    capacity: usize,
}

impl fmt::Debug for InProcEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl InProcEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, capacity }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl EventPublisher for InProcEventBus {
    /// If no subscribers exist the event is dropped.
    fn publish(&self, event: RunEvent) -> anyhow::Result<()> {
        let _ = self.sender.send(event);
        Ok(())
    }
}

impl EventSubscriber for InProcEventBus {
    fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}
