//! Event channel the orchestration core publishes on.

use queue_core::{JobEvent, JobId};
use tokio::sync::broadcast;

/// Default number of events buffered per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// A sink for job lifecycle events.
///
/// Publishing never blocks and never fails; a channel with no listeners drops
/// the event.
pub trait EventChannel: Send + Sync + 'static {
    fn publish(&self, event: JobEvent);
}

/// Process-wide broadcast of [`JobEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            job_id: None,
            name: None,
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventChannel for EventBus {
    fn publish(&self, event: JobEvent) {
        tracing::trace!(event = event.name(), "{}", event.description());
        let _ = self.tx.send(event);
    }
}

/// A filtered view of an [`EventBus`], keyed by job id and event name.
pub struct Subscription {
    rx: broadcast::Receiver<JobEvent>,
    job_id: Option<JobId>,
    name: Option<&'static str>,
}

impl Subscription {
    /// Only deliver events about `job_id`.
    pub fn for_job(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    /// Only deliver events called `name` (see [`JobEvent::name`]).
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    fn matches(&self, event: &JobEvent) -> bool {
        self.job_id.is_none_or(|id| event.job_id() == Some(id))
            && self.name.is_none_or(|name| event.name() == name)
    }

    /// Next matching event, or `None` once the bus is gone.
    ///
    /// A subscriber that falls behind skips the events it missed.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
