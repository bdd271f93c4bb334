use std::fmt;
use std::sync::Arc;

use crate::cleaner::OutputArtifactCleaner;
use crate::events::EventPublisher;
use crate::invoker::RuntimeInvoker;
use crate::job::Job;

use super::supervisor::Scheduler;

/// Builder for a [`Scheduler`] with explicit collaborators.
///
/// An invoker is required; the cleaner defaults to
/// [`OutputArtifactCleaner::default`] and events are optional.
///
/// # Example
///
/// ```ignore
/// use fanout::*;
///
/// let scheduler = SchedulerBuilder::<AnalysisJob>::new()
///     .with_invoker(Arc::new(WorkerBinaryInvoker::current_exe("worker")?))
///     .with_events(bus.clone())
///     .build()?;
/// ```
pub struct SchedulerBuilder<J: Job> {
    invoker: Option<Arc<dyn RuntimeInvoker<J>>>,
    cleaner: Option<OutputArtifactCleaner>,
    events: Option<Arc<dyn EventPublisher>>,
}

impl<J: Job> fmt::Debug for SchedulerBuilder<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerBuilder")
            .field("invoker_set", &self.invoker.is_some())
            .field("cleaner", &self.cleaner)
            .field("events_set", &self.events.is_some())
            .finish()
    }
}

impl<J: Job> Default for SchedulerBuilder<J> {
    fn default() -> Self {
        Self {
            invoker: None,
            cleaner: None,
            events: None,
        }
    }
}

impl<J: Job> SchedulerBuilder<J> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the invoker that turns jobs into commands.
    pub fn with_invoker(mut self, invoker: Arc<dyn RuntimeInvoker<J>>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// Set the cleaner used on cancellation and timeouts.
    pub fn with_cleaner(mut self, cleaner: OutputArtifactCleaner) -> Self {
        self.cleaner = Some(cleaner);
        self
    }

    /// Publish run events to `events`.
    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the scheduler, validating all required dependencies.
    pub fn build(self) -> anyhow::Result<Scheduler<J>> {
        let invoker = self
            .invoker
            .ok_or_else(|| anyhow::anyhow!("invoker not configured"))?;
        Ok(Scheduler::new(
            invoker,
            self.cleaner.unwrap_or_default(),
            self.events,
        ))
    }
}
