//! Fanout - bounded-parallelism orchestration of analysis jobs.
//!
//! Fans a batch of independent jobs (simulation replicates, Ne estimation
//! runs) out across a caller-bounded number of OS processes, polls their
//! liveness, and supports cooperative mid-run cancellation that kills every
//! live worker and removes the partial output files they had begun writing.
//!
//! # Core Concepts
//!
//! - **Job**: a typed, serializable payload implementing [`Job`], with a
//!   [`JobKind`] naming its worker entry point and the output suffixes it
//!   writes under its output prefix.
//!
//! - **Queue**: [`JobQueue`] hands out [`JobDescriptor`]s strictly in order.
//!
//! - **Workers**: a [`RuntimeInvoker`] turns a descriptor into a command;
//!   [`WorkerHandle`] owns the spawned process and [`ProcessGroup`] the set
//!   of live ones.
//!
//! - **Scheduler**: [`Scheduler::run`] keeps the group topped up to the
//!   concurrency limit of a [`RunConfig`] until the queue drains or a
//!   [`CancellationSignal`] is set, and returns a [`RunReport`].
//!
//! - **Cleanup**: [`OutputArtifactCleaner`] removes partial outputs of
//!   cancelled or timed-out jobs.
//!
//! # Feature Flags
//!
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use fanout::*;
//! use std::sync::Arc;
//!
//! let template = SimulationReplicate::new("bulltrout.conf", vec![], "params.txt", "out/bt");
//! let queue: JobQueue<AnalysisJob> = template.replicates(20).into_iter().collect();
//!
//! let scheduler = SchedulerBuilder::new()
//!     .with_invoker(Arc::new(WorkerBinaryInvoker::current_exe("worker")?))
//!     .build()?;
//! let signal = CancellationSignal::new();
//! let report = scheduler.run(queue, &RunConfig::new(4), &signal).await;
//! ```

/// Cooperative cancellation.
///
/// [`CancellationSignal`] is a cloneable flag any task may set; the scheduler
/// observes it at its polling points and clears it once handled.
pub mod cancel;

/// Removal of partial output files.
pub mod cleaner;

/// Per-run settings: [`RunConfig`] and [`CleanupPolicy`].
pub mod config;

/// Error types.
///
/// [`FanoutError`] covers spawning and worker-side argv decoding;
/// [`CleanupWarning`] is a non-fatal cleanup problem.
pub mod error;

/// Run progress events.
///
/// The `events` module provides:
/// - [`RunEvent`] and [`RunEventPayload`] for event data
/// - [`EventPublisher`] and [`EventSubscriber`] for pub/sub patterns
/// - [`InProcEventBus`] for in-process broadcasting
pub mod events;

/// Built-in job families and their output conventions.
pub mod families;

/// Command construction for workers and argv decoding inside them.
pub mod invoker;

/// Core job definitions.
///
/// - [`Job`] and [`JobKind`] - traits for job payloads and entry points
/// - [`JobDescriptor`] - one queued unit of work
/// - [`JobId`] - unique job identifier
/// - [`JobStatus`] and [`WorkerState`] - job and process outcomes
pub mod job;

#[cfg(feature = "metrics")]
/// Prometheus collectors, available with the `metrics` feature.
pub mod metrics;

/// The ordered job queue.
pub mod queue;

/// Worker processes and the scheduling loop.
///
/// - [`Scheduler`] and [`SchedulerBuilder`] - the dispatch loop
/// - [`WorkerHandle`] - one spawned process
/// - [`ProcessGroup`] - the live workers of a run
/// - [`RunReport`], [`JobRecord`] and [`RunOutcome`] - run results
pub mod runtime;

/// Tracing spans and recording helpers.
pub mod telemetry;

pub use cancel::*;
pub use cleaner::*;
pub use config::*;
pub use error::{CleanupWarning, FanoutError};
pub use events::*;
pub use families::*;
pub use invoker::*;
pub use job::*;
pub use queue::*;
pub use runtime::{
    JobRecord, ProcessGroup, RunOutcome, RunReport, Scheduler,
    SchedulerBuilder, WorkerHandle,
};
