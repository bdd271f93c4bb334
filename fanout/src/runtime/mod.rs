/// Scheduler construction with explicit collaborators.
pub mod builder;
/// The set of live workers of one run.
pub mod group;
/// The dispatch and cancellation loop.
pub mod supervisor;
/// One spawned worker process.
pub mod worker;

pub use builder::SchedulerBuilder;
pub use group::ProcessGroup;
pub use supervisor::{JobRecord, RunOutcome, RunReport, Scheduler};
pub use worker::WorkerHandle;
