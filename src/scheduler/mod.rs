pub mod compile;
pub mod core;
pub mod job;
pub mod registry;

pub use self::core::{ClusterView, MachineView, Scheduler, SchedulerHandle};
pub use job::{JobId, JobKind, JobSpec, JobView, Trigger};
pub use registry::{JobRegistry, JobState};
