pub mod bitmap;
pub mod job;
pub mod queue;
pub mod status;

pub use job::{Job, JobPhase, JobSpec};
pub use queue::{Batch, JobQueue};
pub use status::{JobStatusInfo, QueueStatus};
