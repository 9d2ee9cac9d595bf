pub mod job;
pub mod queue;
pub mod store;

pub use job::{CreatedBy, Job, JobId, JobStatus, JobType};
pub use queue::JobQueue;
pub use store::{JobSnapshot, JobStore};
