mod job;
mod state;

pub use job::{JobId, JobRecord, JobStatus, JobView, ResultFile};
pub use state::{Lifecycle, ProgressPolicy, Transition};
