pub mod audiobook;
pub mod board;
pub mod queue;

pub use board::{new_job_id, JobBoard, JobKind, JobRecord, JobStatus};
