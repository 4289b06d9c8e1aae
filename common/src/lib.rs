//! Tipos compartidos entre master, worker y client.

pub mod key;
pub mod status;
pub mod task;

pub use key::{KeyPart, TaskKey};
pub use status::{GroupStatus, StateCounts, StatusReport};
pub use task::{KeyRequest, Submission, SubmitRequest, TaskAssignment, TaskRequest};
