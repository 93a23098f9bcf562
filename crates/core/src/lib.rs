//! Stratus core types: job identifiers, derived job states and the deletion query seam.

#![forbid(unsafe_code)]

pub mod deletion;
pub mod job;

pub use deletion::{default_deletion_repositories, DeletionError, DeletionRepositories, DeletionRepository, Identity};
pub use job::{Job, JobGuidError, JobResponseError, JobState, JobStatus, JobType};

pub mod prelude {
    pub use super::{
        DeletionError, DeletionRepositories, DeletionRepository, Identity, Job, JobGuidError,
        JobResponseError, JobState, JobStatus, JobType,
    };
}
