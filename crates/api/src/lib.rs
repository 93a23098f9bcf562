//! Stratus API: the job status resolver and its HTTP surface (`GET /v3/jobs/{guid}`).
//!
//! The resolver turns an eventually-consistent background deletion into a
//! synchronous-looking status by polling the deletion repositories registered
//! for each job type. It never talks to controllers; it only reads the store.

#![forbid(unsafe_code)]

pub mod handler;
pub mod presenter;
pub mod resolver;

pub use handler::{router, ApiError, JobsState, JOB_PATH};
pub use presenter::{JobLinks, JobResponse, Link};
pub use resolver::{JobError, JobResolver, PollSettings, MAX_POLL_ATTEMPTS};
