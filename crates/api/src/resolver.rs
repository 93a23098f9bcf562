//! Job status resolution.
//!
//! Manifest-apply and fire-and-forget deletes resolve immediately. Org and space
//! deletes poll the registered [`DeletionRepository`] (bounded, cancellable) until a
//! deletion timestamp shows up, then classify its age against the job timeout.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use stratus_core::job::JOB_RESOURCE_TYPE;
use stratus_core::{DeletionError, DeletionRepositories, DeletionRepository, Identity, Job, JobGuidError, JobStatus, JobType};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound on deletion queries per resolve call.
pub const MAX_POLL_ATTEMPTS: u32 = 40;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("{resource_type} not found: {detail}")]
    NotFound { resource_type: &'static str, detail: String },
    #[error("failed to fetch {resource_type} {guid}: {source:#}")]
    Repository {
        resource_type: &'static str,
        guid: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("job resolution cancelled")]
    Cancelled,
}

impl JobError {
    fn job_not_found(detail: impl Into<String>) -> Self {
        JobError::NotFound { resource_type: JOB_RESOURCE_TYPE, detail: detail.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl PollSettings {
    pub fn with_interval(interval: Duration) -> Self {
        Self { max_attempts: MAX_POLL_ATTEMPTS, interval }
    }
}

/// What polling learned about the target resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Observation {
    Gone,
    MarkedAt(DateTime<Utc>),
    NotMarked,
}

pub struct JobResolver {
    repositories: Arc<DeletionRepositories>,
    poll: PollSettings,
}

impl JobResolver {
    pub fn new(repositories: Arc<DeletionRepositories>, poll: PollSettings) -> Self {
        Self { repositories, poll }
    }

    /// Decode `guid` and derive the job's current status.
    pub async fn resolve(&self, identity: &Identity, guid: &str, cancel: &CancellationToken) -> Result<(Job, JobStatus), JobError> {
        let job = Job::from_guid(guid).map_err(|e| {
            warn!(job_guid = %guid, error = %e, "invalid job guid");
            match e {
                JobGuidError::Malformed(_) => JobError::job_not_found(format!("invalid job guid: {guid}")),
                JobGuidError::UnknownType(t) => JobError::job_not_found(format!("invalid job type: {t}")),
            }
        })?;

        let status = match job.job_type {
            JobType::SpaceApplyManifest => JobStatus::Complete,
            JobType::AppDelete | JobType::RouteDelete | JobType::DomainDelete | JobType::RoleDelete => JobStatus::Complete,
            other => {
                let Some(repo) = self.repositories.get(&other) else {
                    warn!(job_guid = %job.guid, job_type = %other, "no deletion repository registered");
                    return Err(JobError::job_not_found(format!("invalid job type: {other}")));
                };
                self.resolve_deletion(repo.as_ref(), identity, &job, cancel).await?
            }
        };

        counter!("job_resolve_total", 1u64, "state" => state_label(&status));
        Ok((job, status))
    }

    async fn resolve_deletion(
        &self,
        repo: &dyn DeletionRepository,
        identity: &Identity,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<JobStatus, JobError> {
        match self.poll_deletion(repo, identity, job, cancel).await? {
            Observation::Gone => Ok(JobStatus::Complete),
            Observation::NotMarked => {
                info!(job_guid = %job.guid, resource_type = job.resource_type, "{} not marked for deletion", job.resource_type);
                Err(JobError::job_not_found(format!("{} not marked for deletion", job.resource_type)))
            }
            Observation::MarkedAt(ts) => Ok(JobStatus::for_deletion_age(job, Utc::now() - ts)),
        }
    }

    /// Query the repository up to `max_attempts` times, sleeping `interval` between
    /// attempts, until the resource is gone or carries a deletion timestamp.
    async fn poll_deletion(
        &self,
        repo: &dyn DeletionRepository,
        identity: &Identity,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<Observation, JobError> {
        for attempt in 1..=self.poll.max_attempts {
            counter!("job_poll_attempts", 1u64);
            let res = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(JobError::Cancelled),
                r = repo.get_deleted_at(identity, &job.resource_guid) => r,
            };
            match res {
                // Forbidden means the caller lost sight of the resource; treated as gone.
                Err(DeletionError::NotFound { .. }) | Err(DeletionError::Forbidden { .. }) => return Ok(Observation::Gone),
                Err(DeletionError::Other(source)) => {
                    error!(resource_type = job.resource_type, resource_guid = %job.resource_guid, error = %format!("{source:#}"), "failed to fetch {} from Kubernetes", job.resource_type);
                    return Err(JobError::Repository {
                        resource_type: job.resource_type,
                        guid: job.resource_guid.clone(),
                        source,
                    });
                }
                Ok(Some(ts)) => return Ok(Observation::MarkedAt(ts)),
                Ok(None) => {}
            }
            if attempt == self.poll.max_attempts {
                break;
            }
            debug!(resource_type = job.resource_type, resource_guid = %job.resource_guid, attempt, "waiting for deletion timestamp");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(JobError::Cancelled),
                _ = tokio::time::sleep(self.poll.interval) => {}
            }
        }
        Ok(Observation::NotMarked)
    }
}

fn state_label(status: &JobStatus) -> &'static str {
    match status {
        JobStatus::Complete => "complete",
        JobStatus::Processing => "processing",
        JobStatus::Failed(_) => "failed",
    }
}
