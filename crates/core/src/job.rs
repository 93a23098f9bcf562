//! Job identifiers and the derived status vocabulary.
//!
//! A job GUID has the form `<operation-type>~<resource-guid>`, e.g. `org.delete~4f1c...`.
//! Jobs are never stored; they are decoded from the GUID on every request and their
//! status is recomputed from the target resource.

#![forbid(unsafe_code)]

use std::fmt;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Resource type reported in not-found errors for jobs.
pub const JOB_RESOURCE_TYPE: &str = "Job";

pub const JOB_GUID_DELIMITER: char = '~';

/// Age of a deletion timestamp after which a delete job is reported as failed.
pub const JOB_TIMEOUT: Duration = Duration::from_secs(120);

/// Wire contract for deletion-timeout failures. Must not be renumbered.
pub const DELETION_TIMEOUT_CODE: u32 = 10008;
pub const UNPROCESSABLE_ENTITY_TITLE: &str = "CF-UnprocessableEntity";

static JOB_GUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-z_]+\.[a-z_]+)~([A-Za-z0-9][A-Za-z0-9._-]*)$").expect("job guid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    SpaceApplyManifest,
    AppDelete,
    RouteDelete,
    DomainDelete,
    RoleDelete,
    OrgDelete,
    SpaceDelete,
}

impl JobType {
    pub const ALL: [JobType; 7] = [
        JobType::SpaceApplyManifest,
        JobType::AppDelete,
        JobType::RouteDelete,
        JobType::DomainDelete,
        JobType::RoleDelete,
        JobType::OrgDelete,
        JobType::SpaceDelete,
    ];

    /// GUID prefix for this operation.
    pub fn prefix(self) -> &'static str {
        match self {
            JobType::SpaceApplyManifest => "space.apply_manifest",
            JobType::AppDelete => "app.delete",
            JobType::RouteDelete => "route.delete",
            JobType::DomainDelete => "domain.delete",
            JobType::RoleDelete => "role.delete",
            JobType::OrgDelete => "org.delete",
            JobType::SpaceDelete => "space.delete",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.prefix() == prefix)
    }

    /// Kind of the resource the job targets, as shown to API clients.
    pub fn resource_type(self) -> &'static str {
        match self {
            JobType::SpaceApplyManifest | JobType::SpaceDelete => "Space",
            JobType::AppDelete => "App",
            JobType::RouteDelete => "Route",
            JobType::DomainDelete => "Domain",
            JobType::RoleDelete => "Role",
            JobType::OrgDelete => "Org",
        }
    }

    /// `operation` field of the job representation, e.g. `ORG.DELETE`.
    pub fn operation(self) -> String {
        self.prefix().to_ascii_uppercase()
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobGuidError {
    #[error("invalid job guid: {0}")]
    Malformed(String),
    #[error("invalid job type: {0}")]
    UnknownType(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub guid: String,
    pub job_type: JobType,
    pub resource_guid: String,
    pub resource_type: &'static str,
}

impl Job {
    pub fn new(job_type: JobType, resource_guid: impl Into<String>) -> Self {
        let resource_guid = resource_guid.into();
        Self {
            guid: format!("{}{}{}", job_type.prefix(), JOB_GUID_DELIMITER, resource_guid),
            job_type,
            resource_guid,
            resource_type: job_type.resource_type(),
        }
    }

    pub fn from_guid(guid: &str) -> Result<Self, JobGuidError> {
        let caps = JOB_GUID_RE
            .captures(guid)
            .ok_or_else(|| JobGuidError::Malformed(guid.to_string()))?;
        let prefix = &caps[1];
        let job_type = JobType::from_prefix(prefix)
            .ok_or_else(|| JobGuidError::UnknownType(prefix.to_string()))?;
        Ok(Self::new(job_type, &caps[2]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Complete,
    Processing,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResponseError {
    pub code: u32,
    pub title: String,
    pub detail: String,
}

impl JobResponseError {
    pub fn deletion_timed_out(job: &Job) -> Self {
        Self {
            code: DELETION_TIMEOUT_CODE,
            title: UNPROCESSABLE_ENTITY_TITLE.to_string(),
            detail: format!(
                "{} deletion timed out, check the remaining {:?} resource",
                job.resource_type, job.resource_guid
            ),
        }
    }
}

/// Derived status of a job; recomputed on every poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Complete,
    Processing,
    Failed(Vec<JobResponseError>),
}

impl JobStatus {
    pub fn state(&self) -> JobState {
        match self {
            JobStatus::Complete => JobState::Complete,
            JobStatus::Processing => JobState::Processing,
            JobStatus::Failed(_) => JobState::Failed,
        }
    }

    pub fn errors(&self) -> &[JobResponseError] {
        match self {
            JobStatus::Failed(errs) => errs,
            _ => &[],
        }
    }

    /// Classify a delete job by the age of its target's deletion timestamp.
    pub fn for_deletion_age(job: &Job, age: chrono::Duration) -> Self {
        let timeout = chrono::Duration::seconds(JOB_TIMEOUT.as_secs() as i64);
        if age < timeout {
            JobStatus::Processing
        } else {
            JobStatus::Failed(vec![JobResponseError::deletion_timed_out(job)])
        }
    }
}
