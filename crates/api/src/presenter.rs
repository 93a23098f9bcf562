//! Wire representation of a job.

use serde::{Deserialize, Serialize};
use stratus_core::{Job, JobResponseError, JobState, JobStatus, JobType};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLinks {
    #[serde(rename = "self")]
    pub self_: Link,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<Link>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResponse {
    pub guid: String,
    pub operation: String,
    pub state: JobState,
    pub errors: Vec<JobResponseError>,
    pub warnings: Vec<String>,
    pub links: JobLinks,
}

fn link(server_url: &Url, parts: &[&str]) -> Link {
    let base = server_url.as_str().trim_end_matches('/');
    Link { href: format!("{base}/{}", parts.join("/")) }
}

impl JobResponse {
    pub fn for_job(job: &Job, status: &JobStatus, server_url: &Url) -> Self {
        let space = match job.job_type {
            JobType::SpaceApplyManifest => Some(link(server_url, &["v3", "spaces", &job.resource_guid])),
            _ => None,
        };
        Self {
            guid: job.guid.clone(),
            operation: job.job_type.operation(),
            state: status.state(),
            errors: status.errors().to_vec(),
            warnings: Vec::new(),
            links: JobLinks { self_: link(server_url, &["v3", "jobs", &job.guid]), space },
        }
    }
}
