//! Deletion query seam: how the job resolver observes a resource's deletion state.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::JobType;

/// Caller identity forwarded to repositories (authentication happens upstream).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub user: String,
    pub groups: Vec<String>,
}

impl Identity {
    pub fn user(name: impl Into<String>) -> Self {
        Self { user: name.into(), groups: Vec::new() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeletionError {
    #[error("{resource_type} {guid} not found")]
    NotFound { resource_type: String, guid: String },
    #[error("forbidden to get {resource_type} {guid}")]
    Forbidden { resource_type: String, guid: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Reports when deletion of a resource was requested.
///
/// `Ok(None)` means deletion has not been requested (yet). A resource that no longer
/// exists or cannot be seen yields `NotFound` / `Forbidden`.
#[async_trait::async_trait]
pub trait DeletionRepository: Send + Sync {
    async fn get_deleted_at(&self, identity: &Identity, guid: &str) -> Result<Option<DateTime<Utc>>, DeletionError>;
}

/// Registration table from job type to the repository that can answer for it.
/// Built once at startup and handed to the resolver.
pub type DeletionRepositories = HashMap<JobType, Arc<dyn DeletionRepository>>;

pub fn default_deletion_repositories(
    orgs: Arc<dyn DeletionRepository>,
    spaces: Arc<dyn DeletionRepository>,
) -> DeletionRepositories {
    let mut m: DeletionRepositories = HashMap::new();
    m.insert(JobType::OrgDelete, orgs);
    m.insert(JobType::SpaceDelete, spaces);
    m
}
