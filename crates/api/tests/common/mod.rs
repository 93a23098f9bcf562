#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use stratus_api::{JobResolver, PollSettings};
use stratus_core::prelude::*;

/// One scripted answer of the fake repository.
#[derive(Debug, Clone)]
pub enum Step {
    NotFound,
    Forbidden,
    Infra,
    NotMarked,
    MarkedSecsAgo(i64),
}

/// Plays back `steps`, repeating the last one once the script runs out.
pub struct ScriptedRepo {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    pub seen: Mutex<Vec<(Identity, String)>>,
}

impl ScriptedRepo {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self { steps: Mutex::new(steps.into()), calls: AtomicUsize::new(0), seen: Mutex::new(Vec::new()) })
    }

    pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

#[async_trait::async_trait]
impl DeletionRepository for ScriptedRepo {
    async fn get_deleted_at(&self, identity: &Identity, guid: &str) -> Result<Option<DateTime<Utc>>, DeletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push((identity.clone(), guid.to_string()));
        let step = {
            let mut steps = self.steps.lock().unwrap();
            if steps.len() > 1 { steps.pop_front().unwrap() } else { steps.front().cloned().unwrap_or(Step::NotMarked) }
        };
        let not_found = || DeletionError::NotFound { resource_type: "Org".into(), guid: guid.into() };
        match step {
            Step::NotFound => Err(not_found()),
            Step::Forbidden => Err(DeletionError::Forbidden { resource_type: "Org".into(), guid: guid.into() }),
            Step::Infra => Err(DeletionError::Other(anyhow::anyhow!("etcd is on fire"))),
            Step::NotMarked => Ok(None),
            Step::MarkedSecsAgo(s) => Ok(Some(Utc::now() - chrono::Duration::seconds(s))),
        }
    }
}

pub const INTERVAL: Duration = Duration::from_millis(250);

pub fn resolver(orgs: Arc<ScriptedRepo>, spaces: Arc<ScriptedRepo>) -> JobResolver {
    let repos: DeletionRepositories = stratus_core::deletion::default_deletion_repositories(orgs, spaces);
    JobResolver::new(Arc::new(repos), PollSettings::with_interval(INTERVAL))
}

pub fn resolver_with(repos: HashMap<JobType, Arc<dyn DeletionRepository>>) -> JobResolver {
    JobResolver::new(Arc::new(repos), PollSettings::with_interval(INTERVAL))
}
