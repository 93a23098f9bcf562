//! Garbage collection of superseded builds. Droplets live in build status, so deleting
//! a build deletes its droplet too.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use kube::{
    api::{Api, DeleteParams, ListParams},
    Client, ResourceExt,
};
use metrics::counter;
use stratus_schema::{conditions, ref_name, CFApp, CFBuild};
use tracing::{debug, info};

use crate::{AppKey, BuildCleaner};

/// Completion time of a terminal build; `None` while it is still staging.
fn finished_at(build: &CFBuild) -> Option<DateTime<Utc>> {
    let status = build.status.as_ref()?;
    conditions::find(&status.conditions, conditions::SUCCEEDED).map(|c| c.last_transition_time.0)
}

/// Names of builds to delete for one app.
///
/// Keeps in-flight builds, the build backing the app's current droplet, the newest
/// succeeded build (its droplet may not be adopted yet) and the `retain` most
/// recently finished builds (at least one).
pub fn select_superseded(builds: &[CFBuild], current_droplet: Option<&str>, retain: usize) -> Vec<String> {
    let newest_succeeded = builds
        .iter()
        .filter(|b| b.status.as_ref().is_some_and(|s| conditions::is_true(&s.conditions, conditions::SUCCEEDED)))
        .filter_map(|b| finished_at(b).map(|t| (t, b.name_any())))
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(&a.1)))
        .map(|(_, name)| name);
    let mut finished: Vec<(DateTime<Utc>, &CFBuild)> = builds
        .iter()
        .filter(|b| Some(b.name_any().as_str()) != current_droplet)
        .filter_map(|b| finished_at(b).map(|t| (t, b)))
        .collect();
    finished.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.name_any().cmp(&b.1.name_any())));
    finished
        .into_iter()
        .skip(retain.max(1))
        .map(|(_, b)| b.name_any())
        .filter(|name| Some(name) != newest_succeeded.as_ref())
        .collect()
}

pub struct KubeBuildCleaner {
    client: Client,
    retained_builds: usize,
}

impl KubeBuildCleaner {
    pub fn new(client: Client, retained_builds: usize) -> Self {
        Self { client, retained_builds }
    }
}

#[async_trait::async_trait]
impl BuildCleaner for KubeBuildCleaner {
    async fn clean(&self, app: &AppKey) -> Result<()> {
        let apps: Api<CFApp> = Api::namespaced(self.client.clone(), &app.namespace);
        let builds: Api<CFBuild> = Api::namespaced(self.client.clone(), &app.namespace);

        let cf_app = apps.get(&app.name).await.with_context(|| format!("getting app {app}"))?;
        let current = cf_app.spec.current_droplet_ref.as_ref().map(ref_name);
        let owned: Vec<CFBuild> = builds
            .list(&ListParams::default())
            .await
            .with_context(|| format!("listing builds for {app}"))?
            .items
            .into_iter()
            .filter(|b| ref_name(&b.spec.app_ref) == app.name)
            .collect();

        let doomed = select_superseded(&owned, current, self.retained_builds);
        debug!(app = %app, total = owned.len(), deleting = doomed.len(), "build cleanup plan");
        for name in &doomed {
            match builds.delete(name, &DeleteParams::background()).await {
                Ok(_) => counter!("build_cleanup_deleted_total", 1u64),
                Err(e) if stratus_kubehub::is_not_found(&e) => {}
                Err(e) => return Err(e).with_context(|| format!("deleting build {}/{}", app.namespace, name)),
            }
        }
        if !doomed.is_empty() {
            info!(app = %app, deleted = doomed.len(), "cleaned up superseded builds");
        }
        Ok(())
    }
}
