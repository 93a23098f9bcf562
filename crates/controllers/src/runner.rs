use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use stratus_schema::CFBuild;
use tracing::{debug, info, warn};

use crate::reconciler::{BuildReconciler, Next, ReconcileError};
use crate::store::BuildStore;

const REQUEUE_AFTER_STAGING: Duration = Duration::from_secs(1);
const RETRY_CONFLICT: Duration = Duration::from_secs(1);
const RETRY_ERROR: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default)]
pub struct RunSettings {
    /// Watch one namespace; all namespaces when `None`.
    pub namespace: Option<String>,
    /// Max builds reconciled in parallel; 0 means unbounded.
    pub concurrency: u16,
}

async fn reconcile<S: BuildStore>(build: Arc<CFBuild>, ctx: Arc<BuildReconciler<S>>) -> Result<Action, ReconcileError> {
    Ok(match ctx.reconcile(&build).await? {
        Next::Requeue => Action::requeue(REQUEUE_AFTER_STAGING),
        Next::Done => Action::await_change(),
    })
}

fn error_policy<S: BuildStore>(build: Arc<CFBuild>, err: &ReconcileError, _ctx: Arc<BuildReconciler<S>>) -> Action {
    if err.is_conflict() {
        debug!(build = %build.name_any(), "stale build, retrying");
        return Action::requeue(RETRY_CONFLICT);
    }
    warn!(build = %build.name_any(), namespace = ?build.namespace(), error = %err, "build reconcile failed");
    Action::requeue(RETRY_ERROR)
}

/// Drive `reconciler` from a watch on builds until SIGINT/SIGTERM.
pub async fn run<S: BuildStore>(client: Client, reconciler: BuildReconciler<S>, settings: RunSettings) {
    let api: Api<CFBuild> = match &settings.namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    info!(namespace = ?settings.namespace, concurrency = settings.concurrency, "build controller starting");
    Controller::new(api, watcher::Config::default())
        .with_config(controller::Config::default().concurrency(settings.concurrency))
        .shutdown_on_signal()
        .run(reconcile, error_policy, Arc::new(reconciler))
        .for_each(|res| async move {
            match res {
                Ok((obj, action)) => debug!(build = %obj, ?action, "reconciled"),
                Err(controller::Error::ReconcilerFailed(_, obj)) => debug!(build = %obj, "reconcile error handled by policy"),
                Err(e) => warn!(error = %e, "controller error"),
            }
        })
        .await;
    info!("build controller stopped");
}
