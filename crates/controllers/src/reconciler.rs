use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use kube::ResourceExt;
use metrics::{counter, histogram};
use stratus_ops::{AppKey, BuildCleaner, Creds, ImageConfigGetter};
use stratus_schema::ownership::{controller_ref, set_controller_ref, AlreadyOwned};
use stratus_schema::{ref_name, CFBuild};
use tracing::{debug, info, warn};

use crate::build::{self, Outcome, Step};
use crate::store::{BuildStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("build {0} has no namespace")]
    MissingNamespace(String),
    #[error("app {namespace}/{name} not found")]
    AppNotFound { namespace: String, name: String },
    #[error("app {0} has not been persisted yet")]
    AppWithoutUid(String),
    #[error("package {namespace}/{name} not found")]
    PackageNotFound { namespace: String, name: String },
    #[error(transparent)]
    AlreadyOwned(#[from] AlreadyOwned),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconcileError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Store(StoreError::Conflict(_)))
    }
}

/// What the caller should do once a pass returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Done,
    Requeue,
}

/// Cleanup runs detached; failed attempts are retried with linear backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupRetry {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for CleanupRetry {
    fn default() -> Self {
        Self { attempts: 3, backoff: Duration::from_secs(2) }
    }
}

pub struct BuildReconciler<S> {
    store: Arc<S>,
    images: Arc<dyn ImageConfigGetter>,
    cleaner: Arc<dyn BuildCleaner>,
    cleanup: CleanupRetry,
}

impl<S: BuildStore> BuildReconciler<S> {
    pub fn new(store: Arc<S>, images: Arc<dyn ImageConfigGetter>, cleaner: Arc<dyn BuildCleaner>) -> Self {
        Self { store, images, cleaner, cleanup: CleanupRetry::default() }
    }

    pub fn with_cleanup_retry(mut self, cleanup: CleanupRetry) -> Self {
        self.cleanup = cleanup;
        self
    }

    /// One reconcile pass. Safe to re-run on the same object any number of times.
    pub async fn reconcile(&self, observed: &CFBuild) -> Result<Next, ReconcileError> {
        counter!("build_reconcile_total", 1u64);
        let step = build::next_step(observed);
        if step == Step::Idle {
            debug!(build = %observed.name_any(), "nothing to reconcile");
            return Ok(Next::Done);
        }
        let name = observed.name_any();
        let namespace = observed.namespace().ok_or_else(|| ReconcileError::MissingNamespace(name.clone()))?;

        let mut current = self.ensure_owner(observed, &namespace).await?;
        let generation = current.metadata.generation;
        let mut status = current.status.clone().unwrap_or_default();

        let next = match step {
            Step::Idle => return Ok(Next::Done),
            Step::ObserveGeneration => {
                status.observed_generation = generation.unwrap_or_default();
                current.status = Some(status);
                self.store.replace_status(&current).await?;
                Next::Done
            }
            Step::StartStaging => {
                build::start_staging(&mut status, generation, Utc::now());
                current.status = Some(status);
                self.store.replace_status(&current).await?;
                info!(build = %name, namespace = %namespace, "build staging");
                Next::Requeue
            }
            Step::Inspect => {
                let package_name = ref_name(&current.spec.package_ref).to_string();
                let package = self
                    .store
                    .get_package(&namespace, &package_name)
                    .await?
                    .ok_or_else(|| ReconcileError::PackageNotFound { namespace: namespace.clone(), name: package_name })?;
                let registry = &package.spec.source.registry;
                let creds = Creds { namespace: namespace.clone(), secret_names: registry.secret_names() };

                let t0 = Instant::now();
                let inspected = self.images.config(&creds, &registry.image).await;
                histogram!("build_inspect_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);

                let outcome = build::evaluate(registry, inspected);
                build::finish(&mut status, &outcome, generation, Utc::now());
                current.status = Some(status);
                self.store.replace_status(&current).await?;

                match &outcome {
                    Outcome::Succeeded(droplet) => {
                        counter!("build_succeeded_total", 1u64);
                        info!(build = %name, namespace = %namespace, image = %droplet.registry.image, "build succeeded");
                        self.spawn_cleanup(AppKey::new(namespace.clone(), ref_name(&current.spec.app_ref)));
                    }
                    Outcome::Failed(message) => {
                        counter!("build_failed_total", 1u64);
                        warn!(build = %name, namespace = %namespace, reason = %message, "build failed");
                    }
                }
                Next::Done
            }
        };
        Ok(next)
    }

    /// Make the referenced app the build's controller so the build is collected with it.
    async fn ensure_owner(&self, observed: &CFBuild, namespace: &str) -> Result<CFBuild, ReconcileError> {
        let app_name = ref_name(&observed.spec.app_ref);
        let app = self
            .store
            .get_app(namespace, app_name)
            .await?
            .ok_or_else(|| ReconcileError::AppNotFound { namespace: namespace.to_string(), name: app_name.to_string() })?;
        let owner = controller_ref(&app).ok_or_else(|| ReconcileError::AppWithoutUid(format!("{namespace}/{app_name}")))?;

        let mut build = observed.clone();
        if !set_controller_ref(&mut build.metadata, owner)? {
            return Ok(build);
        }
        debug!(build = %build.name_any(), app = %app_name, "setting app as build owner");
        let mut stored = self.store.replace(&build).await?;
        // metadata writes do not carry status; keep what was observed
        if stored.status.is_none() {
            stored.status = build.status;
        }
        Ok(stored)
    }

    fn spawn_cleanup(&self, app: AppKey) {
        let cleaner = self.cleaner.clone();
        let retry = self.cleanup;
        tokio::spawn(async move {
            for attempt in 1..=retry.attempts.max(1) {
                match cleaner.clean(&app).await {
                    Ok(()) => {
                        debug!(app = %app, attempt, "build cleanup done");
                        return;
                    }
                    Err(e) => {
                        counter!("build_cleanup_err_total", 1u64);
                        warn!(app = %app, attempt, error = %format!("{e:#}"), "build cleanup failed");
                    }
                }
                if attempt < retry.attempts {
                    tokio::time::sleep(retry.backoff * attempt).await;
                }
            }
        });
    }
}
