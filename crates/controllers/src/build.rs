//! Docker build state machine: New -> Staging -> Succeeded | Failed.
//!
//! Everything here is pure. The reconciler feeds in the observed build (and,
//! once staging, the image inspection result) and persists what comes out.

use chrono::{DateTime, Utc};
use stratus_ops::{ImageConfig, ImageError};
use stratus_schema::conditions::{
    self, ConditionUpdate, BUILD_FAILED_REASON, BUILD_RUNNING_REASON, BUILD_SUCCEEDED_REASON, STAGING, SUCCEEDED,
};
use stratus_schema::{BuildDropletStatus, CFBuild, CFBuildStatus, LifecycleType, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    New,
    Staging,
    Succeeded,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Succeeded | Phase::Failed)
    }
}

pub fn phase(status: Option<&CFBuildStatus>) -> Phase {
    let Some(status) = status else { return Phase::New };
    if conditions::is_true(&status.conditions, SUCCEEDED) {
        Phase::Succeeded
    } else if conditions::is_false(&status.conditions, SUCCEEDED) {
        Phase::Failed
    } else if status.conditions.is_empty() {
        Phase::New
    } else {
        Phase::Staging
    }
}

/// What a reconcile pass has to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Not a docker build, or terminal with the current generation observed.
    Idle,
    /// Terminal, but the spec changed since; only the generation is recorded.
    ObserveGeneration,
    StartStaging,
    Inspect,
}

pub fn next_step(build: &CFBuild) -> Step {
    if build.spec.lifecycle.type_ != LifecycleType::Docker {
        return Step::Idle;
    }
    let status = build.status.as_ref();
    match phase(status) {
        Phase::New => Step::StartStaging,
        Phase::Staging => Step::Inspect,
        Phase::Succeeded | Phase::Failed => {
            let observed = status.map(|s| s.observed_generation).unwrap_or_default();
            if observed == build.metadata.generation.unwrap_or_default() {
                Step::Idle
            } else {
                Step::ObserveGeneration
            }
        }
    }
}

/// Images must not run as root: rejects an empty user, `root`, `0`, and `root:`/`0:` with any group.
pub fn is_privileged_user(user: &str) -> bool {
    matches!(user, "" | "root" | "0") || user.starts_with("root:") || user.starts_with("0:")
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Succeeded(BuildDropletStatus),
    Failed(String),
}

/// Judge an inspected image. The droplet mirrors the package registry exactly.
pub fn evaluate(registry: &Registry, inspected: Result<ImageConfig, ImageError>) -> Outcome {
    let config = match inspected {
        Ok(config) => config,
        Err(e) => return Outcome::Failed(format!("failed to fetch image config for {}: {e}", registry.image)),
    };
    if is_privileged_user(&config.user) {
        let who = if config.user.is_empty() { "an unspecified user (root)".to_string() } else { format!("user {:?}", config.user) };
        return Outcome::Failed(format!("image {} runs as {who}; running as root is not supported", registry.image));
    }
    Outcome::Succeeded(BuildDropletStatus { registry: registry.clone(), ports: config.exposed_ports })
}

pub fn start_staging(status: &mut CFBuildStatus, generation: Option<i64>, now: DateTime<Utc>) {
    conditions::set(&mut status.conditions, &ConditionUpdate::new(STAGING, true, BUILD_RUNNING_REASON, "staging docker image"), generation, now);
    status.observed_generation = generation.unwrap_or_default();
}

/// Move a staging build to its terminal state. Staging is cleared in the same write.
pub fn finish(status: &mut CFBuildStatus, outcome: &Outcome, generation: Option<i64>, now: DateTime<Utc>) {
    let (succeeded, reason, message) = match outcome {
        Outcome::Succeeded(_) => (true, BUILD_SUCCEEDED_REASON, String::new()),
        Outcome::Failed(msg) => (false, BUILD_FAILED_REASON, msg.clone()),
    };
    conditions::set(&mut status.conditions, &ConditionUpdate::new(STAGING, false, reason, message.clone()), generation, now);
    conditions::set(&mut status.conditions, &ConditionUpdate::new(SUCCEEDED, succeeded, reason, message), generation, now);
    if let Outcome::Succeeded(droplet) = outcome {
        if status.droplet.is_none() {
            status.droplet = Some(droplet.clone());
        }
    }
    status.observed_generation = generation.unwrap_or_default();
}
