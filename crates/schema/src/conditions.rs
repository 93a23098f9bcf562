//! Status condition vocabulary and helpers (mirrors apimachinery's condition semantics).

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

pub const STAGING: &str = "Staging";
pub const SUCCEEDED: &str = "Succeeded";

pub const BUILD_RUNNING_REASON: &str = "BuildRunning";
pub const BUILD_SUCCEEDED_REASON: &str = "BuildSucceeded";
pub const BUILD_FAILED_REASON: &str = "BuildFailed";

pub const STATUS_TRUE: &str = "True";
pub const STATUS_FALSE: &str = "False";

pub fn find<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_true(conditions: &[Condition], type_: &str) -> bool {
    find(conditions, type_).is_some_and(|c| c.status == STATUS_TRUE)
}

pub fn is_false(conditions: &[Condition], type_: &str) -> bool {
    find(conditions, type_).is_some_and(|c| c.status == STATUS_FALSE)
}

/// Desired value of a single condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionUpdate {
    pub type_: &'static str,
    pub status: bool,
    pub reason: &'static str,
    pub message: String,
}

impl ConditionUpdate {
    pub fn new(type_: &'static str, status: bool, reason: &'static str, message: impl Into<String>) -> Self {
        Self { type_, status, reason, message: message.into() }
    }
}

/// Set a condition in place. `lastTransitionTime` only moves when the status flips.
/// Returns whether anything changed.
pub fn set(conditions: &mut Vec<Condition>, update: &ConditionUpdate, generation: Option<i64>, now: DateTime<Utc>) -> bool {
    let status = if update.status { STATUS_TRUE } else { STATUS_FALSE };
    match conditions.iter_mut().find(|c| c.type_ == update.type_) {
        None => {
            conditions.push(Condition {
                type_: update.type_.to_string(),
                status: status.to_string(),
                reason: update.reason.to_string(),
                message: update.message.clone(),
                observed_generation: generation,
                last_transition_time: Time(now),
            });
            true
        }
        Some(existing) => {
            let mut changed = false;
            if existing.status != status {
                existing.status = status.to_string();
                existing.last_transition_time = Time(now);
                changed = true;
            }
            if existing.reason != update.reason {
                existing.reason = update.reason.to_string();
                changed = true;
            }
            if existing.message != update.message {
                existing.message = update.message.clone();
                changed = true;
            }
            if existing.observed_generation != generation {
                existing.observed_generation = generation;
                changed = true;
            }
            changed
        }
    }
}
