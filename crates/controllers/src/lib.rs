//! Stratus controllers: reconciles docker `CFBuild`s into droplets.
//!
//! [`build`] holds the state machine as pure functions, [`BuildReconciler`] runs one pass
//! against a [`BuildStore`], and [`runner::run`] drives passes from a kube watch.

#![forbid(unsafe_code)]

pub mod build;
pub mod reconciler;
pub mod runner;
pub mod store;

pub use build::{is_privileged_user, Outcome, Phase, Step};
pub use reconciler::{BuildReconciler, CleanupRetry, Next, ReconcileError};
pub use runner::{run, RunSettings};
pub use store::{BuildStore, KubeBuildStore, StoreError};
