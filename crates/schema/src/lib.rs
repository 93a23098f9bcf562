//! Stratus schema: custom resources for the workloads API group plus condition and
//! ownership helpers shared by controllers and repositories.

#![forbid(unsafe_code)]

pub mod conditions;
pub mod ownership;
pub mod workloads;

pub use workloads::*;

use k8s_openapi::api::core::v1::LocalObjectReference;

/// API group of every Stratus custom resource.
pub const GROUP: &str = "workloads.stratus.dev";
pub const VERSION: &str = "v1alpha1";

/// Name of a local object reference, empty when unset.
pub fn ref_name(r: &LocalObjectReference) -> &str {
    r.name.as_deref().unwrap_or("")
}

pub fn local_ref(name: impl Into<String>) -> LocalObjectReference {
    LocalObjectReference { name: Some(name.into()) }
}
