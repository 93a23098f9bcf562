//! Workload custom resources: `CFApp`, `CFPackage`, `CFBuild`, `CFOrg`, `CFSpace`.
//!
//! Schemas are not derived; CRD manifests carry an open object schema instead
//! (see [`crd_manifests_yaml`]).

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::LocalObjectReference;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceValidation, JSONSchemaProps,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::{CustomResource, CustomResourceExt};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleType {
    #[default]
    Buildpack,
    Docker,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleData {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buildpacks: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stack: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lifecycle {
    #[serde(rename = "type")]
    pub type_: LifecycleType,
    #[serde(default)]
    pub data: LifecycleData,
}

impl Lifecycle {
    pub fn docker() -> Self {
        Self { type_: LifecycleType::Docker, data: LifecycleData::default() }
    }
}

/// Container image location plus the secrets needed to pull it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registry {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,
}

impl Registry {
    pub fn secret_names(&self) -> Vec<String> {
        self.image_pull_secrets.iter().filter_map(|r| r.name.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DesiredState {
    Started,
    #[default]
    Stopped,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "workloads.stratus.dev",
    version = "v1alpha1",
    kind = "CFApp",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct CFAppSpec {
    pub display_name: String,
    pub desired_state: DesiredState,
    pub lifecycle: Lifecycle,
    /// Build whose droplet the app currently runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_droplet_ref: Option<LocalObjectReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageSource {
    #[serde(default)]
    pub registry: Registry,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "workloads.stratus.dev",
    version = "v1alpha1",
    kind = "CFPackage",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct CFPackageSpec {
    #[serde(rename = "type")]
    pub type_: LifecycleType,
    pub app_ref: LocalObjectReference,
    #[serde(default)]
    pub source: PackageSource,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "workloads.stratus.dev",
    version = "v1alpha1",
    kind = "CFBuild",
    namespaced,
    status = "CFBuildStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct CFBuildSpec {
    pub package_ref: LocalObjectReference,
    pub app_ref: LocalObjectReference,
    pub lifecycle: Lifecycle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_memory_mb: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_disk_mb: Option<i64>,
}

/// Artifact produced by a successful build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildDropletStatus {
    pub registry: Registry,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CFBuildStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub droplet: Option<BuildDropletStatus>,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "workloads.stratus.dev",
    version = "v1alpha1",
    kind = "CFOrg",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct CFOrgSpec {
    pub display_name: String,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "workloads.stratus.dev",
    version = "v1alpha1",
    kind = "CFSpace",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct CFSpaceSpec {
    pub display_name: String,
}

fn with_open_schema(mut crd: CustomResourceDefinition) -> CustomResourceDefinition {
    for v in crd.spec.versions.iter_mut() {
        v.schema = Some(CustomResourceValidation {
            open_api_v3_schema: Some(JSONSchemaProps {
                type_: Some("object".into()),
                x_kubernetes_preserve_unknown_fields: Some(true),
                ..Default::default()
            }),
        });
    }
    crd
}

/// All workload CRDs with open schemas attached.
pub fn crds() -> Vec<CustomResourceDefinition> {
    [CFApp::crd(), CFPackage::crd(), CFBuild::crd(), CFOrg::crd(), CFSpace::crd()]
        .into_iter()
        .map(with_open_schema)
        .collect()
}

/// Multi-document YAML stream of [`crds`], ready for `kubectl apply -f -`.
pub fn crd_manifests_yaml() -> Result<String> {
    let mut out = String::new();
    for crd in crds() {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(&crd).context("serializing CRD to YAML")?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_spec_uses_camel_case_and_lowercase_lifecycle() {
        let spec = CFBuildSpec {
            package_ref: crate::local_ref("pkg"),
            app_ref: crate::local_ref("app"),
            lifecycle: Lifecycle::docker(),
            ..Default::default()
        };
        let v = serde_json::to_value(&spec).unwrap();
        assert_eq!(v["packageRef"]["name"], "pkg");
        assert_eq!(v["lifecycle"]["type"], "docker");
        assert!(v.get("stagingMemoryMb").is_none());
    }

    #[test]
    fn crds_carry_status_subresource_and_schema() {
        let all = crds();
        assert_eq!(all.len(), 5);
        let build = all.iter().find(|c| c.spec.names.kind == "CFBuild").expect("build crd");
        assert_eq!(build.spec.group, "workloads.stratus.dev");
        let v = &build.spec.versions[0];
        assert!(v.subresources.as_ref().and_then(|s| s.status.as_ref()).is_some());
        assert!(v.schema.is_some());
    }

    #[test]
    fn yaml_stream_has_one_document_per_crd() {
        let y = crd_manifests_yaml().unwrap();
        assert_eq!(y.matches("---\n").count(), 5);
        assert!(y.contains("cfbuilds.workloads.stratus.dev"));
    }
}
