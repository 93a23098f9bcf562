//! Stratus Ops: imperative capabilities the build controller calls out to.
//!
//! - [`ImageConfigGetter`]: read an image's config (user, ports, labels) from its registry.
//! - [`BuildCleaner`]: remove builds (and their droplets) superseded for an app.
//!
//! Both are traits so controllers can be driven by fakes in tests; the default
//! implementations talk to a container registry and the Kubernetes API.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod cleaner;
pub mod image;

pub use cleaner::{select_superseded, KubeBuildCleaner};
pub use image::registry::RegistryConfigGetter;
pub use image::ImageError;

/// Registry credentials: pull secrets looked up in a namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creds {
    pub namespace: String,
    pub secret_names: Vec<String>,
}

/// The subset of an image's config the platform cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    pub labels: BTreeMap<String, String>,
    pub exposed_ports: Vec<i32>,
    /// `User` from the image config, verbatim (may be empty).
    pub user: String,
}

#[async_trait::async_trait]
pub trait ImageConfigGetter: Send + Sync {
    async fn config(&self, creds: &Creds, image_ref: &str) -> Result<ImageConfig, ImageError>;
}

/// Namespaced name of an app.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppKey {
    pub namespace: String,
    pub name: String,
}

impl AppKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for AppKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[async_trait::async_trait]
pub trait BuildCleaner: Send + Sync {
    async fn clean(&self, app: &AppKey) -> anyhow::Result<()>;
}
