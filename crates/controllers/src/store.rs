//! Reads and conditional writes the build reconciler performs against the store.

use kube::api::{Api, PostParams};
use kube::{Client, ResourceExt};
use stratus_schema::{CFApp, CFBuild, CFPackage};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The object changed since it was read (stale resourceVersion).
    #[error("conflict writing {0}")]
    Conflict(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait::async_trait]
pub trait BuildStore: Send + Sync + 'static {
    async fn get_app(&self, namespace: &str, name: &str) -> Result<Option<CFApp>, StoreError>;
    async fn get_package(&self, namespace: &str, name: &str) -> Result<Option<CFPackage>, StoreError>;
    /// Persist metadata and spec. Conditional on the build's resourceVersion.
    async fn replace(&self, build: &CFBuild) -> Result<CFBuild, StoreError>;
    /// Persist status. Conditional on the build's resourceVersion.
    async fn replace_status(&self, build: &CFBuild) -> Result<CFBuild, StoreError>;
}

#[derive(Clone)]
pub struct KubeBuildStore {
    client: Client,
}

impl KubeBuildStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn builds(&self, build: &CFBuild) -> Result<Api<CFBuild>, StoreError> {
        let ns = build.namespace().ok_or_else(|| anyhow::anyhow!("build {} has no namespace", build.name_any()))?;
        Ok(Api::namespaced(self.client.clone(), &ns))
    }
}

fn write_error(err: kube::Error, build: &CFBuild, what: &str) -> StoreError {
    let key = format!("{}/{}", build.namespace().unwrap_or_default(), build.name_any());
    if stratus_kubehub::is_conflict(&err) {
        StoreError::Conflict(key)
    } else {
        StoreError::Other(anyhow::Error::new(err).context(format!("writing {what} of build {key}")))
    }
}

#[async_trait::async_trait]
impl BuildStore for KubeBuildStore {
    async fn get_app(&self, namespace: &str, name: &str) -> Result<Option<CFApp>, StoreError> {
        let api: Api<CFApp> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| StoreError::Other(anyhow::Error::new(e).context(format!("getting app {namespace}/{name}"))))
    }

    async fn get_package(&self, namespace: &str, name: &str) -> Result<Option<CFPackage>, StoreError> {
        let api: Api<CFPackage> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| StoreError::Other(anyhow::Error::new(e).context(format!("getting package {namespace}/{name}"))))
    }

    async fn replace(&self, build: &CFBuild) -> Result<CFBuild, StoreError> {
        self.builds(build)?
            .replace(&build.name_any(), &PostParams::default(), build)
            .await
            .map_err(|e| write_error(e, build, "metadata"))
    }

    async fn replace_status(&self, build: &CFBuild) -> Result<CFBuild, StoreError> {
        let body = serde_json::to_vec(build).map_err(|e| StoreError::Other(e.into()))?;
        self.builds(build)?
            .replace_status(&build.name_any(), &PostParams::default(), body)
            .await
            .map_err(|e| write_error(e, build, "status"))
    }
}
