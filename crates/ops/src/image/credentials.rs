//! Registry credentials from `kubernetes.io/dockerconfigjson` pull secrets.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use k8s_openapi::api::core::v1::Secret;
use kube::{api::Api, Client};
use serde::Deserialize;
use tracing::debug;

use crate::Creds;

pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DockerConfig {
    #[serde(default)]
    pub auths: HashMap<String, DockerAuthEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DockerAuthEntry {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// base64 of `username:password`
    #[serde(default)]
    pub auth: Option<String>,
}

impl DockerAuthEntry {
    fn basic(&self) -> Result<BasicAuth> {
        if let (Some(u), Some(p)) = (&self.username, &self.password) {
            return Ok(BasicAuth { username: u.clone(), password: p.clone() });
        }
        let encoded = self.auth.as_deref().ok_or_else(|| anyhow!("auth entry has neither username/password nor auth"))?;
        let raw = base64::engine::general_purpose::STANDARD.decode(encoded).context("decoding auth field")?;
        let raw = String::from_utf8(raw).context("auth field is not utf-8")?;
        let (u, p) = raw.split_once(':').ok_or_else(|| anyhow!("auth field is not user:password"))?;
        Ok(BasicAuth { username: u.to_string(), password: p.to_string() })
    }
}

/// Strip scheme and path from a docker config key: `https://index.docker.io/v1/` -> `index.docker.io`.
fn normalize_host(key: &str) -> &str {
    let k = key.strip_prefix("https://").or_else(|| key.strip_prefix("http://")).unwrap_or(key);
    k.split('/').next().unwrap_or(k)
}

fn is_docker_hub_alias(host: &str) -> bool {
    matches!(host, "docker.io" | "index.docker.io" | "registry-1.docker.io")
}

impl DockerConfig {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("parsing docker config json")
    }

    /// Credentials for `registry` (as written in the image reference), if any.
    pub fn lookup(&self, registry: &str) -> Result<Option<BasicAuth>> {
        let hub = is_docker_hub_alias(registry);
        for (key, entry) in &self.auths {
            let host = normalize_host(key);
            if host == registry || (hub && is_docker_hub_alias(host)) {
                return entry.basic().map(Some);
            }
        }
        Ok(None)
    }
}

/// Loads docker configs from named secrets in a namespace.
#[async_trait::async_trait]
pub trait SecretSource: Send + Sync {
    async fn docker_configs(&self, creds: &Creds) -> Result<Vec<DockerConfig>>;
}

/// First matching credential across the configured secrets, in secret order.
pub async fn resolve_auth<S: SecretSource + ?Sized>(source: &S, creds: &Creds, registry: &str) -> Result<Option<BasicAuth>> {
    if creds.secret_names.is_empty() {
        return Ok(None);
    }
    for cfg in source.docker_configs(creds).await? {
        if let Some(auth) = cfg.lookup(registry)? {
            return Ok(Some(auth));
        }
    }
    debug!(registry, ns = %creds.namespace, "no matching pull secret; pulling anonymously");
    Ok(None)
}

pub struct KubeSecretSource {
    client: Client,
}

impl KubeSecretSource {
    pub fn new(client: Client) -> Self { Self { client } }
}

#[async_trait::async_trait]
impl SecretSource for KubeSecretSource {
    async fn docker_configs(&self, creds: &Creds) -> Result<Vec<DockerConfig>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &creds.namespace);
        let mut out = Vec::with_capacity(creds.secret_names.len());
        for name in &creds.secret_names {
            let secret = api
                .get(name)
                .await
                .with_context(|| format!("getting secret {}/{}", creds.namespace, name))?;
            let data = secret
                .data
                .as_ref()
                .and_then(|d| d.get(DOCKER_CONFIG_JSON_KEY))
                .ok_or_else(|| anyhow!("secret {}/{} has no {} key", creds.namespace, name, DOCKER_CONFIG_JSON_KEY))?;
            out.push(DockerConfig::parse(&data.0).with_context(|| format!("secret {}/{}", creds.namespace, name))?);
        }
        Ok(out)
    }
}
