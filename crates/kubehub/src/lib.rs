//! Stratus kubehub: client construction, kube error classification and the
//! Kubernetes-backed deletion repositories used by the job resolver.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, ListParams},
    Client, Config, Resource,
};
use metrics::counter;
use serde::de::DeserializeOwned;
use stratus_core::{DeletionError, DeletionRepository, Identity};
use stratus_schema::{CFOrg, CFSpace};
use tracing::debug;

/// Impersonated clients kept before the cache is reset.
const MAX_CACHED_CLIENTS: usize = 256;

/// Default client from kubeconfig or in-cluster environment.
pub async fn get_kube_client() -> Result<Client> {
    Client::try_default().await.context("building kube client")
}

/// Where per-request clients come from.
#[derive(Clone)]
pub enum ClientSource {
    /// One client for every caller (tests, single-tenant setups).
    Shared(Client),
    /// Impersonate the caller using the base config's credentials.
    Impersonating(Impersonation),
}

/// Base config plus one client per impersonated identity, reused across polls.
#[derive(Clone)]
pub struct Impersonation {
    base: Config,
    clients: Arc<Mutex<HashMap<Identity, Client>>>,
}

impl Impersonation {
    pub fn new(base: Config) -> Self {
        Self { base, clients: Arc::default() }
    }

    fn client(&self, identity: &Identity) -> Result<Client> {
        let mut clients = self.clients.lock().map_err(|_| anyhow::anyhow!("client cache poisoned"))?;
        if let Some(c) = clients.get(identity) {
            return Ok(c.clone());
        }
        let mut cfg = self.base.clone();
        if !identity.user.is_empty() {
            cfg.auth_info.impersonate = Some(identity.user.clone());
            if !identity.groups.is_empty() {
                cfg.auth_info.impersonate_groups = Some(identity.groups.clone());
            }
        }
        let client = Client::try_from(cfg).with_context(|| format!("building client impersonating {:?}", identity.user))?;
        if clients.len() >= MAX_CACHED_CLIENTS {
            clients.clear();
        }
        clients.insert(identity.clone(), client.clone());
        debug!(user = %identity.user, cached = clients.len(), "built impersonating client");
        Ok(client)
    }
}

impl ClientSource {
    pub async fn impersonating() -> Result<Self> {
        let cfg = Config::infer().await.context("inferring kube config")?;
        Ok(Self::Impersonating(Impersonation::new(cfg)))
    }

    /// Client acting as `identity`; an empty user gets the base credentials.
    pub fn for_identity(&self, identity: &Identity) -> Result<Client> {
        match self {
            ClientSource::Shared(c) => Ok(c.clone()),
            ClientSource::Impersonating(imp) => imp.client(identity),
        }
    }
}

/// HTTP status code of an API error, if the error came from the API server.
pub fn api_code(err: &kube::Error) -> Option<u16> {
    match err {
        kube::Error::Api(resp) => Some(resp.code),
        _ => None,
    }
}

pub fn is_not_found(err: &kube::Error) -> bool { api_code(err) == Some(404) }
pub fn is_forbidden(err: &kube::Error) -> bool { api_code(err) == Some(403) }
pub fn is_conflict(err: &kube::Error) -> bool { api_code(err) == Some(409) }

/// Map a kube error to the deletion-query taxonomy.
pub fn classify(err: kube::Error, resource_type: &str, guid: &str) -> DeletionError {
    if is_not_found(&err) {
        DeletionError::NotFound { resource_type: resource_type.to_string(), guid: guid.to_string() }
    } else if is_forbidden(&err) {
        DeletionError::Forbidden { resource_type: resource_type.to_string(), guid: guid.to_string() }
    } else {
        DeletionError::Other(anyhow::Error::new(err).context(format!("getting {resource_type} {guid}")))
    }
}

pub fn deleted_at<K: Resource>(obj: &K) -> Option<DateTime<Utc>> {
    obj.meta().deletion_timestamp.as_ref().map(|t| t.0)
}

#[derive(Debug, Clone)]
pub enum Lookup {
    /// Objects live in a single known namespace (orgs in the root namespace).
    Namespace(String),
    /// Object namespace is unknown; search cluster-wide by name (spaces).
    AllNamespaces,
}

/// Reads deletion timestamps of a custom resource addressed by its GUID (object name).
pub struct KubeDeletionRepository<K> {
    clients: ClientSource,
    lookup: Lookup,
    resource_type: &'static str,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeDeletionRepository<K> {
    pub fn new(clients: ClientSource, lookup: Lookup, resource_type: &'static str) -> Self {
        Self { clients, lookup, resource_type, _kind: PhantomData }
    }
}

impl KubeDeletionRepository<CFOrg> {
    pub fn orgs(clients: ClientSource, root_namespace: impl Into<String>) -> Self {
        Self::new(clients, Lookup::Namespace(root_namespace.into()), "Org")
    }
}

impl KubeDeletionRepository<CFSpace> {
    pub fn spaces(clients: ClientSource) -> Self {
        Self::new(clients, Lookup::AllNamespaces, "Space")
    }
}

#[async_trait::async_trait]
impl<K> DeletionRepository for KubeDeletionRepository<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    async fn get_deleted_at(&self, identity: &Identity, guid: &str) -> Result<Option<DateTime<Utc>>, DeletionError> {
        counter!("deletion_query_total", 1u64, "resource" => self.resource_type);
        let client = self.clients.for_identity(identity)?;
        let obj = match &self.lookup {
            Lookup::Namespace(ns) => {
                let api: Api<K> = Api::namespaced(client, ns);
                api.get(guid).await.map_err(|e| classify(e, self.resource_type, guid))?
            }
            Lookup::AllNamespaces => {
                let api: Api<K> = Api::all(client);
                let lp = ListParams::default().fields(&format!("metadata.name={guid}"));
                let list = api.list(&lp).await.map_err(|e| classify(e, self.resource_type, guid))?;
                list.items.into_iter().next().ok_or_else(|| DeletionError::NotFound {
                    resource_type: self.resource_type.to_string(),
                    guid: guid.to_string(),
                })?
            }
        };
        let ts = deleted_at(&obj);
        debug!(resource_type = self.resource_type, guid, deleted_at = ?ts, "fetched deletion timestamp");
        Ok(ts)
    }
}
