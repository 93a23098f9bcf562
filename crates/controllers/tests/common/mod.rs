#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use stratus_controllers::{BuildReconciler, BuildStore, CleanupRetry, StoreError};
use stratus_ops::{AppKey, BuildCleaner, Creds, ImageConfig, ImageConfigGetter, ImageError};
use stratus_schema::{
    local_ref, CFApp, CFAppSpec, CFBuild, CFBuildSpec, CFPackage, CFPackageSpec, Lifecycle, LifecycleType, PackageSource,
    Registry,
};
use tokio::sync::mpsc;

pub const NS: &str = "space-guid";
pub const APP: &str = "app-guid";
pub const APP_UID: &str = "app-uid-1";
pub const PACKAGE: &str = "package-guid";
pub const BUILD: &str = "build-guid";

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta { name: Some(name.into()), namespace: Some(NS.into()), ..Default::default() }
}

pub fn app() -> CFApp {
    let mut app = CFApp::new(APP, CFAppSpec { display_name: "my-app".into(), lifecycle: Lifecycle::docker(), ..Default::default() });
    app.metadata = ObjectMeta { uid: Some(APP_UID.into()), ..meta(APP) };
    app
}

pub fn registry() -> Registry {
    Registry { image: "some/image".into(), image_pull_secrets: vec![local_ref("source-image-secret")] }
}

pub fn package() -> CFPackage {
    let spec = CFPackageSpec {
        type_: LifecycleType::Docker,
        app_ref: local_ref(APP),
        source: PackageSource { registry: registry() },
    };
    let mut pkg = CFPackage::new(PACKAGE, spec);
    pkg.metadata = meta(PACKAGE);
    pkg
}

pub fn build() -> CFBuild {
    let spec = CFBuildSpec {
        package_ref: local_ref(PACKAGE),
        app_ref: local_ref(APP),
        lifecycle: Lifecycle::docker(),
        ..Default::default()
    };
    let mut b = CFBuild::new(BUILD, spec);
    b.metadata = ObjectMeta { generation: Some(1), resource_version: Some("1".into()), ..meta(BUILD) };
    b
}

/// Single-namespace store with resourceVersion checks on every write.
#[derive(Default)]
pub struct MemoryStore {
    apps: Mutex<HashMap<String, CFApp>>,
    packages: Mutex<HashMap<String, CFPackage>>,
    builds: Mutex<HashMap<String, CFBuild>>,
    pub metadata_writes: AtomicUsize,
    pub status_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn seeded() -> Arc<Self> {
        let store = Self::default();
        store.apps.lock().unwrap().insert(APP.into(), app());
        store.packages.lock().unwrap().insert(PACKAGE.into(), package());
        store.builds.lock().unwrap().insert(BUILD.into(), build());
        Arc::new(store)
    }

    pub fn build(&self) -> CFBuild {
        self.builds.lock().unwrap()[BUILD].clone()
    }

    pub fn put_build(&self, b: CFBuild) {
        self.builds.lock().unwrap().insert(b.name_any(), b);
    }

    pub fn remove_app(&self) {
        self.apps.lock().unwrap().clear();
    }

    pub fn writes(&self) -> usize {
        self.metadata_writes.load(Ordering::SeqCst) + self.status_writes.load(Ordering::SeqCst)
    }

    fn write(&self, incoming: &CFBuild, status_only: bool) -> Result<CFBuild, StoreError> {
        let mut builds = self.builds.lock().unwrap();
        let key = incoming.name_any();
        let stored = builds.get_mut(&key).ok_or_else(|| anyhow::anyhow!("build {key} not found"))?;
        if stored.metadata.resource_version != incoming.metadata.resource_version {
            return Err(StoreError::Conflict(key));
        }
        if status_only {
            stored.status = incoming.status.clone();
        } else {
            stored.metadata = incoming.metadata.clone();
            stored.spec = incoming.spec.clone();
        }
        let rv: u64 = stored.metadata.resource_version.as_deref().unwrap_or("0").parse().unwrap_or(0);
        stored.metadata.resource_version = Some((rv + 1).to_string());
        Ok(stored.clone())
    }
}

#[async_trait::async_trait]
impl BuildStore for MemoryStore {
    async fn get_app(&self, _namespace: &str, name: &str) -> Result<Option<CFApp>, StoreError> {
        Ok(self.apps.lock().unwrap().get(name).cloned())
    }

    async fn get_package(&self, _namespace: &str, name: &str) -> Result<Option<CFPackage>, StoreError> {
        Ok(self.packages.lock().unwrap().get(name).cloned())
    }

    async fn replace(&self, build: &CFBuild) -> Result<CFBuild, StoreError> {
        self.metadata_writes.fetch_add(1, Ordering::SeqCst);
        self.write(build, false)
    }

    async fn replace_status(&self, build: &CFBuild) -> Result<CFBuild, StoreError> {
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        self.write(build, true)
    }
}

/// Image inspector returning a fixed answer and recording its arguments.
pub struct FakeImages {
    answer: Mutex<Result<ImageConfig, String>>,
    pub calls: Mutex<Vec<(Creds, String)>>,
}

impl FakeImages {
    pub fn user(user: &str) -> Arc<Self> {
        Self::with(Ok(ImageConfig { user: user.into(), exposed_ports: vec![8080], ..Default::default() }))
    }

    pub fn failing(msg: &str) -> Arc<Self> {
        Self::with(Err(msg.into()))
    }

    fn with(answer: Result<ImageConfig, String>) -> Arc<Self> {
        Arc::new(Self { answer: Mutex::new(answer), calls: Mutex::new(Vec::new()) })
    }
}

#[async_trait::async_trait]
impl ImageConfigGetter for FakeImages {
    async fn config(&self, creds: &Creds, image_ref: &str) -> Result<ImageConfig, ImageError> {
        self.calls.lock().unwrap().push((creds.clone(), image_ref.to_string()));
        self.answer.lock().unwrap().clone().map_err(|_| ImageError::Unauthorized(image_ref.to_string()))
    }
}

/// Cleaner that reports each call on a channel; fails the first `failures` calls.
pub struct FakeCleaner {
    tx: mpsc::UnboundedSender<AppKey>,
    failures: AtomicUsize,
}

impl FakeCleaner {
    pub fn new(failures: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<AppKey>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx, failures: AtomicUsize::new(failures) }), rx)
    }
}

#[async_trait::async_trait]
impl BuildCleaner for FakeCleaner {
    async fn clean(&self, app: &AppKey) -> anyhow::Result<()> {
        let _ = self.tx.send(app.clone());
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            anyhow::bail!("cleanup blew up");
        }
        Ok(())
    }
}

pub fn reconciler(
    store: Arc<MemoryStore>,
    images: Arc<FakeImages>,
    cleaner: Arc<FakeCleaner>,
) -> BuildReconciler<MemoryStore> {
    BuildReconciler::new(store, images, cleaner)
        .with_cleanup_retry(CleanupRetry { attempts: 3, backoff: std::time::Duration::from_millis(100) })
}
