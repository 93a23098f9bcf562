use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use stratus_api::{JobResolver, JobResponse, JobsState, PollSettings};
use stratus_controllers::{BuildReconciler, KubeBuildStore, RunSettings};
use stratus_core::{default_deletion_repositories, Identity};
use stratus_kubehub::{get_kube_client, ClientSource, KubeDeletionRepository};
use stratus_ops::image::credentials::KubeSecretSource;
use stratus_ops::{KubeBuildCleaner, RegistryConfigGetter};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "stratus", version, about = "Stratus jobs API and build controllers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct JobArgs {
    /// Public base URL, used for job links
    #[arg(long, env = "STRATUS_SERVER_URL", default_value = "http://localhost:8080")]
    server_url: Url,
    /// Delay between deletion polls, in milliseconds
    #[arg(long, env = "STRATUS_POLLING_INTERVAL_MS", default_value_t = 1000)]
    polling_interval_ms: u64,
    /// Namespace holding org resources
    #[arg(long, env = "STRATUS_ROOT_NAMESPACE", default_value = "cf")]
    root_namespace: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve GET /v3/jobs/{guid}
    Api {
        #[arg(long, env = "STRATUS_LISTEN", default_value = "0.0.0.0:8080")]
        listen: SocketAddr,
        /// Query the store as the caller instead of the server's own account
        #[arg(long, env = "STRATUS_IMPERSONATE")]
        impersonate: bool,
        #[command(flatten)]
        jobs: JobArgs,
    },
    /// Run the docker build controller
    Controllers {
        /// Only watch builds in this namespace
        #[arg(long = "ns", env = "STRATUS_WATCH_NAMESPACE")]
        namespace: Option<String>,
        /// Builds reconciled in parallel (0 = unbounded)
        #[arg(long, env = "STRATUS_CONTROLLER_CONCURRENCY", default_value_t = 4)]
        concurrency: u16,
        /// Finished builds kept per app by cleanup
        #[arg(long, env = "STRATUS_RETAINED_BUILDS", default_value_t = 5)]
        retained_builds: usize,
        /// Per-request registry timeout, in seconds
        #[arg(long, env = "STRATUS_REGISTRY_TIMEOUT_SECS", default_value_t = 30)]
        registry_timeout_secs: u64,
        /// Registries reached over plain http (comma separated)
        #[arg(long, env = "STRATUS_INSECURE_REGISTRIES", value_delimiter = ',')]
        insecure_registries: Vec<String>,
    },
    /// Resolve a job once and print it as JSON
    Job {
        guid: String,
        /// Query the store as this user
        #[arg(long = "as")]
        user: Option<String>,
        /// Groups for --as
        #[arg(long = "as-group")]
        groups: Vec<String>,
        #[command(flatten)]
        jobs: JobArgs,
    },
    /// Print the custom resource definitions as YAML
    Crds,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Api { listen, impersonate, jobs } => {
            let clients = if impersonate {
                ClientSource::impersonating().await?
            } else {
                ClientSource::Shared(get_kube_client().await?)
            };
            let resolver = job_resolver(&jobs, clients);
            let app = stratus_api::router(JobsState::new(resolver, jobs.server_url.clone()));
            let listener = tokio::net::TcpListener::bind(listen).await.with_context(|| format!("binding {listen}"))?;
            info!(addr = %listen, server_url = %jobs.server_url, impersonate, "jobs API listening");
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = signal::ctrl_c().await;
                    info!("shutdown requested");
                })
                .await?;
        }
        Commands::Controllers { namespace, concurrency, retained_builds, registry_timeout_secs, insecure_registries } => {
            let client = get_kube_client().await?;
            let images = RegistryConfigGetter::new(
                KubeSecretSource::new(client.clone()),
                Duration::from_secs(registry_timeout_secs),
                insecure_registries,
            )?;
            let cleaner = KubeBuildCleaner::new(client.clone(), retained_builds);
            let store = Arc::new(KubeBuildStore::new(client.clone()));
            let reconciler = BuildReconciler::new(store, Arc::new(images), Arc::new(cleaner));
            stratus_controllers::run(client, reconciler, RunSettings { namespace, concurrency }).await;
        }
        Commands::Job { guid, user, groups, jobs } => {
            let t0 = Instant::now();
            let (clients, identity) = match user {
                Some(user) => (ClientSource::impersonating().await?, Identity { user, groups }),
                None => (ClientSource::Shared(get_kube_client().await?), Identity::default()),
            };
            let resolver = job_resolver(&jobs, clients);
            let cancel = CancellationToken::new();
            let _guard = cancel.clone().drop_guard();
            let (job, status) = tokio::select! {
                res = resolver.resolve(&identity, &guid, &cancel) => res?,
                _ = signal::ctrl_c() => anyhow::bail!("interrupted"),
            };
            info!(job_guid = %guid, took_ms = %t0.elapsed().as_millis(), "job resolved");
            println!("{}", serde_json::to_string_pretty(&JobResponse::for_job(&job, &status, &jobs.server_url))?);
        }
        Commands::Crds => {
            print!("{}", stratus_schema::crd_manifests_yaml()?);
        }
    }
    Ok(())
}

fn job_resolver(args: &JobArgs, clients: ClientSource) -> JobResolver {
    let orgs = Arc::new(KubeDeletionRepository::orgs(clients.clone(), args.root_namespace.clone()));
    let spaces = Arc::new(KubeDeletionRepository::spaces(clients));
    let repositories = default_deletion_repositories(orgs, spaces);
    JobResolver::new(Arc::new(repositories), PollSettings::with_interval(Duration::from_millis(args.polling_interval_ms)))
}

fn init_tracing() {
    let env = std::env::var("STRATUS_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("STRATUS_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid STRATUS_METRICS_ADDR; expected host:port");
        }
    }
}
