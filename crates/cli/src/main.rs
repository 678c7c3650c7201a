#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use clap::{ArgAction, Parser, Subcommand};
use kube::{Client, CustomResourceExt};
use meshop_core::{EffectiveConfiguration, Linkerd};
use meshop_kubehub::{KubeStore, WatchScope};
use meshop_reconcile::{Context, Reconciler};
use meshop_resources::{self as res, Subsystem};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "meshop", version, about = "Linkerd control plane operator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch Linkerd records and reconcile the control plane
    Run {
        /// Namespace the operator runs in
        #[arg(long = "pod-namespace", env = "POD_NAMESPACE")]
        pod_namespace: Option<String>,
        /// Restrict the watch to this namespace (must equal the pod namespace)
        #[arg(long = "watch-namespace", env = "WATCH_NAMESPACE")]
        watch_namespace: Option<String>,
        /// Delay before a failed pass is retried
        #[arg(long = "requeue-secs", env = "MESHOP_REQUEUE_SECS", default_value_t = 30)]
        requeue_secs: u64,
        /// Serve Prometheus metrics on host:port
        #[arg(long = "metrics-addr", env = "MESHOP_METRICS_ADDR")]
        metrics_addr: Option<String>,
    },
    /// Print the Linkerd CustomResourceDefinition
    Crd,
    /// Print the resources a record would produce
    Render {
        /// Linkerd record as YAML
        file: PathBuf,
        /// Namespace to assume when the record has none
        #[arg(long = "ns", default_value = "linkerd")]
        namespace: String,
        /// Also render the schema extension subsystems
        #[arg(long = "include-reserved", action = ArgAction::SetTrue)]
        include_reserved: bool,
    },
    /// Stop managing records: drop the finalizer and mark them Unmanaged
    Release {
        /// Only release records in this namespace
        #[arg(long = "ns")]
        namespace: Option<String>,
    },
}

fn init_tracing() {
    let env = std::env::var("MESHOP_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics(addr: Option<&str>) {
    let Some(addr) = addr else { return };
    if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        match builder.with_http_listener(sock).install() {
            Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
            Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
        }
    } else {
        tracing::warn!(addr = %addr, "invalid MESHOP_METRICS_ADDR; expected host:port");
    }
}

fn subsystems(include_reserved: bool) -> Vec<Subsystem> {
    let mut out = res::default_subsystems();
    if include_reserved {
        out.extend(res::reserved_subsystems());
    }
    out
}

fn load_record(path: &Path, namespace: &str) -> Result<Linkerd> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut record: Linkerd = serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    if record.metadata.namespace.is_none() {
        record.metadata.namespace = Some(namespace.to_string());
    }
    Ok(record)
}

/// Multi-document YAML of every present object, in pass order.
fn render(record: &Linkerd, include_reserved: bool) -> Result<String> {
    if !meshop_core::is_supported(&record.spec.version) {
        bail!("unsupported Linkerd version {:?}", record.spec.version);
    }
    let cfg = EffectiveConfiguration::resolve(record).context("resolving record")?;
    let mut docs = Vec::new();
    for subsystem in subsystems(include_reserved) {
        let rendered = subsystem.render(&cfg).with_context(|| format!("rendering {}", subsystem.name))?;
        for (resource, state) in rendered {
            if state == meshop_core::DesiredState::Absent {
                continue;
            }
            let value = serde_json::to_value(resource.object())?;
            docs.push(serde_yaml::to_string(&value)?);
        }
    }
    Ok(docs.join("---\n"))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { pod_namespace, watch_namespace, requeue_secs, metrics_addr } => {
            init_metrics(metrics_addr.as_deref());
            let scope = WatchScope::resolve(pod_namespace, watch_namespace).context("resolving watch scope")?;
            let client = Client::try_default().await.context("building kube client")?;
            info!(pod_namespace = %scope.pod_namespace, requeue_secs, "starting operator");
            let ctx = Arc::new(Context {
                reconciler: Reconciler::new(Arc::new(KubeStore::new(client.clone()))),
                requeue_after: Duration::from_secs(requeue_secs),
            });
            meshop_reconcile::controller::run(client, &scope, ctx).await;
        }
        Commands::Crd => {
            print!("{}", serde_yaml::to_string(&Linkerd::crd()).context("encoding CRD")?);
        }
        Commands::Render { file, namespace, include_reserved } => {
            let record = load_record(&file, &namespace)?;
            print!("{}", render(&record, include_reserved)?);
        }
        Commands::Release { namespace } => {
            let client = Client::try_default().await.context("building kube client")?;
            let reconciler = Reconciler::new(Arc::new(KubeStore::new(client)));
            let released = reconciler.release_all(namespace.as_deref()).await.context("releasing records")?;
            println!("released {released} Linkerd record(s)");
        }
    }
    Ok(())
}
