use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use cosmo_core::{CosmosFullNode, ScheduledVolumeSnapshot};
use cosmo_kubehub::KubeStore;
use cosmo_overlay::ExternalAddress;
use cosmo_snapshot::{FullNodeControl, SignalError};
use serde::de::DeserializeOwned;
use tracing::{error, info, warn};

/// Exit code for failures a caller should retry (EX_TEMPFAIL).
const EXIT_RETRY: i32 = 75;

#[derive(Parser, Debug)]
#[command(name = "cosmoctl", version, about = "Cosmos operator CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render config-overlay.toml and app-overlay.toml for a CosmosFullNode manifest
    Render {
        /// CosmosFullNode manifest (YAML or JSON), "-" for stdin
        file: PathBuf,
        /// P2P external address peers should dial
        #[arg(long = "external-address", env = "COSMO_P2P_EXTERNAL_ADDRESS")]
        external_address: Option<String>,
        /// Print the full ConfigMap instead of the bare files
        #[arg(long = "config-map")]
        config_map: bool,
    },
    /// Drive a ScheduledVolumeSnapshot's full node through the snapshot lifecycle
    Snapshot {
        #[command(subcommand)]
        step: SnapshotStep,
        /// Per-call deadline in seconds
        #[arg(long = "timeout-secs", env = "COSMO_OP_TIMEOUT_SECS", default_value_t = 30, global = true)]
        timeout_secs: u64,
    },
}

#[derive(Subcommand, Debug)]
enum SnapshotStep {
    /// Print the coordination key of a snapshot
    Key { file: PathBuf },
    /// Ask the full node to delete the candidate pod
    SignalDelete { file: PathBuf },
    /// Succeed once the candidate pod is gone
    ConfirmDelete { file: PathBuf },
    /// Ask the full node to recreate the candidate pod
    SignalRestore { file: PathBuf },
}

fn init_tracing() {
    let env = std::env::var("COSMO_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("COSMO_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid COSMO_METRICS_ADDR; expected host:port");
        }
    }
}

fn read_manifest<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = if path.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin()).context("reading manifest from stdin")?
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?
    };
    // YAML is a superset of JSON
    serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Render { file, external_address, config_map } => {
            let crd: CosmosFullNode = read_manifest(&file)?;
            info!(name = %crd.app_name(), ns = %crd.namespace(), "render invoked");
            let ext = ExternalAddress(external_address);
            if config_map {
                let cm = cosmo_overlay::build_config_map(&crd, &ext)?;
                match cli.output {
                    Output::Human => print!("{}", serde_yaml::to_string(&cm)?),
                    Output::Json => println!("{}", serde_json::to_string_pretty(&cm)?),
                }
            } else {
                let bundle = cosmo_overlay::build_artifacts(&crd, &ext)?;
                match cli.output {
                    Output::Human => {
                        for (name, text) in &bundle {
                            println!("# --- {} ---", name);
                            print!("{}", text);
                        }
                    }
                    Output::Json => println!("{}", serde_json::to_string_pretty(&bundle)?),
                }
            }
        }
        Commands::Snapshot { step, timeout_secs } => {
            let (file, op) = match step {
                SnapshotStep::Key { file } => {
                    let crd: ScheduledVolumeSnapshot = read_manifest(&file)?;
                    println!("{}", cosmo_snapshot::source_key(&crd));
                    return Ok(());
                }
                SnapshotStep::SignalDelete { file } => (file, Step::SignalDelete),
                SnapshotStep::ConfirmDelete { file } => (file, Step::ConfirmDelete),
                SnapshotStep::SignalRestore { file } => (file, Step::SignalRestore),
            };
            let crd: ScheduledVolumeSnapshot = read_manifest(&file)?;
            run_step(op, &crd, Duration::from_secs(timeout_secs.max(1)), cli.output).await?;
        }
    }

    Ok(())
}

#[derive(Copy, Clone, Debug)]
enum Step { SignalDelete, ConfirmDelete, SignalRestore }

impl Step {
    fn name(&self) -> &'static str {
        match self {
            Step::SignalDelete => "signal-delete",
            Step::ConfirmDelete => "confirm-delete",
            Step::SignalRestore => "signal-restore",
        }
    }
}

/// One lifecycle call bounded by `deadline`. Retryable outcomes exit with
/// `EXIT_RETRY` so a wrapping loop can tell them from hard failures.
async fn run_step(step: Step, crd: &ScheduledVolumeSnapshot, deadline: Duration, output: Output) -> Result<()> {
    let name = step.name();
    info!(step = name, snapshot = %format!("{}/{}", crd.namespace(), crd.name()), "snapshot step invoked");
    let store = KubeStore::try_default().await.context("connecting to cluster")?;
    let control = FullNodeControl::new(store.clone(), store);
    let call = async {
        match step {
            Step::SignalDelete => control.signal_pod_deletion(crd).await,
            Step::ConfirmDelete => control.confirm_pod_deletion(crd).await,
            Step::SignalRestore => control.signal_pod_restoration(crd).await,
        }
    };
    let res = match tokio::time::timeout(deadline, call).await {
        Ok(res) => res,
        Err(_) => {
            warn!(step = name, timeout_secs = deadline.as_secs(), "snapshot step timed out");
            eprintln!("{}: timed out after {}s", name, deadline.as_secs());
            std::process::exit(EXIT_RETRY);
        }
    };
    match res {
        Ok(()) => {
            match output {
                Output::Human => println!("{}: ok", name),
                Output::Json => println!("{}", serde_json::json!({"step": name, "ok": true})),
            }
            Ok(())
        }
        Err(e) if e.is_transient() => {
            warn!(step = name, error = %e, "snapshot step not done; retry");
            match output {
                Output::Human => eprintln!("{}: {}", name, e),
                Output::Json => println!("{}", serde_json::json!({"step": name, "ok": false, "retry": true, "error": e.to_string()})),
            }
            std::process::exit(EXIT_RETRY);
        }
        Err(e @ SignalError::Precondition { .. }) => {
            error!(step = name, error = %e, "caller contract violated");
            Err(anyhow!(e)).context("snapshot precondition")
        }
        Err(e) => {
            error!(step = name, error = %e, "snapshot step failed");
            Err(e.into())
        }
    }
}
