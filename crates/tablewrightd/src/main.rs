//! tablewrightd — the tablewright schema operator.
//!
//! Watches `Table` resources and the worker pods dispatched for them,
//! planning and applying schema changes through short-lived jobs.
//!
//! # Usage
//!
//! ```text
//! tablewrightd run --config /etc/tablewright/tablewright.toml
//! tablewrightd crd > crds.json
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use kube::CustomResourceExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tablewright_core::{Database, OperatorConfig, Table};

const DEFAULT_CONFIG_PATH: &str = "/etc/tablewright/tablewright.toml";

#[derive(Parser)]
#[command(name = "tablewrightd", about = "tablewright schema operator")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the operator against the current cluster.
    Run {
        /// Operator config file. Defaults apply when it does not exist.
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Only watch this namespace.
        #[arg(long)]
        namespace: Option<String>,

        /// Image for plan and apply worker pods.
        #[arg(long)]
        worker_image: Option<String>,
    },
    /// Print the CustomResourceDefinitions as JSON.
    Crd,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Crd => print_crds(),
        Command::Run {
            config,
            namespace,
            worker_image,
        } => {
            init_tracing(cli.log_format);
            let config = load_config(&config, namespace, worker_image)?;
            run(config).await
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tablewrightd=debug,tablewright=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Read the config file, if any, and apply flag overrides.
fn load_config(
    path: &Path,
    namespace: Option<String>,
    worker_image: Option<String>,
) -> anyhow::Result<OperatorConfig> {
    let mut config = if path.exists() {
        OperatorConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?
    } else {
        warn!(path = %path.display(), "config file not found, using defaults");
        OperatorConfig::default()
    };

    if namespace.is_some() {
        config.namespace = namespace;
    }
    if let Some(image) = worker_image {
        anyhow::ensure!(!image.trim().is_empty(), "--worker-image must not be empty");
        config.worker_image = image;
    }
    Ok(config)
}

async fn run(config: OperatorConfig) -> anyhow::Result<()> {
    info!("tablewright operator starting");

    let client = kube::Client::try_default()
        .await
        .context("connecting to the Kubernetes API")?;

    tablewright_controller::runtime::run(client, config).await;

    info!("tablewright operator stopped");
    Ok(())
}

fn print_crds() -> anyhow::Result<()> {
    let crds = [Table::crd(), Database::crd()];
    println!("{}", serde_json::to_string_pretty(&crds)?);
    Ok(())
}
