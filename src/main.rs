//! Zookeeper Operator - converges Zookeeper ensembles on Kubernetes

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use zookeeper_operator::controller::{error_policy, reconcile, Context, ControllerSettings};
use zookeeper_operator::crd::{crd_manifest, Zookeeper};

/// Zookeeper operator - runs one Deployment and one Service per ensemble node
#[derive(Parser, Debug)]
#[command(name = "zookeeper-operator", version, about, long_about = None)]
struct Cli {
    /// Print the Zookeeper CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(flatten)]
    controller: ControllerArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches Zookeeper objects along with the Deployments and Services
    /// they own, and reconciles each ensemble whenever any of them changes.
    Controller,
}

/// Controller mode arguments
#[derive(Args, Debug)]
struct ControllerArgs {
    /// Only watch Zookeeper objects in this namespace (default: all namespaces)
    #[arg(long, env = "ZOOKEEPER_WATCH_NAMESPACE", global = true)]
    namespace: Option<String>,

    /// Seconds to wait before retrying a failed reconcile
    #[arg(
        long,
        env = "ZOOKEEPER_ERROR_REQUEUE_SECS",
        default_value_t = 15,
        global = true
    )]
    error_requeue_secs: u64,
}

impl ControllerArgs {
    fn settings(&self) -> ControllerSettings {
        ControllerSettings {
            error_requeue: Duration::from_secs(self.error_requeue_secs),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    /// Human readable lines
    Text,
    /// One JSON object per line
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_format);

    if cli.crd {
        println!("{}", crd_manifest()?);
        return Ok(());
    }

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.controller).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

/// Run the controller until a shutdown signal arrives
async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    tracing::info!("Zookeeper controller starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let ctx = Arc::new(
        Context::builder(client.clone())
            .settings(args.settings())
            .build(),
    );

    let (zookeepers, deployments, services): (Api<Zookeeper>, Api<Deployment>, Api<Service>) =
        match args.namespace.as_deref() {
            Some(ns) => {
                tracing::info!(namespace = %ns, "Watching a single namespace");
                (
                    Api::namespaced(client.clone(), ns),
                    Api::namespaced(client.clone(), ns),
                    Api::namespaced(client, ns),
                )
            }
            None => (
                Api::all(client.clone()),
                Api::all(client.clone()),
                Api::all(client),
            ),
        };

    Controller::new(zookeepers, WatcherConfig::default())
        .owns(deployments, WatcherConfig::default())
        .owns(services, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => {
                    tracing::debug!(zookeeper = %object.name, ?action, "Reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("Zookeeper controller shutting down");
    Ok(())
}
