//! Antrea operator - installs and keeps in sync an Antrea CNI deployment

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};

use antrea_operator::controller::{
    daemon_set_error_policy, deployment_error_policy, error_policy, reconcile,
    reconcile_daemon_set, reconcile_deployment, Context, KubeInstallStore, WorkloadContext,
};
use antrea_operator::crd::{AntreaInstall, ClusterNetwork, Platform};
use antrea_operator::shared::SharedInfo;
use antrea_operator::status::StatusManager;
use antrea_operator::{
    ANTREA_NAMESPACE, DEFAULT_MANIFEST_DIR, OPERATOR_CONFIG_NAME, OPERATOR_NAMESPACE,
};

/// Antrea operator - CRD-driven installation of the Antrea CNI
#[derive(Parser, Debug)]
#[command(name = "antrea-operator", version, about, long_about = None)]
struct Cli {
    /// Generate the AntreaInstall CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Platform the operator runs on (kubernetes or openshift)
    #[arg(long, env = "ANTREA_PLATFORM", default_value = "kubernetes")]
    platform: Platform,

    /// Directory holding the Antrea manifest templates
    #[arg(long, env = "ANTREA_MANIFEST_DIR", default_value = DEFAULT_MANIFEST_DIR)]
    manifest_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controllers (default mode)
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&AntreaInstall::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli).await,
    }
}

/// Run the install and workload controllers until shutdown
async fn run_controller(cli: Cli) -> anyhow::Result<()> {
    let client = Client::try_default().await?;
    let store = Arc::new(KubeInstallStore::new(client.clone()));
    let status = Arc::new(StatusManager::new(store.clone(), cli.platform));
    let shared = SharedInfo::new();

    let ctx = Arc::new(Context::new(
        store.clone(),
        status.clone(),
        shared.clone(),
        cli.manifest_dir.clone(),
    ));
    let workload_ctx = Arc::new(WorkloadContext {
        store,
        status,
        shared,
    });

    let installs: Api<AntreaInstall> = Api::namespaced(client.clone(), OPERATOR_NAMESPACE);
    let daemon_sets: Api<DaemonSet> = Api::namespaced(client.clone(), ANTREA_NAMESPACE);
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), ANTREA_NAMESPACE);

    tracing::info!(platform = %cli.platform, "Starting Antrea operator controllers");

    let mut install_controller = Controller::new(installs, WatcherConfig::default());
    if cli.platform == Platform::Openshift {
        // Cluster network changes must re-trigger the install pass.
        let networks: Api<ClusterNetwork> = Api::all(client.clone());
        install_controller = install_controller.watches(networks, WatcherConfig::default(), |_| {
            Some(
                ObjectRef::<AntreaInstall>::new(OPERATOR_CONFIG_NAME)
                    .within(OPERATOR_NAMESPACE),
            )
        });
    }
    let install_controller = install_controller
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Install reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Install reconciliation error");
                }
            }
        });

    let workload_selector = WatcherConfig::default().labels("app=antrea");
    let daemon_set_controller = Controller::new(daemon_sets, workload_selector.clone())
        .shutdown_on_signal()
        .run(
            reconcile_daemon_set,
            daemon_set_error_policy,
            workload_ctx.clone(),
        )
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "DaemonSet reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "DaemonSet reconciliation error");
                }
            }
        });

    let deployment_controller = Controller::new(deployments, workload_selector)
        .shutdown_on_signal()
        .run(
            reconcile_deployment,
            deployment_error_policy,
            workload_ctx.clone(),
        )
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Deployment reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Deployment reconciliation error");
                }
            }
        });

    tokio::select! {
        _ = install_controller => {
            tracing::info!("Install controller completed");
        }
        _ = daemon_set_controller => {
            tracing::info!("DaemonSet controller completed");
        }
        _ = deployment_controller => {
            tracing::info!("Deployment controller completed");
        }
    }

    Ok(())
}
