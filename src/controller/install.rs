//! Install controller
//!
//! Converges the cluster on the configuration carried by the well-known
//! `AntreaInstall` CR: merge defaults, validate, detect what changed since
//! the last applied pass, render the manifests and apply them, then
//! refresh the published network status. Every stage reports into the
//! status manager so a failure shows up as a `Degraded` condition with a
//! stage-specific reason.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::DynamicObject;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::{
    build_network_status, build_render_data, detect_change, fill_configs,
    has_cluster_network_change, has_default_mtu_change, validate_config,
};
use crate::crd::{AntreaInstall, AntreaInstallSpec, ClusterNetwork, NetworkSpec};
use crate::render::ManifestRenderer;
use crate::shared::SharedInfo;
use crate::status::{StatusManager, StatusSource};
use crate::{
    Error, Result, AGENT_DAEMON_SET_NAME, ANTREA_CONFIG_MAP_NAME, ANTREA_NAMESPACE,
    CLUSTER_CONFIG_NAME, CONTROLLER_DEPLOYMENT_NAME, OPERATOR_CONFIG_NAME, OPERATOR_NAMESPACE,
    OPERATOR_NETWORK_NAME,
};

use super::{object_reference, InstallStore};

/// Steady-state resync interval
const INSTALL_RESYNC: Duration = Duration::from_secs(300);

/// Requeue delay after a failed pass
const ERROR_REQUEUE: Duration = Duration::from_secs(5);

// ConfigMap keys the rendered configuration lands under.
const AGENT_CONF_KEY: &str = "antrea-agent.conf";
const CNI_CONF_KEY: &str = "antrea-cni.conflist";
const CONTROLLER_CONF_KEY: &str = "antrea-controller.conf";

/// Configuration applied by the last successful pass. Change detection
/// compares against this; it advances only once a pass fully succeeds.
#[derive(Default)]
struct AppliedState {
    install: Option<AntreaInstallSpec>,
    cluster_network: Option<NetworkSpec>,
}

/// Shared state for the install controller
pub struct Context {
    /// Kubernetes access
    pub store: Arc<dyn InstallStore>,
    /// Degraded-status aggregation and publication
    pub status: Arc<StatusManager>,
    /// Rendered workload cache shared with the workload controller
    pub shared: Arc<SharedInfo>,
    /// Manifest template renderer
    pub renderer: ManifestRenderer,
    /// Directory holding the manifest templates
    pub manifest_dir: PathBuf,
    applied: Mutex<AppliedState>,
}

impl Context {
    /// Assemble the controller context
    pub fn new(
        store: Arc<dyn InstallStore>,
        status: Arc<StatusManager>,
        shared: Arc<SharedInfo>,
        manifest_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            status,
            shared,
            renderer: ManifestRenderer::new(),
            manifest_dir,
            applied: Mutex::new(AppliedState::default()),
        }
    }
}

/// Parent every rendered object to the cluster network CR so the
/// deployment surfaces in its ownership graph. A network object without a
/// uid (not yet persisted) is skipped.
fn set_owner_reference(objects: &mut [DynamicObject], network: &ClusterNetwork) {
    let Some(uid) = network.metadata.uid.clone() else {
        return;
    };
    let owner = OwnerReference {
        api_version: "config.openshift.io/v1".to_string(),
        kind: "Network".to_string(),
        name: network.name_any(),
        uid,
        controller: Some(true),
        ..Default::default()
    };
    for object in objects.iter_mut() {
        object.metadata.owner_references = Some(vec![owner.clone()]);
    }
}

fn find_rendered<'a>(
    objects: &'a [DynamicObject],
    kind: &str,
    name: &str,
) -> Option<&'a DynamicObject> {
    objects.iter().find(|object| {
        object
            .types
            .as_ref()
            .map(|types| types.kind == kind)
            .unwrap_or(false)
            && object.metadata.name.as_deref() == Some(name)
    })
}

/// Rebuild the last applied configuration from the live cluster: the
/// rendered ConfigMap carries the configuration blobs and the controller
/// Deployment carries the image. Used after an operator restart, when the
/// in-memory snapshot is empty. `None` means nothing was ever applied.
async fn reconstruct_applied_config(
    store: &dyn InstallStore,
    platform: crate::crd::Platform,
) -> Result<Option<AntreaInstallSpec>> {
    let Some(config_map) = store
        .get_config_map(ANTREA_NAMESPACE, ANTREA_CONFIG_MAP_NAME)
        .await?
    else {
        return Ok(None);
    };
    let Some(deployment) = store
        .get_deployment(ANTREA_NAMESPACE, CONTROLLER_DEPLOYMENT_NAME)
        .await?
    else {
        return Ok(None);
    };

    let image = deployment
        .spec
        .and_then(|spec| spec.template.spec)
        .map(|pod_spec| pod_spec.containers)
        .unwrap_or_default()
        .into_iter()
        .find(|container| container.name == CONTROLLER_DEPLOYMENT_NAME)
        .and_then(|container| container.image);
    let Some(image) = image else {
        return Err(Error::internal(
            "controller deployment exists but carries no image",
        ));
    };

    let data = config_map.data.unwrap_or_default();
    Ok(Some(AntreaInstallSpec {
        antrea_agent_config: data.get(AGENT_CONF_KEY).cloned().unwrap_or_default(),
        antrea_cni_config: data.get(CNI_CONF_KEY).cloned().unwrap_or_default(),
        antrea_controller_config: data.get(CONTROLLER_CONF_KEY).cloned().unwrap_or_default(),
        antrea_image: image,
        antrea_platform: platform,
    }))
}

/// One reconciliation pass for the install CR.
#[instrument(skip(install, ctx), fields(install = %install.name_any()))]
pub async fn reconcile(install: Arc<AntreaInstall>, ctx: Arc<Context>) -> Result<Action> {
    let name = install.name_any();
    let namespace = install.namespace().unwrap_or_default();
    if namespace != OPERATOR_NAMESPACE || name != OPERATOR_CONFIG_NAME {
        warn!(
            %namespace,
            %name,
            "Ignoring AntreaInstall CR, expected \"{OPERATOR_NAMESPACE}/{OPERATOR_CONFIG_NAME}\""
        );
        return Ok(Action::await_change());
    }
    info!(%name, "Reconciling Antrea install");

    let capabilities = install.spec.antrea_platform.capabilities();

    let cluster_network = if capabilities.has_cluster_network_facts {
        match ctx.store.get_cluster_network(CLUSTER_CONFIG_NAME).await {
            Ok(Some(network)) => Some(network),
            Ok(None) => {
                // A prerequisite that does not exist yet is a waiting state,
                // not a failure: its creation event triggers the next pass.
                let message =
                    format!("Cluster network configuration \"{CLUSTER_CONFIG_NAME}\" not found");
                info!("{message}");
                ctx.status
                    .set_degraded(StatusSource::ClusterConfig, "NoClusterConfig", message)
                    .await;
                return Ok(Action::await_change());
            }
            Err(e) => {
                ctx.status
                    .set_degraded(
                        StatusSource::ClusterConfig,
                        "InvalidClusterConfig",
                        format!("Failed to get cluster network configuration: {e}"),
                    )
                    .await;
                return Err(e);
            }
        }
    } else {
        None
    };
    ctx.status.set_not_degraded(StatusSource::ClusterConfig).await;

    let operator_network = if capabilities.has_cluster_network_facts {
        match ctx.store.get_operator_network(OPERATOR_NETWORK_NAME).await? {
            Some(network) => Some(network),
            None => {
                let message = "Cluster network operator configuration not found";
                info!("{message}");
                ctx.status
                    .set_degraded(
                        StatusSource::OperatorConfig,
                        "NoClusterNetworkOperatorConfig",
                        message,
                    )
                    .await;
                return Ok(Action::await_change());
            }
        }
    } else {
        None
    };

    let mut config = install.spec.clone();
    let cluster_spec = cluster_network.as_ref().map(|network| &network.spec);
    if let Err(e) = fill_configs(capabilities, cluster_spec, &mut config) {
        ctx.status
            .set_degraded(
                StatusSource::OperatorConfig,
                "FillConfigurationsError",
                format!("Failed to fill configurations: {e}"),
            )
            .await;
        return Err(e);
    }
    if let Err(e) = validate_config(cluster_spec, &config) {
        ctx.status
            .set_degraded(
                StatusSource::OperatorConfig,
                "InvalidOperatorConfig",
                format!("The operator configuration is invalid: {e}"),
            )
            .await;
        return Err(e);
    }

    let mut applied = ctx.applied.lock().await;
    let prior = match &applied.install {
        Some(prior) => Some(prior.clone()),
        None => {
            match reconstruct_applied_config(ctx.store.as_ref(), install.spec.antrea_platform)
                .await
            {
                Ok(prior) => prior,
                Err(e) => {
                    ctx.status
                        .set_degraded(
                            StatusSource::OperatorConfig,
                            "InternalError",
                            format!("Failed to get applied configurations: {e}"),
                        )
                        .await;
                    return Err(e);
                }
            }
        }
    };

    let changes = detect_change(prior.as_ref(), &config);
    let cluster_changed = match cluster_network.as_ref() {
        Some(network) => {
            has_cluster_network_change(applied.cluster_network.as_ref(), &network.spec)
        }
        None => false,
    };
    let (mtu_changed, mtu) = match has_default_mtu_change(prior.as_ref(), &config) {
        Ok(result) => result,
        Err(e) => {
            ctx.status
                .set_degraded(
                    StatusSource::OperatorConfig,
                    "InternalError",
                    format!("Failed to check default MTU: {e}"),
                )
                .await;
            return Err(e);
        }
    };

    if !changes.needs_apply() && !cluster_changed && !mtu_changed {
        debug!("Configuration unchanged since last applied pass");
        ctx.status.set_not_degraded(StatusSource::OperatorConfig).await;
        ctx.status.set_deployed().await;
        return Ok(Action::requeue(INSTALL_RESYNC));
    }

    let render_data =
        build_render_data(operator_network.as_ref().map(|network| &network.spec), &config);
    let mut objects = match ctx.renderer.render_dir(&ctx.manifest_dir, &render_data) {
        Ok(objects) => objects,
        Err(e) => {
            ctx.status
                .set_degraded(
                    StatusSource::OperatorConfig,
                    "RenderConfigError",
                    format!("Failed to render configurations: {e}"),
                )
                .await;
            return Err(e);
        }
    };
    if let Some(network) = cluster_network.as_ref() {
        set_owner_reference(&mut objects, network);
    }

    let agent = find_rendered(&objects, "DaemonSet", AGENT_DAEMON_SET_NAME);
    let controller = find_rendered(&objects, "Deployment", CONTROLLER_DEPLOYMENT_NAME);
    let (Some(agent), Some(controller)) = (agent, controller) else {
        let message = "rendered manifests are missing the agent DaemonSet or the controller \
                       Deployment";
        ctx.status
            .set_degraded(StatusSource::PodDeployment, "InternalError", message)
            .await;
        return Err(Error::internal(message));
    };
    ctx.shared
        .set_workload_specs(agent.clone(), controller.clone())
        .await;
    ctx.status
        .set_workloads(
            vec![(ANTREA_NAMESPACE.to_string(), AGENT_DAEMON_SET_NAME.to_string())],
            vec![(
                ANTREA_NAMESPACE.to_string(),
                CONTROLLER_DEPLOYMENT_NAME.to_string(),
            )],
        )
        .await;
    ctx.status
        .set_related_objects(objects.iter().map(object_reference).collect())
        .await;

    for object in &objects {
        if let Err(e) = ctx.store.apply(object).await {
            ctx.status
                .set_degraded(
                    StatusSource::PodDeployment,
                    "ApplyObjectsError",
                    format!("Failed to apply objects: {e}"),
                )
                .await;
            return Err(e);
        }
    }

    // A changed image rolls pods over on its own; deleting them as well
    // would restart every node's agent twice.
    if prior.is_some() && !changes.image_changed {
        let mut stale_components = Vec::new();
        if changes.agent_changed {
            stale_components.push(AGENT_DAEMON_SET_NAME);
        }
        if changes.controller_changed {
            stale_components.push(CONTROLLER_DEPLOYMENT_NAME);
        }
        for component in stale_components {
            info!(%component, "Deleting stale pods to pick up configuration change");
            if let Err(e) = ctx
                .store
                .delete_pods_with_label(ANTREA_NAMESPACE, component)
                .await
            {
                ctx.status
                    .set_degraded(
                        StatusSource::PodDeployment,
                        "DeleteOldPodsError",
                        format!("Failed to delete old pods: {e}"),
                    )
                    .await;
                return Err(e);
            }
        }
    }

    if let Some(network) = cluster_network.as_ref() {
        if cluster_changed || mtu_changed {
            let network_status = build_network_status(&network.spec, mtu);
            if let Err(e) = ctx
                .store
                .update_network_status(CLUSTER_CONFIG_NAME, &network_status)
                .await
            {
                ctx.status
                    .set_degraded(
                        StatusSource::ClusterConfig,
                        "UpdateNetworkStatusError",
                        format!("Failed to update network status: {e}"),
                    )
                    .await;
                return Err(e);
            }
        }
    }

    ctx.status.set_not_degraded(StatusSource::OperatorConfig).await;
    ctx.status.set_not_degraded(StatusSource::PodDeployment).await;
    ctx.status.set_deployed().await;

    applied.install = Some(config);
    applied.cluster_network = cluster_network.map(|network| network.spec);
    info!(objects = objects.len(), "Applied Antrea deployment");
    Ok(Action::requeue(INSTALL_RESYNC))
}

/// Requeue shortly after a failed pass.
pub fn error_policy(install: Arc<AntreaInstall>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(
        name = %install.name_any(),
        %error,
        "Reconciliation failed, requeueing"
    );
    Action::requeue(ERROR_REQUEUE)
}
