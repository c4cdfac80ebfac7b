//! Workload controller
//!
//! Watches the deployed antrea-agent DaemonSet and antrea-controller
//! Deployment. Each event (and a periodic resync) refreshes the rollout
//! health reported on the status conditions and recreates a workload that
//! was deleted out from under the operator, from the cached rendered spec.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::warn;

use crate::shared::{SharedInfo, Workload};
use crate::status::StatusManager;
use crate::{Error, Result, ANTREA_NAMESPACE};

use super::InstallStore;

/// Resync interval; catches deletions the watch missed.
pub const WORKLOAD_RESYNC: Duration = Duration::from_secs(120);

const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Shared state for the workload controller
pub struct WorkloadContext {
    /// Kubernetes access
    pub store: Arc<dyn InstallStore>,
    /// Degraded-status aggregation, fed with rollout health
    pub status: Arc<StatusManager>,
    /// Cache of the last rendered workload specs
    pub shared: Arc<SharedInfo>,
}

async fn reconcile_workload(
    namespace: &str,
    name: &str,
    workload: Workload,
    ctx: &WorkloadContext,
) -> Result<Action> {
    if namespace != ANTREA_NAMESPACE || name != workload.name() {
        return Ok(Action::await_change());
    }

    ctx.shared
        .recreate_if_missing(ctx.store.as_ref(), workload)
        .await?;
    ctx.status.sync_rollout_health().await;
    Ok(Action::requeue(WORKLOAD_RESYNC))
}

/// One pass for an agent DaemonSet event.
pub async fn reconcile_daemon_set(
    daemon_set: Arc<DaemonSet>,
    ctx: Arc<WorkloadContext>,
) -> Result<Action> {
    let namespace = daemon_set.namespace().unwrap_or_default();
    reconcile_workload(&namespace, &daemon_set.name_any(), Workload::Agent, &ctx).await
}

/// One pass for a controller Deployment event.
pub async fn reconcile_deployment(
    deployment: Arc<Deployment>,
    ctx: Arc<WorkloadContext>,
) -> Result<Action> {
    let namespace = deployment.namespace().unwrap_or_default();
    reconcile_workload(&namespace, &deployment.name_any(), Workload::Controller, &ctx).await
}

/// Requeue shortly after a failed pass.
pub fn daemon_set_error_policy(
    daemon_set: Arc<DaemonSet>,
    error: &Error,
    _ctx: Arc<WorkloadContext>,
) -> Action {
    warn!(name = %daemon_set.name_any(), %error, "DaemonSet reconciliation failed");
    Action::requeue(ERROR_REQUEUE)
}

/// Requeue shortly after a failed pass.
pub fn deployment_error_policy(
    deployment: Arc<Deployment>,
    error: &Error,
    _ctx: Arc<WorkloadContext>,
) -> Action {
    warn!(name = %deployment.name_any(), %error, "Deployment reconciliation failed");
    Action::requeue(ERROR_REQUEUE)
}
