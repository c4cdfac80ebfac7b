//! Degraded-status aggregation and publication
//!
//! Every stage of a reconciliation pass reports into one of a fixed set of
//! slots; the aggregate is published as a `Degraded` condition on the
//! install CR and, on platforms that carry one, on the `ClusterOperator`
//! object. Workload rollout health feeds two of the slots and the
//! `Progressing`/`Available` conditions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
#[cfg(test)]
use mockall::automock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::crd::{
    set_condition, AntreaInstall, AntreaInstallStatus, ClusterOperator, ClusterOperatorStatus,
    Condition, ConditionStatus, ObjectReference, OperandVersion, Platform, CONDITION_AVAILABLE,
    CONDITION_DEGRADED, CONDITION_PROGRESSING, CONDITION_UPGRADEABLE,
};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{Result, CLUSTER_OPERATOR_NAME, OPERATOR_CONFIG_NAME, OPERATOR_NAMESPACE, RELEASE_VERSION};

/// A rollout is reported as hung once it has made no progress for this long.
const ROLLOUT_HUNG_AFTER: Duration = Duration::from_secs(10 * 60);

/// Kubernetes access needed to publish status.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Fetch the install CR, `None` when absent
    async fn get_install(&self, namespace: &str, name: &str) -> Result<Option<AntreaInstall>>;

    /// Replace the install CR status subresource
    async fn patch_install_status(
        &self,
        namespace: &str,
        name: &str,
        status: &AntreaInstallStatus,
    ) -> Result<()>;

    /// Fetch a ClusterOperator, `None` when absent
    async fn get_cluster_operator(&self, name: &str) -> Result<Option<ClusterOperator>>;

    /// Create a ClusterOperator shell for this operator
    async fn create_cluster_operator(&self, operator: &ClusterOperator) -> Result<()>;

    /// Replace a ClusterOperator status subresource
    async fn patch_cluster_operator_status(
        &self,
        name: &str,
        status: &ClusterOperatorStatus,
    ) -> Result<()>;

    /// Delete an object previously listed as related
    async fn delete_related_object(&self, reference: &ObjectReference) -> Result<()>;

    /// Fetch a DaemonSet, `None` when absent
    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<Option<DaemonSet>>;

    /// Fetch a Deployment, `None` when absent
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;
}

/// Origin of a degraded report. Lower slots win when several are set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusSource {
    /// Cluster network configuration is missing or invalid
    ClusterConfig,
    /// Operator configuration is missing or invalid
    OperatorConfig,
    /// Rendering or applying the workloads failed
    PodDeployment,
    /// A workload rollout stopped making progress
    RolloutHung,
    /// Per-node state is unhealthy
    ClusterNode,
}

const SLOT_COUNT: usize = 5;

impl StatusSource {
    fn slot(self) -> usize {
        match self {
            StatusSource::ClusterConfig => 0,
            StatusSource::OperatorConfig => 1,
            StatusSource::PodDeployment => 2,
            StatusSource::RolloutHung => 3,
            StatusSource::ClusterNode => 4,
        }
    }
}

#[derive(Clone, Debug)]
struct DegradedReport {
    reason: String,
    message: String,
}

#[derive(Default)]
struct StatusState {
    failing: [Option<DegradedReport>; SLOT_COUNT],
    // set once a pass has fully deployed; Available is never asserted
    // before that
    deployed: bool,
    daemon_sets: Vec<(String, String)>,
    deployments: Vec<(String, String)>,
    related_objects: Vec<ObjectReference>,
    // workload key -> (last observed status fingerprint, when it last changed)
    rollout_progress: std::collections::HashMap<String, (String, DateTime<Utc>)>,
}

/// Aggregates per-stage health reports and publishes them.
pub struct StatusManager {
    store: Arc<dyn StatusStore>,
    platform: Platform,
    retry: RetryConfig,
    state: Mutex<StatusState>,
}

impl StatusManager {
    /// Create a manager publishing through `store`
    pub fn new(store: Arc<dyn StatusStore>, platform: Platform) -> Self {
        Self {
            store,
            platform,
            retry: RetryConfig::default(),
            state: Mutex::new(StatusState::default()),
        }
    }

    /// Report a stage as degraded and republish the aggregate.
    pub async fn set_degraded(
        &self,
        source: StatusSource,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        let report = DegradedReport {
            reason: reason.into(),
            message: message.into(),
        };
        info!(reason = %report.reason, message = %report.message, "Operator degraded");
        {
            let mut state = self.state.lock().await;
            state.failing[source.slot()] = Some(report);
        }
        self.sync_conditions().await;
    }

    /// Clear a stage's degraded report and republish the aggregate.
    pub async fn set_not_degraded(&self, source: StatusSource) {
        {
            let mut state = self.state.lock().await;
            if state.failing[source.slot()].is_none() {
                return;
            }
            state.failing[source.slot()] = None;
        }
        self.sync_conditions().await;
    }

    /// Record that a pass fully converged the deployment. From this point
    /// on the aggregate asserts `Available`.
    pub async fn set_deployed(&self) {
        {
            let mut state = self.state.lock().await;
            if state.deployed {
                return;
            }
            state.deployed = true;
        }
        self.sync_conditions().await;
    }

    /// Record which workloads rollout health is tracked for.
    pub async fn set_workloads(
        &self,
        daemon_sets: Vec<(String, String)>,
        deployments: Vec<(String, String)>,
    ) {
        let mut state = self.state.lock().await;
        state.daemon_sets = daemon_sets;
        state.deployments = deployments;
    }

    /// Whether rollout health is tracked for the given workload.
    pub async fn tracks_workload(&self, namespace: &str, name: &str) -> bool {
        let state = self.state.lock().await;
        let key = (namespace.to_string(), name.to_string());
        state.daemon_sets.contains(&key) || state.deployments.contains(&key)
    }

    /// Replace the set of objects reported on the ClusterOperator, deleting
    /// objects that were applied by a previous pass but are no longer
    /// rendered. Namespaces never participate in this garbage collection.
    pub async fn set_related_objects(&self, objects: Vec<ObjectReference>) {
        let stale: Vec<ObjectReference> = {
            let mut state = self.state.lock().await;
            let stale = state
                .related_objects
                .iter()
                .filter(|old| old.resource != "namespaces" && !objects.contains(old))
                .cloned()
                .collect();
            state.related_objects = objects;
            stale
        };

        for reference in &stale {
            debug!(
                resource = %reference.resource,
                name = %reference.name,
                "Deleting object no longer rendered"
            );
            if let Err(e) = self.store.delete_related_object(reference).await {
                warn!(
                    resource = %reference.resource,
                    name = %reference.name,
                    error = %e,
                    "Failed to delete stale object"
                );
            }
        }
    }

    /// Probe the tracked workloads and refresh the rollout-health slots and
    /// the Progressing/Available conditions.
    pub async fn sync_rollout_health(&self) {
        let (daemon_sets, deployments) = {
            let state = self.state.lock().await;
            (state.daemon_sets.clone(), state.deployments.clone())
        };

        let mut missing: Vec<String> = Vec::new();
        let mut progressing: Vec<String> = Vec::new();
        let mut hung: Vec<String> = Vec::new();

        for (namespace, name) in &daemon_sets {
            match self.store.get_daemon_set(namespace, name).await {
                Ok(Some(ds)) => {
                    let status = ds.status.unwrap_or_default();
                    let rolling = status.updated_number_scheduled.unwrap_or(0)
                        < status.desired_number_scheduled
                        || status.number_available.unwrap_or(0) < status.desired_number_scheduled;
                    if rolling {
                        let what = format!("DaemonSet \"{namespace}/{name}\" is rolling out");
                        let fingerprint = format!(
                            "{}/{}/{}",
                            status.updated_number_scheduled.unwrap_or(0),
                            status.number_available.unwrap_or(0),
                            status.desired_number_scheduled
                        );
                        if self.note_progress(namespace, name, fingerprint).await {
                            progressing.push(what);
                        } else {
                            hung.push(what);
                        }
                    } else {
                        self.clear_progress(namespace, name).await;
                    }
                }
                Ok(None) => missing.push(format!("DaemonSet \"{namespace}/{name}\" is missing")),
                Err(e) => missing.push(format!(
                    "DaemonSet \"{namespace}/{name}\" could not be retrieved: {e}"
                )),
            }
        }

        for (namespace, name) in &deployments {
            match self.store.get_deployment(namespace, name).await {
                Ok(Some(deploy)) => {
                    let status = deploy.status.unwrap_or_default();
                    let replicas = status.replicas.unwrap_or(0);
                    let rolling = status.unavailable_replicas.unwrap_or(0) > 0
                        || status.updated_replicas.unwrap_or(0) < replicas;
                    if rolling {
                        let what = format!("Deployment \"{namespace}/{name}\" is rolling out");
                        let fingerprint = format!(
                            "{}/{}/{replicas}",
                            status.updated_replicas.unwrap_or(0),
                            status.available_replicas.unwrap_or(0)
                        );
                        if self.note_progress(namespace, name, fingerprint).await {
                            progressing.push(what);
                        } else {
                            hung.push(what);
                        }
                    } else {
                        self.clear_progress(namespace, name).await;
                    }
                }
                Ok(None) => missing.push(format!("Deployment \"{namespace}/{name}\" is missing")),
                Err(e) => missing.push(format!(
                    "Deployment \"{namespace}/{name}\" could not be retrieved: {e}"
                )),
            }
        }

        {
            let mut state = self.state.lock().await;
            state.failing[StatusSource::PodDeployment.slot()] = if missing.is_empty() {
                None
            } else {
                Some(DegradedReport {
                    reason: "NoPodsDeployed".to_string(),
                    message: missing.join("\n"),
                })
            };
            state.failing[StatusSource::RolloutHung.slot()] = if hung.is_empty() {
                None
            } else {
                Some(DegradedReport {
                    reason: "RolloutHung".to_string(),
                    message: hung.join("\n"),
                })
            };
        }

        self.publish(&progressing).await;
    }

    // Returns true while the workload status keeps changing within the hang
    // threshold.
    async fn note_progress(&self, namespace: &str, name: &str, fingerprint: String) -> bool {
        let key = format!("{namespace}/{name}");
        let now = Utc::now();
        let mut state = self.state.lock().await;
        match state.rollout_progress.get_mut(&key) {
            Some((last, since)) if *last == fingerprint => {
                (now - *since).to_std().unwrap_or_default() < ROLLOUT_HUNG_AFTER
            }
            Some(entry) => {
                *entry = (fingerprint, now);
                true
            }
            None => {
                state.rollout_progress.insert(key, (fingerprint, now));
                true
            }
        }
    }

    async fn clear_progress(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock().await;
        state.rollout_progress.remove(&format!("{namespace}/{name}"));
    }

    async fn sync_conditions(&self) {
        self.publish(&[]).await;
    }

    // Publish the aggregate to the install CR and, on platforms carrying
    // one, the ClusterOperator.
    async fn publish(&self, progressing: &[String]) {
        let (degraded, deployed, related_objects) = {
            let state = self.state.lock().await;
            (
                state.failing.iter().flatten().next().cloned(),
                state.deployed,
                state.related_objects.clone(),
            )
        };

        let mut conditions = Vec::new();
        conditions.push(match &degraded {
            Some(report) => Condition::new(
                CONDITION_DEGRADED,
                ConditionStatus::True,
                report.reason.clone(),
                report.message.clone(),
            ),
            None => Condition::new(CONDITION_DEGRADED, ConditionStatus::False, "", ""),
        });
        if progressing.is_empty() {
            conditions.push(Condition::new(
                CONDITION_PROGRESSING,
                ConditionStatus::False,
                "",
                "",
            ));
            conditions.push(if deployed {
                Condition::new(CONDITION_AVAILABLE, ConditionStatus::True, "", "")
            } else {
                Condition::new(
                    CONDITION_AVAILABLE,
                    ConditionStatus::False,
                    "Startup",
                    "The deployment has not been applied yet",
                )
            });
        } else {
            conditions.push(Condition::new(
                CONDITION_PROGRESSING,
                ConditionStatus::True,
                "Deploying",
                progressing.join("\n"),
            ));
        }
        conditions.push(Condition::new(
            CONDITION_UPGRADEABLE,
            ConditionStatus::True,
            "",
            "",
        ));

        if let Err(e) = self.push_install_conditions(&conditions).await {
            warn!(error = %e, "Failed to publish status on install CR");
        }
        if self.platform == Platform::Openshift {
            if let Err(e) = self
                .push_cluster_operator_status(&conditions, related_objects)
                .await
            {
                warn!(error = %e, "Failed to publish ClusterOperator status");
            }
        }
    }

    async fn push_install_conditions(&self, conditions: &[Condition]) -> Result<()> {
        retry_with_backoff(&self.retry, "push_install_status", || async {
            let Some(install) = self
                .store
                .get_install(OPERATOR_NAMESPACE, OPERATOR_CONFIG_NAME)
                .await?
            else {
                debug!("Install CR absent, skipping status publication");
                return Ok(());
            };

            let mut status = install.status.unwrap_or_default();
            let mut changed = false;
            for condition in conditions {
                changed |= set_condition(&mut status.conditions, condition.clone());
            }
            if !changed {
                return Ok(());
            }
            self.store
                .patch_install_status(OPERATOR_NAMESPACE, OPERATOR_CONFIG_NAME, &status)
                .await
        })
        .await
    }

    async fn push_cluster_operator_status(
        &self,
        conditions: &[Condition],
        related_objects: Vec<ObjectReference>,
    ) -> Result<()> {
        retry_with_backoff(&self.retry, "push_cluster_operator_status", || {
            let related_objects = related_objects.clone();
            async move {
                let operator = match self.store.get_cluster_operator(CLUSTER_OPERATOR_NAME).await? {
                    Some(operator) => operator,
                    None => {
                        let shell = ClusterOperator::new(CLUSTER_OPERATOR_NAME, Default::default());
                        self.store.create_cluster_operator(&shell).await?;
                        shell
                    }
                };

                let mut status = operator.status.unwrap_or_default();
                let mut changed = false;
                for condition in conditions {
                    changed |= set_condition(&mut status.conditions, condition.clone());
                }

                let versions = vec![OperandVersion {
                    name: "operator".to_string(),
                    version: RELEASE_VERSION.to_string(),
                }];
                if status.versions != versions {
                    status.versions = versions;
                    changed = true;
                }
                if status.related_objects != related_objects {
                    status.related_objects = related_objects;
                    changed = true;
                }

                if !changed {
                    return Ok(());
                }
                self.store
                    .patch_cluster_operator_status(CLUSTER_OPERATOR_NAME, &status)
                    .await
            }
        })
        .await
    }
}
