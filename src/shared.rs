//! Rendered workload-spec cache shared across controllers
//!
//! The install controller deposits the last rendered agent DaemonSet and
//! controller Deployment here; the workload controller reads them back to
//! recreate a workload somebody deleted out from under the operator.

use std::sync::Arc;

use kube::core::DynamicObject;
use tokio::sync::Mutex;
use tracing::info;

use crate::controller::InstallStore;
use crate::{Result, AGENT_DAEMON_SET_NAME, ANTREA_NAMESPACE, CONTROLLER_DEPLOYMENT_NAME};

/// The two workloads the operator deploys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Workload {
    /// The antrea-agent DaemonSet
    Agent,
    /// The antrea-controller Deployment
    Controller,
}

impl Workload {
    /// The workload's well-known name
    pub fn name(self) -> &'static str {
        match self {
            Workload::Agent => AGENT_DAEMON_SET_NAME,
            Workload::Controller => CONTROLLER_DEPLOYMENT_NAME,
        }
    }
}

#[derive(Default)]
struct CachedSpecs {
    agent_daemon_set: Option<DynamicObject>,
    controller_deployment: Option<DynamicObject>,
}

/// Cache of the last successfully rendered workload specs.
#[derive(Default)]
pub struct SharedInfo {
    specs: Mutex<CachedSpecs>,
}

impl SharedInfo {
    /// Create an empty cache
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replace both cached specs after a successful render.
    pub async fn set_workload_specs(&self, agent: DynamicObject, controller: DynamicObject) {
        let mut specs = self.specs.lock().await;
        specs.agent_daemon_set = Some(agent);
        specs.controller_deployment = Some(controller);
    }

    /// Cached spec for one workload, if a render has happened yet.
    pub async fn workload_spec(&self, workload: Workload) -> Option<DynamicObject> {
        let specs = self.specs.lock().await;
        match workload {
            Workload::Agent => specs.agent_daemon_set.clone(),
            Workload::Controller => specs.controller_deployment.clone(),
        }
    }

    /// Re-apply the cached spec when the live workload has disappeared.
    ///
    /// The cache lock is held across the liveness check and the apply so a
    /// concurrent render cannot slip a newer spec in between and have it
    /// overwritten by the stale one.
    ///
    /// Returns `true` when a recreate was performed.
    pub async fn recreate_if_missing(
        &self,
        store: &dyn InstallStore,
        workload: Workload,
    ) -> Result<bool> {
        let specs = self.specs.lock().await;
        let cached = match workload {
            Workload::Agent => specs.agent_daemon_set.as_ref(),
            Workload::Controller => specs.controller_deployment.as_ref(),
        };
        let Some(cached) = cached else {
            return Ok(false);
        };

        let exists = match workload {
            Workload::Agent => store
                .get_daemon_set(ANTREA_NAMESPACE, workload.name())
                .await?
                .is_some(),
            Workload::Controller => store
                .get_deployment(ANTREA_NAMESPACE, workload.name())
                .await?
                .is_some(),
        };
        if exists {
            return Ok(false);
        }

        info!(workload = workload.name(), "Recreating deleted workload");
        store.apply(cached).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::MockInstallStore;

    fn agent_spec() -> DynamicObject {
        serde_yaml::from_str(
            "apiVersion: apps/v1\nkind: DaemonSet\nmetadata:\n  name: antrea-agent\n  namespace: kube-system\n",
        )
        .unwrap()
    }

    fn controller_spec() -> DynamicObject {
        serde_yaml::from_str(
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: antrea-controller\n  namespace: kube-system\n",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_nothing_to_recreate_before_first_render() {
        let shared = SharedInfo::new();
        let store = MockInstallStore::new();
        let recreated = shared
            .recreate_if_missing(&store, Workload::Agent)
            .await
            .unwrap();
        assert!(!recreated);
    }

    #[tokio::test]
    async fn test_live_workload_is_left_alone() {
        let shared = SharedInfo::new();
        shared
            .set_workload_specs(agent_spec(), controller_spec())
            .await;

        let mut store = MockInstallStore::new();
        store.expect_get_daemon_set().returning(|_, _| {
            Ok(Some(k8s_openapi::api::apps::v1::DaemonSet::default()))
        });
        store.expect_apply().times(0);

        let recreated = shared
            .recreate_if_missing(&store, Workload::Agent)
            .await
            .unwrap();
        assert!(!recreated);
    }

    #[tokio::test]
    async fn test_missing_workload_is_reapplied_from_cache() {
        let shared = SharedInfo::new();
        shared
            .set_workload_specs(agent_spec(), controller_spec())
            .await;

        let mut store = MockInstallStore::new();
        store.expect_get_deployment().returning(|_, _| Ok(None));
        store
            .expect_apply()
            .times(1)
            .withf(|object| object.metadata.name.as_deref() == Some("antrea-controller"))
            .returning(|_| Ok(()));

        let recreated = shared
            .recreate_if_missing(&store, Workload::Controller)
            .await
            .unwrap();
        assert!(recreated);
    }
}
