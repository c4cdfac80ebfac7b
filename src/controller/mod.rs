//! Kubernetes controllers
//!
//! Two reconcilers share one state: the install controller converges the
//! cluster on the configuration in the `AntreaInstall` CR, and the
//! workload controller watches the deployed DaemonSet/Deployment and
//! recreates them from the cached rendered specs when they disappear.
//!
//! All Kubernetes access goes through the [`InstallStore`] trait so the
//! reconciliation logic is testable without a live API server.

mod install;
mod pod;

pub use install::{error_policy, reconcile, Context};
pub use pod::{
    daemon_set_error_policy, deployment_error_policy, reconcile_daemon_set, reconcile_deployment,
    WorkloadContext, WORKLOAD_RESYNC,
};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::{ApiResource, DynamicObject};
use kube::Client;
#[cfg(test)]
use mockall::automock;

use crate::crd::{
    AntreaInstall, AntreaInstallStatus, ClusterNetwork, ClusterOperator, ClusterOperatorStatus,
    NetworkStatus, ObjectReference, OperatorNetwork,
};
use crate::status::StatusStore;
use crate::{Error, Result};

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "antrea-operator";

/// Label selecting the pods of one Antrea component
fn component_selector(component: &str) -> String {
    format!("app=antrea,component={component}")
}

/// Plural resource name for the kinds appearing in the Antrea manifests.
pub(crate) fn plural_of(kind: &str) -> String {
    match kind {
        "APIService" => "apiservices".to_string(),
        "ClusterRole" => "clusterroles".to_string(),
        "ClusterRoleBinding" => "clusterrolebindings".to_string(),
        "CustomResourceDefinition" => "customresourcedefinitions".to_string(),
        "MutatingWebhookConfiguration" => "mutatingwebhookconfigurations".to_string(),
        "NetworkPolicy" => "networkpolicies".to_string(),
        "ValidatingWebhookConfiguration" => "validatingwebhookconfigurations".to_string(),
        _ => format!("{}s", kind.to_ascii_lowercase()),
    }
}

// Served version per API group. Deletes by (group, resource, name)
// reference need this; every group in the rendered manifests serves v1.
fn version_of(_group: &str) -> &'static str {
    "v1"
}

/// Observability reference for a rendered object.
pub(crate) fn object_reference(object: &DynamicObject) -> ObjectReference {
    let (group, kind) = match &object.types {
        Some(types) => (
            types
                .api_version
                .split_once('/')
                .map(|(g, _)| g.to_string())
                .unwrap_or_default(),
            types.kind.clone(),
        ),
        None => (String::new(), String::new()),
    };
    ObjectReference {
        group,
        resource: plural_of(&kind),
        namespace: object.metadata.namespace.clone().unwrap_or_default(),
        name: object.metadata.name.clone().unwrap_or_default(),
    }
}

/// Kubernetes access needed by the reconcilers.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InstallStore: Send + Sync {
    /// Fetch the install CR, `None` when absent
    async fn get_install(&self, namespace: &str, name: &str) -> Result<Option<AntreaInstall>>;

    /// Fetch the cluster network configuration object, `None` when absent
    async fn get_cluster_network(&self, name: &str) -> Result<Option<ClusterNetwork>>;

    /// Fetch the operator network configuration object, `None` when absent
    async fn get_operator_network(&self, name: &str) -> Result<Option<OperatorNetwork>>;

    /// Fetch a ConfigMap, `None` when absent
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;

    /// Fetch a DaemonSet, `None` when absent
    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<Option<DaemonSet>>;

    /// Fetch a Deployment, `None` when absent
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    /// Server-side apply one rendered object
    async fn apply(&self, object: &DynamicObject) -> Result<()>;

    /// Delete all pods of one Antrea component
    async fn delete_pods_with_label(&self, namespace: &str, component: &str) -> Result<()>;

    /// Replace the status of the cluster network configuration object
    async fn update_network_status(&self, name: &str, status: &NetworkStatus) -> Result<()>;
}

/// [`InstallStore`] and [`StatusStore`] backed by a live cluster.
#[derive(Clone)]
pub struct KubeInstallStore {
    client: Client,
}

impl KubeInstallStore {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic_api(&self, object: &DynamicObject) -> Result<Api<DynamicObject>> {
        let types = object
            .types
            .as_ref()
            .ok_or_else(|| Error::apply("rendered object is missing apiVersion/kind"))?;
        let (group, version) = match types.api_version.split_once('/') {
            Some((group, version)) => (group.to_string(), version.to_string()),
            None => (String::new(), types.api_version.clone()),
        };
        let resource = ApiResource {
            api_version: types.api_version.clone(),
            group,
            version,
            kind: types.kind.clone(),
            plural: plural_of(&types.kind),
        };
        Ok(match &object.metadata.namespace {
            Some(namespace) => Api::namespaced_with(self.client.clone(), namespace, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        })
    }
}

#[async_trait]
impl InstallStore for KubeInstallStore {
    async fn get_install(&self, namespace: &str, name: &str) -> Result<Option<AntreaInstall>> {
        let api: Api<AntreaInstall> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_cluster_network(&self, name: &str) -> Result<Option<ClusterNetwork>> {
        let api: Api<ClusterNetwork> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn get_operator_network(&self, name: &str) -> Result<Option<OperatorNetwork>> {
        let api: Api<OperatorNetwork> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<Option<DaemonSet>> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn apply(&self, object: &DynamicObject) -> Result<()> {
        let api = self.dynamic_api(object)?;
        let name = object
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::apply("rendered object is missing a name"))?;
        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(name, &params, &Patch::Apply(object)).await?;
        Ok(())
    }

    async fn delete_pods_with_label(&self, namespace: &str, component: &str) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let selector = ListParams::default().labels(&component_selector(component));
        api.delete_collection(&DeleteParams::background().grace_period(0), &selector)
            .await?;
        Ok(())
    }

    async fn update_network_status(&self, name: &str, status: &NetworkStatus) -> Result<()> {
        let api: Api<ClusterNetwork> = Api::all(self.client.clone());
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StatusStore for KubeInstallStore {
    async fn get_install(&self, namespace: &str, name: &str) -> Result<Option<AntreaInstall>> {
        InstallStore::get_install(self, namespace, name).await
    }

    async fn patch_install_status(
        &self,
        namespace: &str,
        name: &str,
        status: &AntreaInstallStatus,
    ) -> Result<()> {
        let api: Api<AntreaInstall> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_cluster_operator(&self, name: &str) -> Result<Option<ClusterOperator>> {
        let api: Api<ClusterOperator> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn create_cluster_operator(&self, operator: &ClusterOperator) -> Result<()> {
        let api: Api<ClusterOperator> = Api::all(self.client.clone());
        api.create(&PostParams::default(), operator).await?;
        Ok(())
    }

    async fn patch_cluster_operator_status(
        &self,
        name: &str,
        status: &ClusterOperatorStatus,
    ) -> Result<()> {
        let api: Api<ClusterOperator> = Api::all(self.client.clone());
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn delete_related_object(&self, reference: &ObjectReference) -> Result<()> {
        let version = version_of(&reference.group);
        let api_version = if reference.group.is_empty() {
            version.to_string()
        } else {
            format!("{}/{version}", reference.group)
        };
        let resource = ApiResource {
            api_version,
            group: reference.group.clone(),
            version: version.to_string(),
            kind: String::new(),
            plural: reference.resource.clone(),
        };
        let api: Api<DynamicObject> = if reference.namespace.is_empty() {
            Api::all_with(self.client.clone(), &resource)
        } else {
            Api::namespaced_with(self.client.clone(), &reference.namespace, &resource)
        };
        match api.delete(&reference.name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<Option<DaemonSet>> {
        InstallStore::get_daemon_set(self, namespace, name).await
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        InstallStore::get_deployment(self, namespace, name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plural_of_irregular_kinds() {
        assert_eq!(plural_of("NetworkPolicy"), "networkpolicies");
        assert_eq!(plural_of("ClusterRoleBinding"), "clusterrolebindings");
        assert_eq!(plural_of("DaemonSet"), "daemonsets");
        assert_eq!(plural_of("ConfigMap"), "configmaps");
    }

    #[test]
    fn test_object_reference_from_rendered_object() {
        let object: DynamicObject = serde_yaml::from_str(
            "apiVersion: apps/v1\nkind: DaemonSet\nmetadata:\n  name: antrea-agent\n  namespace: kube-system\n",
        )
        .unwrap();
        let reference = object_reference(&object);
        assert_eq!(reference.group, "apps");
        assert_eq!(reference.resource, "daemonsets");
        assert_eq!(reference.namespace, "kube-system");
        assert_eq!(reference.name, "antrea-agent");

        let cluster_scoped: DynamicObject = serde_yaml::from_str(
            "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: kube-system\n",
        )
        .unwrap();
        let reference = object_reference(&cluster_scoped);
        assert_eq!(reference.group, "");
        assert_eq!(reference.resource, "namespaces");
        assert_eq!(reference.namespace, "");
    }
}
