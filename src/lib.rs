//! Antrea operator - installs and keeps in sync an Antrea CNI deployment
//!
//! The operator watches an `AntreaInstall` custom resource describing the
//! desired Antrea configuration together with the cluster-wide network
//! configuration object, and converges the cluster on that desired state:
//! it merges defaults into the user-supplied configuration, validates the
//! result against live cluster network parameters, renders the Antrea
//! manifests from templates, applies them, and reports health through
//! standard cluster-operator status conventions.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (AntreaInstall, cluster Network)
//! - [`config`] - Configuration merge, validation and change detection
//! - [`render`] - Manifest template rendering
//! - [`controller`] - Kubernetes controller reconciliation logic
//! - [`status`] - Degraded status aggregation and reporting
//! - [`shared`] - Rendered workload-spec cache shared across controllers
//! - [`retry`] - Bounded retry with exponential backoff
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod render;
pub mod retry;
pub mod shared;
pub mod status;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================
// These constants define the stable names and defaults used throughout the
// operator. Centralizing them here keeps the CRD defaults, the render data
// contract, and test fixtures consistent.

/// Namespace the operator and its CRs live in
pub const OPERATOR_NAMESPACE: &str = "antrea-operator";

/// Name of the AntreaInstall custom resource instance
pub const OPERATOR_CONFIG_NAME: &str = "antrea-install";

/// Name of the cluster-wide Network custom resource instance
pub const CLUSTER_CONFIG_NAME: &str = "cluster";

/// Name of the Network.operator.openshift.io instance
pub const OPERATOR_NETWORK_NAME: &str = "cluster";

/// Name reported on the ClusterOperator status object
pub const CLUSTER_OPERATOR_NAME: &str = "antrea";

/// Namespace the Antrea operands are deployed into
pub const ANTREA_NAMESPACE: &str = "kube-system";

/// Name of the antrea-agent DaemonSet
pub const AGENT_DAEMON_SET_NAME: &str = "antrea-agent";

/// Name of the antrea-controller Deployment
pub const CONTROLLER_DEPLOYMENT_NAME: &str = "antrea-controller";

/// Name of the ConfigMap carrying the rendered Antrea configuration
pub const ANTREA_CONFIG_MAP_NAME: &str = "antrea-config";

/// Container image used when the install CR does not specify one
pub const DEFAULT_ANTREA_IMAGE: &str = "antrea/antrea-ubuntu:v0.9.1";

/// Directory containing the Antrea manifest templates
pub const DEFAULT_MANIFEST_DIR: &str = "antrea-manifest";

/// MTU applied to the agent configuration when none is given
pub const DEFAULT_MTU: i64 = 1450;

/// Operator version reported in the ClusterOperator status
pub const RELEASE_VERSION: &str = env!("CARGO_PKG_VERSION");
