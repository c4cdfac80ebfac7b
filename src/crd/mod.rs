//! Custom Resource Definitions consumed and produced by the operator
//!
//! `AntreaInstall` is owned by this operator; the cluster `Network`,
//! the operator `Network` and `ClusterOperator` types mirror the
//! OpenShift-style cluster configuration objects the operator reads and
//! reports status into on platforms that expose them.

mod clusteroperator;
mod install;
mod network;
mod opnetwork;
mod types;

pub use clusteroperator::{
    ClusterOperator, ClusterOperatorSpec, ClusterOperatorStatus, ObjectReference, OperandVersion,
};
pub use install::{AntreaInstall, AntreaInstallSpec, AntreaInstallStatus};
pub use network::{ClusterNetworkEntry, Network as ClusterNetwork, NetworkSpec, NetworkStatus};
pub use opnetwork::{Network as OperatorNetwork, NetworkSpec as OperatorNetworkSpec};
pub use types::{
    set_condition, Condition, ConditionStatus, Platform, PlatformCapabilities, CONDITION_AVAILABLE,
    CONDITION_DEGRADED, CONDITION_PROGRESSING, CONDITION_UPGRADEABLE,
};
