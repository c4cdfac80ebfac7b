//! Configuration merge, validation and change detection
//!
//! This is the decision core of the operator. Given the install CR and the
//! live cluster network facts it fills in defaults ([`fill_configs`]),
//! cross-validates the result ([`validate_config`]), decides which
//! deployed workloads a new pass must recreate ([`detect_change`]) and
//! assembles the flat key/value mapping the manifest templates bind to
//! ([`build_render_data`]).
//!
//! The agent and controller configuration fields of the install CR are
//! opaque YAML mappings; this module is the only place that looks inside
//! them.

mod change;
mod fill;
mod network_status;
mod render_data;
mod validate;

pub use change::{
    detect_change, has_cluster_network_change, has_default_mtu_change, ChangeSet,
};
pub use fill::fill_configs;
pub use network_status::build_network_status;
pub use render_data::{build_render_data, RenderData};
pub use validate::validate_config;

use serde_yaml::{Mapping, Value};

use crate::{Error, Result};

/// Agent config option carrying the cluster service CIDR
pub const SERVICE_CIDR_OPTION: &str = "serviceCIDR";

/// Agent config option carrying the default interface MTU
pub const DEFAULT_MTU_OPTION: &str = "defaultMTU";

/// Parse an opaque configuration blob into a YAML mapping.
///
/// An empty or null blob parses to an empty mapping; any other non-mapping
/// document is rejected.
pub(crate) fn parse_config_mapping(blob: &str, what: &str) -> Result<Mapping> {
    if blob.trim().is_empty() {
        return Ok(Mapping::new());
    }
    let value: Value = serde_yaml::from_str(blob)
        .map_err(|e| Error::parse(format!("failed to parse {what}: {e}")))?;
    match value {
        Value::Mapping(m) => Ok(m),
        Value::Null => Ok(Mapping::new()),
        _ => Err(Error::parse(format!(
            "failed to parse {what}: expected a mapping of options"
        ))),
    }
}
