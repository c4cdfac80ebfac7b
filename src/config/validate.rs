//! Configuration validator: checks the filled configuration for
//! completeness and consistency against live cluster network facts.

use serde_yaml::Value;

use crate::crd::{AntreaInstallSpec, NetworkSpec};
use crate::{Error, Result};

use super::{parse_config_mapping, SERVICE_CIDR_OPTION};

/// Validate a configuration previously filled by [`super::fill_configs`].
///
/// Violations are collected rather than failing fast; the returned error
/// aggregates every problem found in this pass.
pub fn validate_config(
    cluster: Option<&NetworkSpec>,
    config: &AntreaInstallSpec,
) -> Result<()> {
    let mut errs: Vec<String> = Vec::new();

    if config.antrea_image.is_empty() {
        errs.push("antreaImage option can not be empty".to_string());
    }

    let agent = match parse_config_mapping(&config.antrea_agent_config, "AntreaAgentConfig") {
        Ok(agent) => agent,
        Err(e) => {
            // Without a parseable agent config the remaining checks cannot
            // run; report what we have so far.
            errs.push(e.to_string());
            return Err(Error::validation_errors(errs));
        }
    };

    match cluster {
        None => {
            if !agent.contains_key(SERVICE_CIDR_OPTION) {
                errs.push("serviceCIDR option can not be empty".to_string());
            }
        }
        Some(cluster) => match agent.get(SERVICE_CIDR_OPTION).and_then(Value::as_str) {
            None => errs.push("serviceCIDR option can not be empty".to_string()),
            Some(cidr) if !cluster.service_network.iter().any(|c| c == cidr) => {
                errs.push(format!(
                    "invalid serviceCIDR option: {cidr}, available values are: {:?}",
                    cluster.service_network
                ));
            }
            Some(_) => {}
        },
    }

    if errs.is_empty() {
        Ok(())
    } else {
        Err(Error::validation_errors(errs))
    }
}
