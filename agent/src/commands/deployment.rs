use fleet_agent::client::{ControlPlane, HttpControlPlane};
use fleet_agent::config::AgentConfig;
use fleet_core::device::{DeploymentReport, DeploymentStatus};

use crate::util::{exit_error, parse_json_object, print_json, report_error};

pub async fn report(
    config: &AgentConfig,
    commit_hash: &str,
    status: DeploymentStatus,
    error: Option<&str>,
    metadata: Option<&str>,
) -> i32 {
    if config.device_id.trim().is_empty() {
        exit_error("DEVICE_ID is required to report a deployment", Some("Set --device-id or DEVICE_ID env var"));
    }

    let deploy_metadata = metadata
        .map(|raw| parse_json_object("--metadata", raw))
        .transpose()
        .unwrap_or_else(|e| exit_error(&e, None));

    let client = match HttpControlPlane::from_config(config) {
        Ok(c) => c,
        Err(e) => return report_error(&e),
    };

    let report = DeploymentReport {
        commit_hash: commit_hash.to_string(),
        status,
        error: error.map(str::to_string),
        deploy_metadata,
    };

    let result = client.report_deployment(&report).await;
    client.close();
    match result {
        Ok(ack) => {
            print_json(&ack);
            0
        }
        Err(e) => report_error(&e),
    }
}
