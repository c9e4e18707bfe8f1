use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use fleet_agent::client::HttpControlPlane;
use fleet_agent::config::AgentConfig;
use fleet_agent::controller::Controller;
use fleet_agent::metrics::HostMetrics;
use fleet_agent::runtime::ComposeRuntime;
use fleet_agent::safe_mode::SafeModeManager;
use fleet_agent::shutdown;

use crate::util::{exit_error, report_error};

pub async fn run(config: AgentConfig) -> i32 {
    let problems = config.validate(true);
    if !problems.is_empty() {
        exit_error(
            &format!("invalid configuration: {}", problems.join("; ")),
            Some("Run `fleet-agent check-config` to list every problem."),
        );
    }

    let client = match HttpControlPlane::from_config(&config) {
        Ok(c) => c,
        Err(e) => return report_error(&e),
    };
    let metrics = HostMetrics::from_config(&config);
    let safe_mode = SafeModeManager::from_config(&config, ComposeRuntime::from_config(&config));

    let stop = Arc::new(AtomicBool::new(false));
    shutdown::install(Arc::clone(&stop));

    let mut controller = Controller::new(config, client, metrics, safe_mode, stop);
    controller.run().await;
    0
}
