use fleet_agent::config::AgentConfig;
use fleet_agent::runtime::ComposeRuntime;
use fleet_agent::safe_mode::SafeModeManager;
use serde_json::json;

use crate::util::{exit_error, parse_json_object, print_json, report_error};

fn manager(config: &AgentConfig) -> SafeModeManager<ComposeRuntime> {
    SafeModeManager::from_config(config, ComposeRuntime::from_config(config))
}

pub async fn activate(config: &AgentConfig, reason: &str, details: Option<&str>) -> i32 {
    let mut details = match details {
        Some(raw) => parse_json_object("--details", raw).unwrap_or_else(|e| exit_error(&e, None)),
        None => serde_json::Map::new(),
    };
    details.insert("source".into(), json!("operator"));

    let manager = manager(config);
    if let Err(e) = manager.activate(reason, details).await {
        return report_error(&e);
    }

    print_json(&json!({
        "activated": true,
        "reason": reason,
        "state_file": manager.state_file(),
        "status_page_port": config.safe_mode_port,
    }));
    0
}

pub async fn deactivate(config: &AgentConfig) -> i32 {
    let manager = manager(config);
    if let Err(e) = manager.deactivate().await {
        return report_error(&e);
    }

    print_json(&json!({
        "deactivated": true,
        "next_step": "restart the agent to resume normal operation",
    }));
    0
}
