use fleet_agent::config::AgentConfig;
use fleet_agent::runtime::ComposeRuntime;
use fleet_agent::safe_mode::SafeModeManager;
use serde_json::json;

use crate::util::print_json;

pub async fn run(config: &AgentConfig) -> i32 {
    let manager = SafeModeManager::from_config(config, ComposeRuntime::from_config(config));
    let status = manager.get_status().await;

    print_json(&json!({
        "device_id": config.device_label(),
        "checked_at": chrono::Utc::now(),
        "safe_mode_enabled": config.safe_mode_enabled,
        "state_file": manager.state_file(),
        "safe_mode": status,
    }));
    0
}
