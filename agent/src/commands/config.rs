use fleet_agent::config::AgentConfig;
use serde_json::json;

use crate::util::print_json;

pub fn check(config: &AgentConfig) -> i32 {
    let problems = config.validate(true);

    print_json(&json!({
        "valid": problems.is_empty(),
        "problems": problems,
        "config": {
            "device_id": config.device_id,
            "device_role": config.device_role,
            "device_branch": config.device_branch,
            "device_segment": config.device_segment,
            "api_url": config.api_url,
            "api_key": config.api_key.as_ref().map(|_| "********"),
            "poll_interval": config.poll_interval,
            "heartbeat_interval": config.heartbeat_interval,
            "request_timeout": config.request_timeout,
            "runtime_timeout": config.runtime_timeout,
            "repo_path": config.repo_path,
            "safe_mode_path": config.safe_mode_dir(),
            "safe_mode_state_file": config.state_file(),
            "safe_mode_enabled": config.safe_mode_enabled,
            "safe_mode_port": config.safe_mode_port,
        },
    }));

    if problems.is_empty() { 0 } else { 1 }
}
