use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Agent configuration, parsed once at startup from flags and environment.
#[derive(Debug, Clone, Args)]
pub struct AgentConfig {
    /// Unique device identifier
    #[arg(long, global = true, env = "DEVICE_ID", default_value = "")]
    pub device_id: String,

    /// Device role (e.g. "audio-player", "display")
    #[arg(long, global = true, env = "DEVICE_ROLE", default_value = "unknown")]
    pub device_role: String,

    /// Git branch the device tracks
    #[arg(long, global = true, env = "DEVICE_BRANCH", default_value = "main")]
    pub device_branch: String,

    /// Deployment segment
    #[arg(long, global = true, env = "DEVICE_SEGMENT")]
    pub device_segment: Option<String>,

    /// Control-plane base URL
    #[arg(long, global = true, env = "API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// API key sent as X-API-Key
    #[arg(long, global = true, env = "API_KEY")]
    pub api_key: Option<String>,

    /// Seconds between configuration polls
    #[arg(long, global = true, env = "POLL_INTERVAL", default_value_t = 60)]
    pub poll_interval: u64,

    /// Seconds between heartbeats
    #[arg(long, global = true, env = "HEARTBEAT_INTERVAL", default_value_t = 30)]
    pub heartbeat_interval: u64,

    /// Control-plane request timeout in seconds
    #[arg(long, global = true, env = "REQUEST_TIMEOUT", default_value_t = 10)]
    pub request_timeout: u64,

    /// Container command timeout in seconds
    #[arg(long, global = true, env = "RUNTIME_TIMEOUT", default_value_t = 60)]
    pub runtime_timeout: u64,

    /// Primary workload checkout (compose project directory)
    #[arg(long, global = true, env = "REPO_PATH", default_value = "/opt/metrica-fleet")]
    pub repo_path: PathBuf,

    /// Rescue workload compose directory. Defaults to <REPO_PATH>/safe-mode
    #[arg(long, global = true, env = "SAFE_MODE_PATH")]
    pub safe_mode_path: Option<PathBuf>,

    #[arg(long, global = true, env = "DATA_DIR", default_value = "/var/lib/metrica-fleet")]
    pub data_dir: PathBuf,

    /// Persisted safe-mode record. Defaults to <DATA_DIR>/safe-mode.json
    #[arg(long, global = true, env = "SAFE_MODE_STATE_FILE")]
    pub safe_mode_state_file: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "SAFE_MODE_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub safe_mode_enabled: bool,

    /// Port the rescue status page listens on
    #[arg(long, global = true, env = "SAFE_MODE_PORT", default_value_t = 8888)]
    pub safe_mode_port: u16,

    /// Thermal sensor, millidegrees Celsius
    #[arg(
        long,
        global = true,
        env = "TEMPERATURE_PATH",
        default_value = "/sys/class/thermal/thermal_zone0/temp"
    )]
    pub temperature_path: PathBuf,

    #[arg(long, global = true, env = "LOG_FORMAT", value_enum, default_value = "json")]
    pub log_format: LogFormat,
}

impl AgentConfig {
    pub fn safe_mode_dir(&self) -> PathBuf {
        self.safe_mode_path
            .clone()
            .unwrap_or_else(|| self.repo_path.join("safe-mode"))
    }

    pub fn state_file(&self) -> PathBuf {
        self.safe_mode_state_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("safe-mode.json"))
    }

    /// Mirror of the safe-mode record served by the rescue status page.
    pub fn status_page_file(&self) -> PathBuf {
        self.safe_mode_dir().join("status-page").join("status.json")
    }

    pub fn heartbeat_every(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }

    pub fn poll_every(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    /// Device identity as it should appear in logs and on the status page.
    pub fn device_label(&self) -> Option<String> {
        (!self.device_id.is_empty()).then(|| self.device_id.clone())
    }

    /// Collect every configuration problem. `require_repo` is set by the
    /// `run` command, which needs the primary workload on disk.
    pub fn validate(&self, require_repo: bool) -> Vec<String> {
        let mut errors = Vec::new();

        if self.device_id.trim().is_empty() {
            errors.push("DEVICE_ID is required".to_string());
        }

        match url::Url::parse(&self.api_url) {
            Ok(u) if u.scheme() == "http" || u.scheme() == "https" => {}
            Ok(u) => errors.push(format!(
                "API_URL must use http or https, got scheme '{}'",
                u.scheme()
            )),
            Err(e) => errors.push(format!("API_URL is invalid: {e}")),
        }

        if self.heartbeat_interval == 0 {
            errors.push("HEARTBEAT_INTERVAL must be greater than 0".to_string());
        }
        if self.poll_interval == 0 {
            errors.push("POLL_INTERVAL must be greater than 0".to_string());
        }

        if require_repo && !self.repo_path.exists() {
            errors.push(format!(
                "REPO_PATH does not exist: {}",
                self.repo_path.display()
            ));
        }

        errors
    }
}

#[cfg(test)]
pub(crate) fn test_config(root: &std::path::Path) -> AgentConfig {
    AgentConfig {
        device_id: "pi-test-01".into(),
        device_role: "display".into(),
        device_branch: "main".into(),
        device_segment: None,
        api_url: "http://localhost:8080".into(),
        api_key: None,
        poll_interval: 60,
        heartbeat_interval: 30,
        request_timeout: 10,
        runtime_timeout: 60,
        repo_path: root.to_path_buf(),
        safe_mode_path: None,
        data_dir: root.join("data"),
        safe_mode_state_file: None,
        safe_mode_enabled: true,
        safe_mode_port: 8888,
        temperature_path: root.join("no-such-sensor"),
        log_format: LogFormat::Pretty,
    }
}
