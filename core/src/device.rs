use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Status value carried by every heartbeat. This is the only operator-visible
/// signal of the agent's mode besides the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Running,
    SafeMode,
}

/// Request to register (or re-register) a device with the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub device_id: String,
    pub hostname: String,
    /// Device role (e.g. "audio-player", "display")
    pub role: String,
    /// Git branch the device tracks
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    pub agent_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub device_id: String,
    pub status: String,
    #[serde(default)]
    pub message: String,
}

/// Periodic status + metrics report. Every metric is optional and omitted
/// from the JSON body when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub status: DeviceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_percent: Option<f64>,
    /// CPU temperature in Celsius
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub containers_running: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub containers_failed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
}

impl HeartbeatRequest {
    /// A heartbeat carrying nothing but the status.
    pub fn status_only(status: DeviceStatus) -> Self {
        Self {
            status,
            uptime_seconds: None,
            cpu_percent: None,
            memory_percent: None,
            disk_percent: None,
            temperature: None,
            containers_running: None,
            containers_failed: None,
            commit_hash: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    #[serde(default)]
    pub acknowledged: bool,
    /// Cadence hint from the control plane; informational only
    #[serde(default)]
    pub next_heartbeat_seconds: Option<u64>,
}

/// Last-observed remote configuration for this device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub branch: String,
    #[serde(default)]
    pub segment: Option<String>,
    #[serde(default)]
    pub update_enabled: bool,
    #[serde(default)]
    pub maintenance_mode: bool,
    #[serde(default)]
    pub version_lock: Option<String>,
    /// Free-form additional configuration
    #[serde(default)]
    pub config: Map<String, Value>,
}

/// One field that differs between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigChange {
    pub field: &'static str,
    pub old: Value,
    pub new: Value,
}

impl ConfigSnapshot {
    /// Field-by-field comparison against a newer snapshot. Identity fields
    /// (`device_id`, `role`) are not tracked.
    pub fn diff(&self, newer: &ConfigSnapshot) -> Vec<ConfigChange> {
        let mut changes = Vec::new();
        let mut track = |field: &'static str, old: Value, new: Value| {
            if old != new {
                changes.push(ConfigChange { field, old, new });
            }
        };

        track("branch", self.branch.clone().into(), newer.branch.clone().into());
        track("segment", self.segment.clone().into(), newer.segment.clone().into());
        track(
            "update_enabled",
            self.update_enabled.into(),
            newer.update_enabled.into(),
        );
        track(
            "maintenance_mode",
            self.maintenance_mode.into(),
            newer.maintenance_mode.into(),
        );
        track(
            "version_lock",
            self.version_lock.clone().into(),
            newer.version_lock.clone().into(),
        );
        track(
            "config",
            Value::Object(self.config.clone()),
            Value::Object(newer.config.clone()),
        );

        changes
    }
}

/// Outcome of a workload deployment on this device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Success,
    Failed,
    RolledBack,
}

impl std::str::FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "rolled_back" => Ok(Self::RolledBack),
            other => Err(format!(
                "unknown deployment status '{other}' (expected pending, success, failed, rolled_back)"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentReport {
    pub commit_hash: String,
    pub status: DeploymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy_metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentAck {
    pub deployment_id: String,
    pub status: String,
}
