use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Crash-survivable record of a safe-mode activation.
///
/// Written whole on activation, removed on a clean deactivation. The same
/// bytes are mirrored to the rescue workload's status page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafeModeRecord {
    pub active: bool,
    pub reason: String,
    pub activated_at: DateTime<Utc>,
    #[serde(default)]
    pub error_details: Map<String, Value>,
    /// Shown on the rescue status page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl SafeModeRecord {
    pub fn new(reason: &str, error_details: Map<String, Value>, device_id: Option<String>) -> Self {
        Self {
            active: true,
            reason: reason.to_string(),
            activated_at: Utc::now(),
            error_details,
            device_id,
        }
    }
}

/// Safe-mode status as reported to operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafeModeStatus {
    pub active: bool,
    pub reason: Option<String>,
    pub activated_at: Option<DateTime<Utc>>,
    pub error_details: Option<Map<String, Value>>,
}

pub const CORRUPTED_STATE_REASON: &str = "Unknown (state file corrupted)";

impl SafeModeStatus {
    pub fn inactive() -> Self {
        Self {
            active: false,
            reason: None,
            activated_at: None,
            error_details: None,
        }
    }

    /// Active, but the detail record could not be read.
    pub fn corrupted(error: &str) -> Self {
        let mut details = Map::new();
        details.insert("error".into(), error.into());
        Self {
            active: true,
            reason: Some(CORRUPTED_STATE_REASON.to_string()),
            activated_at: None,
            error_details: Some(details),
        }
    }
}

impl From<SafeModeRecord> for SafeModeStatus {
    fn from(record: SafeModeRecord) -> Self {
        Self {
            active: true,
            reason: Some(record.reason),
            activated_at: Some(record.activated_at),
            error_details: Some(record.error_details),
        }
    }
}
