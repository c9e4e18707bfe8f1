use serde::Serialize;

/// Every failure a collaborator can hand back to the controller.
///
/// The set is closed on purpose: the controller decides between retry,
/// escalate and ignore by matching on [`AgentError::kind`], so a new
/// variant must be placed in exactly one of those buckets.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AgentError {
    /// Transport failure or timeout talking to the control plane
    #[error("network error: {0}")]
    Network(String),
    /// Credential rejected by the control plane (401/403)
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Any other non-2xx outcome, or an undecodable success body
    #[error("api error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Api { status: Option<u16>, message: String },
    /// The control plane does not know this device
    #[error("device {device_id} not found - needs registration")]
    NotRegistered { device_id: String },
    /// External container command failed, timed out or could not be spawned
    #[error("container runtime error: {0}")]
    Runtime(String),
    /// Persisted safe-mode record exists but cannot be read or parsed
    #[error("safe-mode state corrupted: {0}")]
    StateCorruption(String),
    /// Local disk write failed
    #[error("storage error: {0}")]
    Storage(String),
}

/// Coarse category used for retry decisions and the `category` log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Auth,
    Api,
    Runtime,
    StateCorruption,
    Storage,
}

/// Stable category codes, as they appear in logs and CLI output
pub mod codes {
    pub const NETWORK_ERROR: &str = "network_error";
    pub const AUTH_ERROR: &str = "auth_error";
    pub const API_ERROR: &str = "api_error";
    pub const RUNTIME_ERROR: &str = "runtime_error";
    pub const STATE_CORRUPTION: &str = "state_corruption";
    pub const STORAGE_ERROR: &str = "storage_error";
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Network => codes::NETWORK_ERROR,
            ErrorKind::Auth => codes::AUTH_ERROR,
            ErrorKind::Api => codes::API_ERROR,
            ErrorKind::Runtime => codes::RUNTIME_ERROR,
            ErrorKind::StateCorruption => codes::STATE_CORRUPTION,
            ErrorKind::Storage => codes::STORAGE_ERROR,
        }
    }

    /// Failures that originate on the control-plane path. The main loop
    /// tolerates these; anything else reaching it is a fault.
    pub fn is_control_plane(self) -> bool {
        matches!(self, ErrorKind::Network | ErrorKind::Auth | ErrorKind::Api)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Network(_) => ErrorKind::Network,
            AgentError::Auth(_) => ErrorKind::Auth,
            AgentError::Api { .. } | AgentError::NotRegistered { .. } => ErrorKind::Api,
            AgentError::Runtime(_) => ErrorKind::Runtime,
            AgentError::StateCorruption(_) => ErrorKind::StateCorruption,
            AgentError::Storage(_) => ErrorKind::Storage,
        }
    }

    pub fn api(status: Option<u16>, message: impl Into<String>) -> Self {
        AgentError::Api {
            status,
            message: message.into(),
        }
    }

    /// Error detail in the shape stored on a safe-mode record.
    pub fn to_details(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut details = serde_json::Map::new();
        details.insert("category".into(), self.kind().code().into());
        details.insert("error".into(), self.to_string().into());
        details
    }
}
