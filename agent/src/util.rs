use fleet_core::{AgentError, ErrorKind};
use serde::Serialize;
use serde_json::json;

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!("{}", to_pretty(&err));
    std::process::exit(1);
}

pub fn print_json<T: Serialize>(value: &T) {
    println!("{}", to_pretty(value));
}

fn to_pretty<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
}

/// Print an agent error as structured JSON on stderr and return the exit code.
///
/// 1 = rejected by the control plane (4xx, auth), 2 = server or local
/// failure, 3 = control plane unreachable.
pub fn report_error(err: &AgentError) -> i32 {
    let kind = err.kind();
    let mut body = json!({
        "error": kind.code(),
        "message": err.to_string(),
    });
    if let Some(hint) = docs_hint(err) {
        body["docs_hint"] = json!(hint);
    }
    eprintln!("{}", to_pretty(&body));

    match err {
        AgentError::Api {
            status: Some(status),
            ..
        } if (400..500).contains(status) => 1,
        AgentError::NotRegistered { .. } => 1,
        _ => match kind {
            ErrorKind::Network => 3,
            ErrorKind::Auth => 1,
            _ => 2,
        },
    }
}

fn docs_hint(err: &AgentError) -> Option<&'static str> {
    match err.kind() {
        ErrorKind::Network => Some("Is the control plane reachable? Check API_URL."),
        ErrorKind::Auth => Some("Check API_KEY."),
        ErrorKind::Runtime => Some("Is the Docker daemon running? Check `docker compose` in SAFE_MODE_PATH."),
        ErrorKind::Storage => Some("Check that DATA_DIR and SAFE_MODE_PATH are writable."),
        _ if matches!(err, AgentError::NotRegistered { .. }) => {
            Some("Start the agent once with `fleet-agent run` so the device registers.")
        }
        _ => None,
    }
}

/// Parse a `--details`/`--metadata` flag that must hold a JSON object.
pub fn parse_json_object(
    flag: &str,
    raw: &str,
) -> Result<serde_json::Map<String, serde_json::Value>, String> {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err(format!("{flag} must be a JSON object")),
        Err(e) => Err(format!("Invalid JSON in {flag}: {e}")),
    }
}
