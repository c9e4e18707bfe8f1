use std::time::Duration;

use fleet_core::device::{
    ConfigSnapshot, DeploymentAck, DeploymentReport, HeartbeatRequest, HeartbeatResponse,
    RegisterRequest, RegisterResponse,
};
use fleet_core::AgentError;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::config::AgentConfig;

pub const USER_AGENT: &str = concat!("Metrica-Fleet-Agent/", env!("CARGO_PKG_VERSION"));

/// The four logical operations the agent performs against the control plane.
#[allow(async_fn_in_trait)]
pub trait ControlPlane {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, AgentError>;

    async fn send_heartbeat(
        &self,
        heartbeat: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, AgentError>;

    async fn get_configuration(&self) -> Result<ConfigSnapshot, AgentError>;

    async fn report_deployment(
        &self,
        report: &DeploymentReport,
    ) -> Result<DeploymentAck, AgentError>;

    /// Release the session. Called once when the agent shuts down.
    fn close(&self) {}
}

/// Control-plane client over HTTP/JSON.
pub struct HttpControlPlane {
    http: reqwest::Client,
    api_url: String,
    device_id: String,
}

impl HttpControlPlane {
    pub fn new(
        api_url: &str,
        device_id: &str,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, AgentError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(key)
                .map_err(|e| AgentError::Auth(format!("API key is not a valid header value: {e}")))?;
            headers.insert("X-API-Key", value);
        }

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Network(format!("failed to build HTTP client: {e}")))?;

        tracing::debug!(device_id, "control-plane client initialized");

        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            device_id: device_id.to_string(),
        })
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self, AgentError> {
        Self::new(
            &config.api_url,
            &config.device_id,
            config.api_key.as_deref(),
            Duration::from_secs(config.request_timeout),
        )
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn device_url(&self, suffix: &str) -> String {
        format!("{}/api/devices/{}/{suffix}", self.api_url, self.device_id)
    }

    /// Send a request and map the outcome onto the error taxonomy.
    /// `device_scoped` turns a 404 into `NotRegistered`.
    async fn execute<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
        device_scoped: bool,
    ) -> Result<T, AgentError> {
        let resp = req.send().await.map_err(transport_error)?;
        let status = resp.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(AgentError::Auth("Invalid API key or unauthorized".into()));
        }
        if status == StatusCode::FORBIDDEN {
            return Err(AgentError::Auth("Forbidden - check API permissions".into()));
        }
        if device_scoped && status == StatusCode::NOT_FOUND {
            return Err(AgentError::NotRegistered {
                device_id: self.device_id.clone(),
            });
        }
        if status.is_server_error() {
            return Err(AgentError::api(
                Some(status.as_u16()),
                format!("Server error: {}", status.as_u16()),
            ));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::api(
                Some(status.as_u16()),
                format!("Request failed: {body}"),
            ));
        }

        resp.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                transport_error(e)
            } else {
                AgentError::api(
                    Some(status.as_u16()),
                    format!("Failed to parse response as JSON: {e}"),
                )
            }
        })
    }
}

fn transport_error(e: reqwest::Error) -> AgentError {
    if e.is_timeout() {
        AgentError::Network(format!("Request timeout: {e}"))
    } else if e.is_connect() {
        AgentError::Network(format!("Connection error: {e}"))
    } else {
        AgentError::Network(format!("{e}"))
    }
}

impl ControlPlane for HttpControlPlane {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, AgentError> {
        tracing::info!(
            device_id = %request.device_id,
            role = %request.role,
            "registering device"
        );
        let req = self
            .http
            .post(format!("{}/api/devices", self.api_url))
            .json(request);
        let resp: RegisterResponse = self.execute(req, false).await?;
        tracing::info!(status = %resp.status, message = %resp.message, "device registered");
        Ok(resp)
    }

    async fn send_heartbeat(
        &self,
        heartbeat: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, AgentError> {
        tracing::debug!(device_id = %self.device_id, "sending heartbeat");
        let req = self.http.post(self.device_url("heartbeat")).json(heartbeat);
        self.execute(req, true).await
    }

    async fn get_configuration(&self) -> Result<ConfigSnapshot, AgentError> {
        tracing::debug!(device_id = %self.device_id, "fetching configuration");
        let req = self.http.get(self.device_url("config"));
        self.execute(req, true).await
    }

    async fn report_deployment(
        &self,
        report: &DeploymentReport,
    ) -> Result<DeploymentAck, AgentError> {
        tracing::info!(
            commit_hash = %report.commit_hash,
            status = ?report.status,
            "reporting deployment status"
        );
        let req = self.http.post(self.device_url("deployment")).json(report);
        self.execute(req, true).await
    }

    fn close(&self) {
        tracing::debug!(device_id = %self.device_id, "control-plane session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::device::{DeploymentStatus, DeviceStatus};
    use fleet_core::ErrorKind;
    use serde_json::json;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HttpControlPlane {
        HttpControlPlane::new(&server.uri(), "pi-01", None, Duration::from_secs(2)).unwrap()
    }

    fn register_request() -> RegisterRequest {
        RegisterRequest {
            device_id: "pi-01".into(),
            hostname: "pi-01.local".into(),
            role: "display".into(),
            branch: "main".into(),
            segment: None,
            ip_address: Some("10.0.0.5".into()),
            mac_address: None,
            agent_version: "0.1.0".into(),
            device_metadata: None,
        }
    }

    #[test]
    fn trailing_slash_is_stripped() {
        let client =
            HttpControlPlane::new("http://overlord:8080///", "pi-01", None, Duration::from_secs(1))
                .unwrap();
        assert_eq!(client.api_url(), "http://overlord:8080");
        assert_eq!(
            client.device_url("heartbeat"),
            "http://overlord:8080/api/devices/pi-01/heartbeat"
        );
    }

    #[tokio::test]
    async fn register_posts_payload_without_absent_fields() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/api/devices"))
            .and(matchers::header("user-agent", USER_AGENT))
            .and(matchers::body_json(json!({
                "device_id": "pi-01",
                "hostname": "pi-01.local",
                "role": "display",
                "branch": "main",
                "ip_address": "10.0.0.5",
                "agent_version": "0.1.0"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "device_id": "pi-01",
                "status": "registered",
                "message": "Device registered successfully"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resp = client_for(&server).register(&register_request()).await.unwrap();
        assert_eq!(resp.status, "registered");
    }

    #[tokio::test]
    async fn api_key_is_sent_as_header() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/api/devices/pi-01/config"))
            .and(matchers::header("x-api-key", "secret-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"branch": "main"})))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            HttpControlPlane::new(&server.uri(), "pi-01", Some("secret-key"), Duration::from_secs(2))
                .unwrap();
        let snapshot = client.get_configuration().await.unwrap();
        assert_eq!(snapshot.branch, "main");
    }

    #[tokio::test]
    async fn unauthorized_and_forbidden_map_to_auth() {
        for code in [401, 403] {
            let server = MockServer::start().await;
            Mock::given(matchers::method("POST"))
                .and(matchers::path("/api/devices"))
                .respond_with(ResponseTemplate::new(code))
                .mount(&server)
                .await;

            let err = client_for(&server)
                .register(&register_request())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Auth, "status {code}");
        }
    }

    #[tokio::test]
    async fn server_error_maps_to_api_with_status() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/api/devices"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .register(&register_request())
            .await
            .unwrap_err();
        assert_eq!(err, AgentError::api(Some(503), "Server error: 503"));
    }

    #[tokio::test]
    async fn heartbeat_for_unknown_device_is_not_registered() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/api/devices/pi-01/heartbeat"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .send_heartbeat(&HeartbeatRequest::status_only(DeviceStatus::Running))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AgentError::NotRegistered {
                device_id: "pi-01".into()
            }
        );
    }

    #[tokio::test]
    async fn heartbeat_sends_only_present_metrics() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/api/devices/pi-01/heartbeat"))
            .and(matchers::body_json(json!({
                "status": "running",
                "cpu_percent": 12.5,
                "containers_running": 3
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "acknowledged": true,
                "next_heartbeat_seconds": 30
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut heartbeat = HeartbeatRequest::status_only(DeviceStatus::Running);
        heartbeat.cpu_percent = Some(12.5);
        heartbeat.containers_running = Some(3);

        let ack = client_for(&server).send_heartbeat(&heartbeat).await.unwrap();
        assert!(ack.acknowledged);
        assert_eq!(ack.next_heartbeat_seconds, Some(30));
    }

    #[tokio::test]
    async fn slow_response_maps_to_network_timeout() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/api/devices/pi-01/config"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"branch": "main"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client =
            HttpControlPlane::new(&server.uri(), "pi-01", None, Duration::from_millis(50)).unwrap();
        let err = client.get_configuration().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
    }

    #[tokio::test]
    async fn connection_refused_maps_to_network() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let uri = format!("http://127.0.0.1:{port}");
        let client = HttpControlPlane::new(&uri, "pi-01", None, Duration::from_secs(1)).unwrap();
        let err = client.get_configuration().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.to_string().contains("Connection error"), "{err}");
    }

    #[tokio::test]
    async fn undecodable_success_body_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/api/devices/pi-01/config"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client_for(&server).get_configuration().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Api);
    }

    #[tokio::test]
    async fn report_deployment_includes_error_and_metadata() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/api/devices/pi-01/deployment"))
            .and(matchers::body_json(json!({
                "commit_hash": "abc123",
                "status": "failed",
                "error": "compose up failed",
                "deploy_metadata": {"attempt": 2}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "deployment_id": "dep-9",
                "status": "recorded"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut metadata = serde_json::Map::new();
        metadata.insert("attempt".into(), json!(2));
        let report = DeploymentReport {
            commit_hash: "abc123".into(),
            status: DeploymentStatus::Failed,
            error: Some("compose up failed".into()),
            deploy_metadata: Some(metadata),
        };

        let ack = client_for(&server).report_deployment(&report).await.unwrap();
        assert_eq!(ack.deployment_id, "dep-9");
    }
}
