use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use fleet_core::device::{
    ConfigSnapshot, DeploymentAck, DeploymentReport, HeartbeatRequest, HeartbeatResponse,
    RegisterRequest, RegisterResponse,
};
use fleet_core::AgentError;

use crate::client::ControlPlane;
use crate::metrics::{MetricsSource, SystemMetrics, WorkloadMetrics};
use crate::runtime::{ContainerCounts, ContainerRuntime, Workload};

pub const RESCUE_CONTAINER: &str = "metrica-safe-mode-status";

#[derive(Debug, Default)]
pub struct RuntimeState {
    pub running: BTreeSet<String>,
    pub calls: Vec<(&'static str, Workload)>,
    pub start_fails: bool,
    pub stop_fails: bool,
    /// `list_running` and `container_counts` fail
    pub unreachable: bool,
    pub counts: Option<(u32, u32)>,
}

impl RuntimeState {
    pub fn starts(&self, workload: Workload) -> usize {
        self.calls
            .iter()
            .filter(|(op, w)| *op == "start" && *w == workload)
            .count()
    }

    pub fn stops(&self, workload: Workload) -> usize {
        self.calls
            .iter()
            .filter(|(op, w)| *op == "stop" && *w == workload)
            .count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeRuntime(Arc<Mutex<RuntimeState>>);

impl FakeRuntime {
    pub fn state(&self) -> MutexGuard<'_, RuntimeState> {
        self.0.lock().unwrap()
    }

    /// A runtime where the rescue workload is already up.
    pub fn with_rescue_running() -> Self {
        let runtime = Self::default();
        runtime.state().running.insert(RESCUE_CONTAINER.to_string());
        runtime
    }
}

impl ContainerRuntime for FakeRuntime {
    async fn start(&self, workload: Workload) -> Result<(), AgentError> {
        let mut state = self.state();
        state.calls.push(("start", workload));
        if state.start_fails {
            return Err(AgentError::Runtime("compose up exited with 1".into()));
        }
        if workload == Workload::Rescue {
            state.running.insert(RESCUE_CONTAINER.to_string());
        }
        Ok(())
    }

    async fn stop(&self, workload: Workload) -> Result<(), AgentError> {
        let mut state = self.state();
        state.calls.push(("stop", workload));
        if state.stop_fails {
            return Err(AgentError::Runtime("compose down exited with 1".into()));
        }
        if workload == Workload::Rescue {
            state.running.retain(|n| !n.contains("safe-mode"));
        }
        Ok(())
    }

    async fn list_running(&self, filter: &str) -> Result<BTreeSet<String>, AgentError> {
        let state = self.state();
        if state.unreachable {
            return Err(AgentError::Runtime("cannot connect to the Docker daemon".into()));
        }
        Ok(state
            .running
            .iter()
            .filter(|n| n.contains(filter))
            .cloned()
            .collect())
    }

    async fn container_counts(&self) -> Result<ContainerCounts, AgentError> {
        let state = self.state();
        if state.unreachable {
            return Err(AgentError::Runtime("cannot connect to the Docker daemon".into()));
        }
        let (running, not_running) = state
            .counts
            .unwrap_or((state.running.len() as u32, 0));
        Ok(ContainerCounts {
            running,
            not_running,
        })
    }
}

#[derive(Debug, Default)]
pub struct PlaneState {
    /// Consumed front to back; an empty script succeeds.
    pub register_script: VecDeque<Result<(), AgentError>>,
    pub heartbeat_script: VecDeque<Result<(), AgentError>>,
    /// Consumed front to back; an empty script returns `default_snapshot()`.
    pub config_script: VecDeque<Result<ConfigSnapshot, AgentError>>,
    pub register_calls: usize,
    pub heartbeats: Vec<HeartbeatRequest>,
    pub config_calls: usize,
    pub closed: bool,
    /// Raise the shutdown flag once this many heartbeats have been sent.
    pub stop_after_heartbeats: Option<(usize, Arc<AtomicBool>)>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeControlPlane(Arc<Mutex<PlaneState>>);

impl FakeControlPlane {
    pub fn state(&self) -> MutexGuard<'_, PlaneState> {
        self.0.lock().unwrap()
    }

    pub fn stop_after_heartbeats(&self, count: usize, shutdown: &Arc<AtomicBool>) {
        self.state().stop_after_heartbeats = Some((count, Arc::clone(shutdown)));
    }
}

pub fn default_snapshot() -> ConfigSnapshot {
    serde_json::from_value(serde_json::json!({
        "device_id": "pi-test-01",
        "branch": "main",
        "segment": "stable",
        "update_enabled": true,
        "maintenance_mode": false
    }))
    .unwrap()
}

impl ControlPlane for FakeControlPlane {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, AgentError> {
        let mut state = self.state();
        state.register_calls += 1;
        state
            .register_script
            .pop_front()
            .unwrap_or(Ok(()))
            .map(|()| RegisterResponse {
                device_id: request.device_id.clone(),
                status: "registered".into(),
                message: String::new(),
            })
    }

    async fn send_heartbeat(
        &self,
        heartbeat: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, AgentError> {
        let mut state = self.state();
        state.heartbeats.push(heartbeat.clone());
        if let Some((limit, flag)) = &state.stop_after_heartbeats
            && state.heartbeats.len() >= *limit
        {
            flag.store(true, Ordering::SeqCst);
        }
        state
            .heartbeat_script
            .pop_front()
            .unwrap_or(Ok(()))
            .map(|()| HeartbeatResponse {
                acknowledged: true,
                next_heartbeat_seconds: None,
            })
    }

    async fn get_configuration(&self) -> Result<ConfigSnapshot, AgentError> {
        let mut state = self.state();
        state.config_calls += 1;
        state
            .config_script
            .pop_front()
            .unwrap_or_else(|| Ok(default_snapshot()))
    }

    /// The controller never reports deployments.
    async fn report_deployment(
        &self,
        _report: &DeploymentReport,
    ) -> Result<DeploymentAck, AgentError> {
        Err(AgentError::api(None, "deployment reporting is not scripted"))
    }

    fn close(&self) {
        self.state().closed = true;
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeMetrics;

impl MetricsSource for FakeMetrics {
    async fn collect_system(&self) -> SystemMetrics {
        SystemMetrics {
            uptime_seconds: 3600,
            cpu_percent: 12.5,
            memory_percent: 40.0,
            disk_percent: 55.0,
            temperature_celsius: None,
            ip_address: Some("10.0.0.5".into()),
            mac_address: Some("b8:27:eb:00:00:01".into()),
        }
    }

    async fn collect_workload(&self) -> WorkloadMetrics {
        WorkloadMetrics {
            running: 3,
            failed: 0,
        }
    }

    fn commit_hash(&self) -> Option<String> {
        Some("abc123".into())
    }

    fn hostname(&self) -> String {
        "pi-test-01.local".into()
    }
}
