//! Device lifecycle state machine.
//!
//! `Unregistered → Registering → Running → SafeMode`. `SafeMode` is terminal
//! for the process; leaving it takes an operator (`fleet-agent safe-mode
//! deactivate`) and a restart. Everything runs on one task: a loop step is
//! never interrupted, and the stop flag is only looked at between steps.

use std::any::Any;
use std::ops::ControlFlow;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use fleet_core::AgentError;
use fleet_core::device::{
    ConfigChange, ConfigSnapshot, DeviceStatus, HeartbeatRequest, RegisterRequest,
};
use futures_lite::FutureExt;
use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::client::ControlPlane;
use crate::config::AgentConfig;
use crate::metrics::MetricsSource;
use crate::runtime::ContainerRuntime;
use crate::safe_mode::SafeModeManager;

pub const MAX_REGISTRATION_FAILURES: u32 = 3;
pub const MAX_HEARTBEAT_FAILURES: u32 = 5;

/// Scheduler resolution for both loops.
pub const TICK: Duration = Duration::from_secs(1);

const BACKOFF_STEP_SECS: u64 = 5;
const BACKOFF_CAP_SECS: u64 = 30;

pub const REASON_REGISTRATION_FAILED: &str = "registration failed after multiple attempts";
pub const REASON_HEARTBEAT_FAILURES: &str = "heartbeat failures exceeded threshold";
pub const REASON_CRITICAL_ERROR: &str = "critical error in main loop";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unregistered,
    Registering,
    Running,
    SafeMode,
}

/// Linear backoff after the `failures`-th failed registration, capped.
pub fn registration_backoff(failures: u32) -> Duration {
    Duration::from_secs((BACKOFF_STEP_SECS * u64::from(failures)).min(BACKOFF_CAP_SECS))
}

pub struct Controller<C, M, R> {
    config: AgentConfig,
    client: C,
    metrics: M,
    safe_mode: SafeModeManager<R>,
    shutdown: Arc<AtomicBool>,
    state: LifecycleState,
    history: Vec<LifecycleState>,
    registration_failures: u32,
    heartbeat_failures: u32,
    snapshot: Option<ConfigSnapshot>,
}

impl<C, M, R> Controller<C, M, R>
where
    C: ControlPlane,
    M: MetricsSource,
    R: ContainerRuntime,
{
    pub fn new(
        config: AgentConfig,
        client: C,
        metrics: M,
        safe_mode: SafeModeManager<R>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            client,
            metrics,
            safe_mode,
            shutdown,
            state: LifecycleState::Unregistered,
            history: vec![LifecycleState::Unregistered],
            registration_failures: 0,
            heartbeat_failures: 0,
            snapshot: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Every state entered so far, starting with `Unregistered`.
    pub fn history(&self) -> &[LifecycleState] {
        &self.history
    }

    pub fn registration_failures(&self) -> u32 {
        self.registration_failures
    }

    pub fn heartbeat_failures(&self) -> u32 {
        self.heartbeat_failures
    }

    pub fn config_snapshot(&self) -> Option<&ConfigSnapshot> {
        self.snapshot.as_ref()
    }

    fn stop_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn transition(&mut self, to: LifecycleState) {
        let from = self.state;
        if from == to {
            return;
        }
        if to == LifecycleState::SafeMode {
            tracing::warn!(from = ?from, to = ?to, "lifecycle transition");
        } else {
            tracing::info!(from = ?from, to = ?to, "lifecycle transition");
        }
        self.state = to;
        self.history.push(to);
    }

    /// Drive the device until the stop flag is raised. Returns the state the
    /// process ends in.
    pub async fn run(&mut self) -> LifecycleState {
        tracing::info!(device_id = %self.config.device_id, "starting fleet agent");

        if self.safe_mode.is_active().await {
            tracing::warn!("safe mode still active from a previous run, skipping registration");
            self.transition(LifecycleState::SafeMode);
        } else if self.register().await {
            self.main_loop().await;
        }

        if self.state == LifecycleState::SafeMode {
            self.safe_mode_loop().await;
        }

        self.client.close();
        tracing::info!(state = ?self.state, "agent stopped");
        self.state
    }

    /// Register with bounded retries. `true` once `Running`.
    pub async fn register(&mut self) -> bool {
        self.transition(LifecycleState::Registering);
        let request = self.registration_request().await;

        loop {
            if self.stop_requested() {
                return false;
            }

            match self.client.register(&request).await {
                Ok(resp) => {
                    tracing::debug!(status = %resp.status, "registration accepted");
                    self.registration_failures = 0;
                    self.transition(LifecycleState::Running);
                    return true;
                }
                Err(err) => {
                    self.registration_failures += 1;
                    tracing::warn!(
                        attempt = self.registration_failures,
                        max_attempts = MAX_REGISTRATION_FAILURES,
                        category = %err.kind(),
                        error = %err,
                        "registration failed"
                    );

                    if self.registration_failures >= MAX_REGISTRATION_FAILURES {
                        let mut details = err.to_details();
                        details.insert("attempts".into(), self.registration_failures.into());
                        self.enter_safe_mode(REASON_REGISTRATION_FAILED, details).await;
                        return false;
                    }

                    self.sleep_unless_stopped(registration_backoff(self.registration_failures))
                        .await;
                }
            }
        }
    }

    async fn registration_request(&self) -> RegisterRequest {
        let system = self.metrics.collect_system().await;
        RegisterRequest {
            device_id: self.config.device_id.clone(),
            hostname: self.metrics.hostname(),
            role: self.config.device_role.clone(),
            branch: self.config.device_branch.clone(),
            segment: self.config.device_segment.clone(),
            ip_address: system.ip_address,
            mac_address: system.mac_address,
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            device_metadata: None,
        }
    }

    async fn main_loop(&mut self) {
        let start = Instant::now();
        let mut next_heartbeat = start;
        let mut next_poll = start;

        while !self.stop_requested() {
            let outcome = AssertUnwindSafe(self.step(&mut next_heartbeat, &mut next_poll))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(ControlFlow::Continue(()))) => {}
                Ok(Ok(ControlFlow::Break(()))) => return,
                Ok(Err(err)) => {
                    tracing::error!(category = %err.kind(), error = %err, "unexpected fault in main loop");
                    self.enter_safe_mode(REASON_CRITICAL_ERROR, err.to_details())
                        .await;
                    return;
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(error = %message, "main loop step panicked");
                    let mut details = Map::new();
                    details.insert("category".into(), "panic".into());
                    details.insert("error".into(), message.into());
                    self.enter_safe_mode(REASON_CRITICAL_ERROR, details).await;
                    return;
                }
            }
            tokio::time::sleep(TICK).await;
        }
    }

    /// One scheduler tick: heartbeat first, then config poll. `Break` once
    /// the device has escalated to safe mode; `Err` for faults that are not
    /// ordinary control-plane failures.
    async fn step(
        &mut self,
        next_heartbeat: &mut Instant,
        next_poll: &mut Instant,
    ) -> Result<ControlFlow<()>, AgentError> {
        let now = Instant::now();

        if now >= *next_heartbeat {
            *next_heartbeat = now + self.config.heartbeat_every();
            match self.send_heartbeat().await {
                Ok(()) => {
                    if self.heartbeat_failures > 0 {
                        tracing::info!(
                            previous_failures = self.heartbeat_failures,
                            "heartbeat recovered"
                        );
                    }
                    self.heartbeat_failures = 0;
                }
                Err(err) if err.kind().is_control_plane() => {
                    self.heartbeat_failures += 1;
                    tracing::warn!(
                        consecutive_failures = self.heartbeat_failures,
                        max_failures = MAX_HEARTBEAT_FAILURES,
                        category = %err.kind(),
                        error = %err,
                        "heartbeat failed"
                    );
                    if self.heartbeat_failures >= MAX_HEARTBEAT_FAILURES {
                        let mut details = err.to_details();
                        details.insert(
                            "consecutive_failures".into(),
                            self.heartbeat_failures.into(),
                        );
                        self.enter_safe_mode(REASON_HEARTBEAT_FAILURES, details).await;
                        return Ok(ControlFlow::Break(()));
                    }
                }
                Err(err) => return Err(err),
            }
        }

        if now >= *next_poll {
            *next_poll = now + self.config.poll_every();
            match self.client.get_configuration().await {
                Ok(snapshot) => {
                    self.observe_config(snapshot);
                }
                Err(err) if err.kind().is_control_plane() => {
                    tracing::warn!(category = %err.kind(), error = %err, "configuration poll failed");
                }
                Err(err) => return Err(err),
            }
        }

        Ok(ControlFlow::Continue(()))
    }

    async fn send_heartbeat(&self) -> Result<(), AgentError> {
        let system = self.metrics.collect_system().await;
        let workload = self.metrics.collect_workload().await;

        let heartbeat = HeartbeatRequest {
            status: DeviceStatus::Running,
            uptime_seconds: Some(system.uptime_seconds),
            cpu_percent: Some(system.cpu_percent),
            memory_percent: Some(system.memory_percent),
            disk_percent: Some(system.disk_percent),
            temperature: system.temperature_celsius,
            containers_running: Some(workload.running),
            containers_failed: Some(workload.failed),
            commit_hash: self.metrics.commit_hash(),
        };

        let ack = self.client.send_heartbeat(&heartbeat).await?;
        tracing::debug!(
            acknowledged = ack.acknowledged,
            next_heartbeat_seconds = ?ack.next_heartbeat_seconds,
            "heartbeat sent"
        );
        Ok(())
    }

    /// Hold the newest snapshot and report what changed. Changes are not
    /// applied to the device.
    fn observe_config(&mut self, snapshot: ConfigSnapshot) -> Vec<ConfigChange> {
        let Some(current) = &self.snapshot else {
            tracing::info!(
                branch = %snapshot.branch,
                segment = ?snapshot.segment,
                update_enabled = snapshot.update_enabled,
                maintenance_mode = snapshot.maintenance_mode,
                "initial configuration received"
            );
            self.snapshot = Some(snapshot);
            return Vec::new();
        };

        let changes = current.diff(&snapshot);
        if changes.is_empty() {
            tracing::debug!("configuration unchanged");
            return changes;
        }

        for change in &changes {
            tracing::info!(
                field = change.field,
                old = %change.old,
                new = %change.new,
                "configuration changed"
            );
        }
        self.snapshot = Some(snapshot);
        changes
    }

    /// Single escalation path. Re-entry while already in safe mode is a no-op.
    async fn enter_safe_mode(&mut self, reason: &str, details: Map<String, Value>) {
        if self.state == LifecycleState::SafeMode {
            tracing::debug!(reason, "already in safe mode");
            return;
        }
        self.transition(LifecycleState::SafeMode);

        if !self.config.safe_mode_enabled {
            tracing::warn!(reason, "safe mode disabled by configuration, rescue workload not started");
            return;
        }

        match self.safe_mode.activate(reason, details).await {
            Ok(()) => tracing::info!(
                reason,
                port = self.config.safe_mode_port,
                "rescue workload up, status page on its configured port"
            ),
            Err(err) => tracing::error!(
                reason,
                category = %err.kind(),
                error = %err,
                "safe-mode activation failed, record kept for the next check"
            ),
        }
    }

    /// Degraded loop: status-only heartbeats, failures logged and ignored.
    async fn safe_mode_loop(&mut self) {
        tracing::warn!("entering safe-mode loop");
        let mut next_heartbeat = Instant::now();
        let heartbeat = HeartbeatRequest::status_only(DeviceStatus::SafeMode);

        while !self.stop_requested() {
            let now = Instant::now();
            if now >= next_heartbeat {
                next_heartbeat = now + self.config.heartbeat_every();
                match self.client.send_heartbeat(&heartbeat).await {
                    Ok(_) => tracing::debug!("safe-mode heartbeat sent"),
                    Err(err) => tracing::warn!(
                        category = %err.kind(),
                        error = %err,
                        "safe-mode heartbeat failed"
                    ),
                }
            }
            tokio::time::sleep(TICK).await;
        }
    }

    async fn sleep_unless_stopped(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.stop_requested() {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            tokio::time::sleep(TICK.min(deadline - now)).await;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
