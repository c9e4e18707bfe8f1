use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;

use fleet_core::AgentError;
use tokio::process::Command;

use crate::config::AgentConfig;

/// Name fragment shared by every container of the rescue workload.
pub const RESCUE_CONTAINER_FILTER: &str = "safe-mode";

const LIST_TIMEOUT: Duration = Duration::from_secs(10);

/// The two workload stacks the agent manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Workload {
    Primary,
    Rescue,
}

impl Workload {
    pub fn as_str(self) -> &'static str {
        match self {
            Workload::Primary => "primary",
            Workload::Rescue => "rescue",
        }
    }
}

/// Snapshot of container states, used for workload metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerCounts {
    pub running: u32,
    pub not_running: u32,
}

/// Timeouts and non-zero exits surface as [`AgentError::Runtime`].
#[allow(async_fn_in_trait)]
pub trait ContainerRuntime {
    async fn start(&self, workload: Workload) -> Result<(), AgentError>;

    async fn stop(&self, workload: Workload) -> Result<(), AgentError>;

    /// Names of running containers whose name contains `filter`.
    async fn list_running(&self, filter: &str) -> Result<BTreeSet<String>, AgentError>;

    /// Running vs. non-running containers across the whole host.
    async fn container_counts(&self) -> Result<ContainerCounts, AgentError>;
}

/// Docker Compose via the `docker` CLI.
#[derive(Debug, Clone)]
pub struct ComposeRuntime {
    primary_dir: PathBuf,
    rescue_dir: PathBuf,
    timeout: Duration,
}

impl ComposeRuntime {
    pub fn new(primary_dir: PathBuf, rescue_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            primary_dir,
            rescue_dir,
            timeout,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(
            config.repo_path.clone(),
            config.safe_mode_dir(),
            Duration::from_secs(config.runtime_timeout),
        )
    }

    fn dir(&self, workload: Workload) -> &PathBuf {
        match workload {
            Workload::Primary => &self.primary_dir,
            Workload::Rescue => &self.rescue_dir,
        }
    }

    async fn compose(&self, workload: Workload, args: &[&str]) -> Result<(), AgentError> {
        let dir = self.dir(workload);
        let mut cmd = Command::new("docker");
        cmd.arg("compose").args(args).current_dir(dir);

        let output = run_bounded(cmd, self.timeout).await.map_err(|e| {
            AgentError::Runtime(format!(
                "docker compose {} ({}): {e}",
                args.join(" "),
                workload.as_str()
            ))
        })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(AgentError::Runtime(format!(
                "docker compose {} ({}) exited with {}: {}",
                args.join(" "),
                workload.as_str(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    async fn docker_ps(&self, args: &[&str]) -> Result<String, AgentError> {
        let mut cmd = Command::new("docker");
        cmd.arg("ps").args(args);

        let output = run_bounded(cmd, LIST_TIMEOUT)
            .await
            .map_err(|e| AgentError::Runtime(format!("docker ps: {e}")))?;
        if !output.status.success() {
            return Err(AgentError::Runtime(format!(
                "docker ps exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Run a command to completion, killing it if it outlives `timeout`.
pub(crate) async fn run_bounded(mut cmd: Command, timeout: Duration) -> Result<Output, String> {
    cmd.kill_on_drop(true);
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(format!("failed to spawn: {e}")),
        Err(_) => Err(format!("timed out after {}s", timeout.as_secs())),
    }
}

impl ContainerRuntime for ComposeRuntime {
    async fn start(&self, workload: Workload) -> Result<(), AgentError> {
        tracing::info!(workload = workload.as_str(), "starting workload");
        self.compose(workload, &["up", "-d"]).await
    }

    async fn stop(&self, workload: Workload) -> Result<(), AgentError> {
        tracing::info!(workload = workload.as_str(), "stopping workload");
        self.compose(workload, &["down"]).await
    }

    async fn list_running(&self, filter: &str) -> Result<BTreeSet<String>, AgentError> {
        let name_filter = format!("name={filter}");
        let stdout = self
            .docker_ps(&["--filter", &name_filter, "--format", "{{.Names}}"])
            .await?;
        Ok(parse_names(&stdout))
    }

    async fn container_counts(&self) -> Result<ContainerCounts, AgentError> {
        let stdout = self.docker_ps(&["--all", "--format", "{{.State}}"]).await?;
        Ok(parse_states(&stdout))
    }
}

fn parse_names(stdout: &str) -> BTreeSet<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_states(stdout: &str) -> ContainerCounts {
    let mut counts = ContainerCounts::default();
    for state in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if state == "running" {
            counts.running += 1;
        } else {
            counts.not_running += 1;
        }
    }
    counts
}
