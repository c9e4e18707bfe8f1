//! Safe-mode activation and verification.
//!
//! The persisted record says safe mode was *requested*; the container
//! runtime says whether the rescue workload is actually up. `is_active`
//! needs the record and, when the runtime answers, a running rescue
//! container. When the runtime cannot be asked, the record wins.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use fleet_core::safe_mode::{SafeModeRecord, SafeModeStatus};
use fleet_core::AgentError;
use serde_json::{Map, Value};

use crate::config::AgentConfig;
use crate::runtime::{ContainerRuntime, RESCUE_CONTAINER_FILTER, Workload};

pub struct SafeModeManager<R> {
    runtime: R,
    state_file: PathBuf,
    status_file: PathBuf,
    device_id: Option<String>,
}

impl<R: ContainerRuntime> SafeModeManager<R> {
    pub fn new(
        runtime: R,
        state_file: PathBuf,
        status_file: PathBuf,
        device_id: Option<String>,
    ) -> Self {
        Self {
            runtime,
            state_file,
            status_file,
            device_id,
        }
    }

    pub fn from_config(config: &AgentConfig, runtime: R) -> Self {
        Self::new(
            runtime,
            config.state_file(),
            config.status_page_file(),
            config.device_label(),
        )
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    /// Persist the record, stop the primary workload and start the rescue
    /// workload. Only the rescue start decides success; the record stays on
    /// disk either way. Safe to call again while already active.
    pub async fn activate(
        &self,
        reason: &str,
        error_details: Map<String, Value>,
    ) -> Result<(), AgentError> {
        tracing::warn!(reason, "activating safe mode");

        let record = SafeModeRecord::new(reason, error_details, self.device_id.clone());
        let bytes = serde_json::to_vec_pretty(&record)
            .map_err(|e| AgentError::Storage(format!("failed to serialize safe-mode record: {e}")))?;

        write_atomic(&self.state_file, &bytes)?;
        tracing::info!(path = %self.state_file.display(), "safe-mode state written");

        match write_atomic(&self.status_file, &bytes) {
            Ok(()) => tracing::info!(path = %self.status_file.display(), "status page data written"),
            Err(e) => tracing::warn!(error = %e, "failed to mirror safe-mode state to status page"),
        }

        if let Err(e) = self.runtime.stop(Workload::Primary).await {
            tracing::warn!(error = %e, "could not stop primary workload, starting rescue anyway");
        }

        self.runtime
            .start(Workload::Rescue)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "failed to start rescue workload"))?;

        tracing::info!("safe mode activated");
        Ok(())
    }

    /// Stop the rescue workload and, only if that worked, forget the record.
    pub async fn deactivate(&self) -> Result<(), AgentError> {
        tracing::info!("deactivating safe mode");

        self.runtime.stop(Workload::Rescue).await.inspect_err(|e| {
            tracing::error!(error = %e, "failed to stop rescue workload, keeping safe-mode state")
        })?;

        remove_if_exists(&self.state_file)?;
        remove_if_exists(&self.status_file)?;

        tracing::info!("safe mode deactivated");
        Ok(())
    }

    /// `Ok(None)` when no record exists; `StateCorruption` when one exists
    /// but cannot be read or parsed.
    pub fn read_record(&self) -> Result<Option<SafeModeRecord>, AgentError> {
        let raw = match std::fs::read_to_string(&self.state_file) {
            Ok(raw) => raw,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AgentError::StateCorruption(e.to_string())),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| AgentError::StateCorruption(e.to_string()))
    }

    pub async fn is_active(&self) -> bool {
        match self.read_record() {
            Ok(None) => return false,
            Ok(Some(record)) if !record.active => return false,
            Ok(Some(_)) => {}
            Err(e) => {
                tracing::warn!(error = %e, "safe-mode record unreadable, verifying against container runtime");
            }
        }

        match self.runtime.list_running(RESCUE_CONTAINER_FILTER).await {
            Ok(names) => names.iter().any(|n| n.contains(RESCUE_CONTAINER_FILTER)),
            Err(e) => {
                tracing::warn!(error = %e, "could not verify rescue workload, trusting persisted record");
                true
            }
        }
    }

    pub async fn get_status(&self) -> SafeModeStatus {
        if !self.is_active().await {
            return SafeModeStatus::inactive();
        }

        match self.read_record() {
            Ok(Some(record)) => record.into(),
            Ok(None) => SafeModeStatus::inactive(),
            Err(e) => {
                tracing::error!(error = %e, "error reading safe-mode state");
                SafeModeStatus::corrupted(&e.to_string())
            }
        }
    }
}

/// Whole-record replace: write a sibling temp file, then rename over.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), AgentError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            AgentError::Storage(format!("failed to create {}: {e}", parent.display()))
        })?;
    }

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, bytes)
        .map_err(|e| AgentError::Storage(format!("failed to write {}: {e}", tmp_path.display())))?;
    std::fs::rename(&tmp_path, path)
        .map_err(|e| AgentError::Storage(format!("failed to rename into {}: {e}", path.display())))
}

fn remove_if_exists(path: &Path) -> Result<(), AgentError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "removed safe-mode file");
            Ok(())
        }
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
        Err(e) => Err(AgentError::Storage(format!(
            "failed to remove {}: {e}",
            path.display()
        ))),
    }
}
