//! Cooperative cancellation.
//!
//! A signal only raises the flag. Loops check it between steps, so an
//! in-flight request or container command always finishes first.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Raise `flag` on SIGINT or SIGTERM. Must be called inside a runtime.
pub fn install(flag: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let signal = wait_for_signal().await;
        tracing::info!(signal, "shutdown requested, stopping after the current step");
        flag.store(true, Ordering::SeqCst);
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGTERM, only ctrl-c will stop the agent");
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = term.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "SIGINT"
}
