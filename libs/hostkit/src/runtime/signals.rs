//! OS-signal hookup for planned shutdown.

use std::sync::Arc;

use crate::runtime::ServiceHost;

/// Wait for SIGTERM (unix) or ctrl-c.
///
/// # Errors
/// Returns an error when the signal listener cannot be installed.
#[cfg(unix)]
pub async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigterm.recv() => {}
        result = tokio::signal::ctrl_c() => result?,
    }
    Ok(())
}

/// Wait for ctrl-c.
///
/// # Errors
/// Returns an error when the signal listener cannot be installed.
#[cfg(not(unix))]
pub async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Drive a planned `stop("signal", 0)` when the process receives a
/// termination signal.
pub fn hook_signals(host: Arc<ServiceHost>) {
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(()) => {
                tracing::info!("shutdown: signal received");
                host.stop("signal", 0).await;
            }
            Err(error) => {
                tracing::warn!(error = %error, "shutdown: signal listener failed");
            }
        }
    });
}
