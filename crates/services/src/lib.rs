//! Shared bootstrap for the marketflow service binaries
//!
//! Each binary starts with no arguments, driven entirely by the
//! configuration tree and environment secrets, and shuts down cleanly on
//! SIGINT/SIGTERM. Exit code 0 means a clean shutdown; a non-zero exit
//! means an unrecoverable startup failure.

use tracing_subscriber::EnvFilter;

/// Initialize tracing from RUST_LOG, defaulting to info.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

/// Resolve when SIGINT or SIGTERM arrives.
pub async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
