//! Detaching from the controlling terminal.

use nix::errno::Errno;

/// Daemonization error
#[derive(Debug, thiserror::Error)]
#[error("failed to daemonize: {0}")]
pub struct DaemonError(#[from] Errno);

/// Fork into the background: new session, working directory `/`, standard
/// streams on `/dev/null`. The parent exits inside this call.
///
/// Must run before any thread is spawned (in particular before the async
/// runtime is built), and only once.
pub fn daemonize() -> Result<(), DaemonError> {
    tracing::info!("Daemonizing");
    nix::unistd::daemon(false, false)?;
    tracing::debug!(pid = std::process::id(), "Running as daemon");
    Ok(())
}
