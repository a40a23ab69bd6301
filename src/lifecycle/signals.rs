//! Interrupt handling.
//!
//! On SIGINT or SIGTERM the handler asks the adapter to shut down gracefully.
//! Adapters without that capability are not interrupted mid-request by the
//! handler itself; the process exits after removing its pid file.

use std::io;

use tokio::signal::unix::{signal, SignalKind};

use super::pidfile::PidCleanup;
use crate::http::ShutdownHandle;

/// Ask for a graceful shutdown. Returns false when there is no one to ask.
pub(crate) fn request_shutdown(shutdown: Option<&ShutdownHandle>) -> bool {
    match shutdown {
        Some(handle) => {
            tracing::info!("Initiating graceful shutdown");
            handle.shutdown();
            true
        }
        None => false,
    }
}

/// Register the handlers and spawn the task that serves them.
///
/// Must be called inside a tokio runtime context.
pub fn install(shutdown: Option<ShutdownHandle>, cleanup: Option<PidCleanup>) -> io::Result<()> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(()) = interrupt.recv() => {
                    tracing::info!("Received SIGINT");
                }
                Some(()) = terminate.recv() => {
                    tracing::info!("Received SIGTERM");
                }
                else => break,
            }

            if !request_shutdown(shutdown.as_ref()) {
                tracing::info!("Adapter has no graceful shutdown, exiting");
                if let Some(cleanup) = &cleanup {
                    cleanup.run();
                }
                std::process::exit(0);
            }
        }
    });

    Ok(())
}
