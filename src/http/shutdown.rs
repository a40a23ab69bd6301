//! Certificate hot-reload for the `tls` adapter.
//!
//! SIGINT/SIGTERM are handled by the lifecycle manager, which asks the
//! adapter to shut down; only SIGHUP is adapter-specific.

use std::path::PathBuf;

use axum_server::tls_rustls::RustlsConfig;

/// Setup SIGHUP handler for certificate reload.
///
/// When SIGHUP is received, the server will reload the certificate and key
/// files from disk without restarting.
#[cfg(unix)]
pub fn setup_reload_handler(tls_config: RustlsConfig, cert_path: PathBuf, key_path: PathBuf) {
    let mut sighup =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
            Ok(signal) => signal,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGHUP handler, certificate reload disabled");
                return;
            }
        };

    tokio::spawn(async move {
        while sighup.recv().await.is_some() {
            tracing::info!("Received SIGHUP, reloading TLS certificates");

            match tls_config.reload_from_pem_file(&cert_path, &key_path).await {
                Ok(()) => {
                    tracing::info!(
                        cert = %cert_path.display(),
                        key = %key_path.display(),
                        "TLS certificates reloaded successfully"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        cert = %cert_path.display(),
                        key = %key_path.display(),
                        "Failed to reload TLS certificates"
                    );
                }
            }
        }
    });
}

/// No-op reload handler for non-Unix platforms.
#[cfg(not(unix))]
pub fn setup_reload_handler(_tls_config: RustlsConfig, _cert_path: PathBuf, _key_path: PathBuf) {
    tracing::warn!("Certificate hot-reload via SIGHUP not supported on this platform");
}
