//! HTTP/HTTPS server adapters.
//!
//! Both adapters own an axum-server [`Handle`] from construction, so the
//! lifecycle manager can arm its signal handler with a shutdown capability
//! before the server starts listening.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;

use super::{redirect, shutdown, AdapterError, ServerAdapter, ShutdownHandle};
use crate::config::Options;

pub(crate) const HTTP: &str = "http";
pub(crate) const TLS: &str = "tls";

/// How long in-flight connections may drain after a shutdown request
pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

fn graceful_shutdown(handle: &Handle) -> ShutdownHandle {
    let handle = handle.clone();
    ShutdownHandle::new(move || {
        handle.graceful_shutdown(Some(GRACEFUL_SHUTDOWN_TIMEOUT));
        tracing::info!(
            "Graceful shutdown initiated, waiting up to 30 seconds for connections to close"
        );
    })
}

/// Make aws-lc-rs the process-wide rustls provider unless one is already
/// installed. Returns true if this call installed it.
pub fn install_crypto_provider() -> bool {
    let installed = rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_ok();
    if installed {
        tracing::debug!("Installed aws-lc-rs as the rustls crypto provider");
    }
    installed
}

/// Resolve `options.host`/`options.port` to a listen address.
async fn listen_addr(options: &Options) -> Result<SocketAddr, AdapterError> {
    let invalid = |reason: String| AdapterError::InvalidAddress {
        addr: format!("{}:{}", options.host, options.port),
        reason,
    };
    tokio::net::lookup_host((options.host.as_str(), options.port))
        .await
        .map_err(|e| invalid(e.to_string()))?
        .next()
        .ok_or_else(|| invalid("host resolved to no addresses".to_string()))
}

/// Plain HTTP server.
#[derive(Clone)]
pub struct HttpAdapter {
    handle: Handle,
}

impl HttpAdapter {
    pub fn new() -> Self {
        Self {
            handle: Handle::new(),
        }
    }
}

impl Default for HttpAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServerAdapter for HttpAdapter {
    fn name(&self) -> &str {
        HTTP
    }

    fn shutdown_handle(&self) -> Option<ShutdownHandle> {
        Some(graceful_shutdown(&self.handle))
    }

    async fn run(&self, app: Router, options: &Options) -> Result<(), AdapterError> {
        let addr = listen_addr(options).await?;
        tracing::info!(%addr, environment = %options.environment, "Starting HTTP server");

        axum_server::bind(addr)
            .handle(self.handle.clone())
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// HTTPS server with user-provided certificates.
#[derive(Clone)]
pub struct TlsAdapter {
    handle: Handle,
}

impl TlsAdapter {
    pub fn new() -> Self {
        Self {
            handle: Handle::new(),
        }
    }
}

impl Default for TlsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn required_path<'a>(path: Option<&'a Path>, key: &str) -> Result<&'a Path, AdapterError> {
    path.ok_or_else(|| AdapterError::TlsConfig(format!("tls.{} is required", key)))
}

#[async_trait]
impl ServerAdapter for TlsAdapter {
    fn name(&self) -> &str {
        TLS
    }

    fn shutdown_handle(&self) -> Option<ShutdownHandle> {
        Some(graceful_shutdown(&self.handle))
    }

    async fn run(&self, app: Router, options: &Options) -> Result<(), AdapterError> {
        let tls = &options.tls;
        let cert_path = required_path(tls.cert_path.as_deref(), "cert_path")?;
        let key_path = required_path(tls.key_path.as_deref(), "key_path")?;
        let addr = listen_addr(options).await?;

        tracing::info!(
            %addr,
            cert = %cert_path.display(),
            key = %key_path.display(),
            "Starting HTTPS server"
        );

        install_crypto_provider();
        let rustls_config = RustlsConfig::from_pem_file(cert_path, key_path)
            .await
            .map_err(|e| AdapterError::TlsConfig(format!("Failed to load certificates: {}", e)))?;

        shutdown::setup_reload_handler(
            rustls_config.clone(),
            cert_path.to_path_buf(),
            key_path.to_path_buf(),
        );

        if tls.redirect_http {
            redirect::spawn_redirect_server(addr.ip(), tls.redirect_port, addr.port());
        }

        axum_server::bind_rustls(addr, rustls_config)
            .handle(self.handle.clone())
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TlsConfig;

    #[tokio::test]
    async fn test_listen_addr_resolves_localhost() {
        let mut options = Options::default();
        options.host = "127.0.0.1".to_string();
        options.port = 8080;
        assert_eq!(
            listen_addr(&options).await.unwrap(),
            SocketAddr::from(([127, 0, 0, 1], 8080))
        );
    }

    #[tokio::test]
    async fn test_tls_requires_certificate_paths() {
        let mut options = Options::default();
        options.tls = TlsConfig::default();
        let err = TlsAdapter::new()
            .run(Router::new(), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::TlsConfig(_)));
    }

    #[test]
    fn test_crypto_provider_installed_once() {
        install_crypto_provider();
        assert!(rustls::crypto::CryptoProvider::get_default().is_some());
        assert!(!install_crypto_provider());
    }

    #[tokio::test]
    async fn test_http_serves_until_shutdown() {
        let adapter = HttpAdapter::new();
        let handle = adapter.shutdown_handle().unwrap();

        let mut options = Options::default();
        options.host = "127.0.0.1".to_string();
        options.port = 0;

        let server = {
            let adapter = adapter.clone();
            tokio::spawn(async move { adapter.run(Router::new(), &options).await })
        };

        let listening = adapter.handle.listening().await;
        assert!(listening.is_some());

        handle.shutdown();
        server.await.unwrap().unwrap();
    }
}
