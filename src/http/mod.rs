//! Server adapters: the network servers a pipeline is handed to.
//!
//! Three adapters are built in:
//! - **http**: plain HTTP via axum-server, graceful shutdown on request
//! - **tls**: HTTPS with user-provided certificates, hot-reload via SIGHUP and
//!   an optional HTTP to HTTPS redirect listener
//! - **cgi**: serves exactly one request described by the CGI environment
//!
//! Adapters are looked up by name in an [`AdapterRegistry`]. With no name
//! configured, [`default_adapter_name`] picks `cgi` when the process was
//! launched as a CGI script and `http` otherwise.

pub mod cgi;
mod redirect;
mod server;
mod shutdown;
pub mod static_files;

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;

use crate::config::Options;

pub use cgi::CgiAdapter;
pub use server::{HttpAdapter, TlsAdapter, GRACEFUL_SHUTDOWN_TIMEOUT};

/// Variable whose presence marks a CGI invocation
pub const CGI_MARKER_VAR: &str = "REQUEST_METHOD";

/// Server adapter error
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("unknown server adapter: {0}")]
    Unknown(String),

    #[error("invalid listen address {addr}: {reason}")]
    InvalidAddress { addr: String, reason: String },

    #[error("server I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to load TLS configuration: {0}")]
    TlsConfig(String),

    #[error("invalid CGI request: {0}")]
    Cgi(String),
}

/// A graceful-shutdown request, callable from a signal handler.
///
/// Holds only the capability to ask the server to stop; calling it more than
/// once is harmless.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<dyn Fn() + Send + Sync>);

impl ShutdownHandle {
    pub fn new<F>(shutdown: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self(Arc::new(shutdown))
    }

    pub fn shutdown(&self) {
        (self.0)()
    }
}

impl fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ShutdownHandle(..)")
    }
}

/// A network server that runs a pipeline until it decides to stop.
#[async_trait]
pub trait ServerAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// One-shot adapters serve a single request per process (CGI).
    fn is_one_shot(&self) -> bool {
        false
    }

    /// Graceful shutdown capability, if the adapter has one.
    fn shutdown_handle(&self) -> Option<ShutdownHandle> {
        None
    }

    /// Serve `app`. Returns once the server has stopped.
    async fn run(&self, app: Router, options: &Options) -> Result<(), AdapterError>;
}

type AdapterFactory = dyn Fn() -> Arc<dyn ServerAdapter> + Send + Sync;

/// Maps adapter names to constructors.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    factories: HashMap<String, Arc<AdapterFactory>>,
}

impl AdapterRegistry {
    /// Registry holding `http`, `tls` and `cgi`.
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.register(server::HTTP, || Arc::new(HttpAdapter::new()));
        registry.register(server::TLS, || Arc::new(TlsAdapter::new()));
        registry.register(cgi::NAME, || Arc::new(CgiAdapter));
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn ServerAdapter> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Construct the adapter called `name`, or the default one when unset.
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn ServerAdapter>, AdapterError> {
        let name = name.unwrap_or_else(|| default_adapter_name(|key| std::env::var(key).ok()));
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| AdapterError::Unknown(name.to_string()))?;
        Ok(factory())
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.names())
            .finish()
    }
}

/// Adapter used when none is configured.
pub fn default_adapter_name<F>(lookup: F) -> &'static str
where
    F: Fn(&str) -> Option<String>,
{
    if lookup(CGI_MARKER_VAR).is_some() {
        cgi::NAME
    } else {
        server::HTTP
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_default_adapter_name() {
        assert_eq!(default_adapter_name(|_| None), "http");
        assert_eq!(
            default_adapter_name(|key| (key == "REQUEST_METHOD").then(|| "GET".to_string())),
            "cgi"
        );
    }

    #[test]
    fn test_builtin_registry() {
        let registry = AdapterRegistry::builtin();
        assert_eq!(registry.names(), vec!["cgi", "http", "tls"]);

        let http = registry.resolve(Some("http")).unwrap();
        assert_eq!(http.name(), "http");
        assert!(!http.is_one_shot());
        assert!(http.shutdown_handle().is_some());

        let cgi = registry.resolve(Some("cgi")).unwrap();
        assert!(cgi.is_one_shot());
        assert!(cgi.shutdown_handle().is_none());
    }

    #[test]
    fn test_unknown_adapter() {
        let err = AdapterRegistry::builtin()
            .resolve(Some("webrick"))
            .err()
            .unwrap();
        assert!(matches!(err, AdapterError::Unknown(name) if name == "webrick"));
    }

    #[test]
    fn test_shutdown_handle_is_repeatable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = ShutdownHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.shutdown();
        handle.clone().shutdown();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
