//! hoist: server bootstrap and lifecycle manager for axum applications.
//!
//! Given resolved [`Options`], hoist loads an application from a pipeline
//! description, wraps it in the middleware stack of the active environment,
//! optionally daemonizes and takes a pid-file lock, arms shutdown signals and
//! hands the pipeline to a server adapter.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod middleware;
pub mod observability;

pub use config::Options;
pub use error::StartupError;
pub use lifecycle::Server;
