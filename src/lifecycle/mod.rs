//! Process lifecycle: from resolved options to a running server.
//!
//! [`Server::start`] walks a fixed sequence of phases:
//!
//! ```text
//! Init -> AppLoaded -> [Daemonized] -> [PidLocked] -> SignalArmed -> Running
//! ```
//!
//! The application and pipeline are built before daemonizing so the config
//! file is read from the original working directory, and the pid file is
//! written after daemonizing so it records the daemon's pid.

pub mod daemon;
pub mod pidfile;
pub mod settings;
pub mod signals;

use std::fmt;
use std::io;
use std::sync::{Arc, OnceLock};

use axum::Router;

use crate::app::{ApplicationLoader, Builder, LoadError, TomlBuilder};
use crate::config::Options;
use crate::error::StartupError;
use crate::http::{AdapterError, AdapterRegistry, ServerAdapter};
use crate::middleware::{self, ComponentRegistry, MiddlewareTable};

use daemon::DaemonError;
use pidfile::PidFile;
use settings::ProcessSettings;

/// Lifecycle error
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("lifecycle cannot move from {from:?} to {to:?}")]
    OutOfOrder { from: Phase, to: Phase },

    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] io::Error),
}

/// Startup phases, in order. Bracketed phases in the module docs are optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    AppLoaded,
    Daemonized,
    PidLocked,
    SignalArmed,
    Running,
}

impl Phase {
    fn can_advance_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Init, AppLoaded)
                | (AppLoaded, Daemonized | PidLocked | SignalArmed)
                | (Daemonized, PidLocked | SignalArmed)
                | (PidLocked, SignalArmed)
                | (SignalArmed, Running)
        )
    }
}

/// Tracks the current phase and rejects transitions that skip ahead or go back.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    phase: Phase,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self { phase: Phase::Init }
    }
}

impl Lifecycle {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn advance(&mut self, next: Phase) -> Result<(), LifecycleError> {
        if !self.phase.can_advance_to(next) {
            return Err(LifecycleError::OutOfOrder {
                from: self.phase,
                to: next,
            });
        }
        tracing::debug!(from = ?self.phase, to = ?next, "Lifecycle phase");
        self.phase = next;
        Ok(())
    }
}

/// The lifecycle manager: owns the options, memoizes the application,
/// pipeline and adapter, and drives startup.
pub struct Server {
    options: Options,
    loader: ApplicationLoader,
    components: ComponentRegistry,
    middleware: MiddlewareTable,
    adapters: AdapterRegistry,
    adapter: OnceLock<Arc<dyn ServerAdapter>>,
    pipeline: Option<Router>,
    daemonizer: Arc<Daemonizer>,
    lifecycle: Lifecycle,
}

/// Detaches the process from its terminal. Replaceable for tests.
pub type Daemonizer = dyn Fn() -> Result<(), DaemonError> + Send + Sync;

impl Server {
    pub fn new(options: Options) -> Self {
        let components = ComponentRegistry::builtin();
        Self {
            options,
            loader: ApplicationLoader::new(Arc::new(TomlBuilder::new(components.clone()))),
            components,
            middleware: MiddlewareTable::default(),
            adapters: AdapterRegistry::builtin(),
            adapter: OnceLock::new(),
            pipeline: None,
            daemonizer: Arc::new(daemon::daemonize),
            lifecycle: Lifecycle::default(),
        }
    }

    /// Use a custom component registry, both for `--require` checks and for
    /// `[[use]]` entries of the default builder.
    pub fn with_components(mut self, components: ComponentRegistry) -> Self {
        self.loader = ApplicationLoader::new(Arc::new(TomlBuilder::new(components.clone())));
        self.components = components;
        self
    }

    /// Replace the pipeline-description builder.
    pub fn with_builder(mut self, builder: Arc<dyn Builder>) -> Self {
        self.loader = ApplicationLoader::new(builder);
        self
    }

    pub fn with_middleware(mut self, middleware: MiddlewareTable) -> Self {
        self.middleware = middleware;
        self
    }

    pub fn with_adapters(mut self, adapters: AdapterRegistry) -> Self {
        self.adapters = adapters;
        self
    }

    /// Replace the step that detaches the process when `daemonize` is set.
    pub fn with_daemonizer<F>(mut self, daemonizer: F) -> Self
    where
        F: Fn() -> Result<(), DaemonError> + Send + Sync + 'static,
    {
        self.daemonizer = Arc::new(daemonizer);
        self
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn middleware(&self) -> &MiddlewareTable {
        &self.middleware
    }

    pub fn phase(&self) -> Phase {
        self.lifecycle.phase()
    }

    /// The application, loaded on first access. A config file's `[options]`
    /// are merged into [`Server::options`] by that first access.
    pub fn app(&mut self) -> Result<&Router, LoadError> {
        self.loader.load(&mut self.options)
    }

    /// The server adapter named by the options, resolved on first access.
    pub fn adapter(&self) -> Result<Arc<dyn ServerAdapter>, AdapterError> {
        if let Some(adapter) = self.adapter.get() {
            return Ok(adapter.clone());
        }
        let adapter = self.adapters.resolve(self.options.server.as_deref())?;
        Ok(self.adapter.get_or_init(|| adapter).clone())
    }

    /// The application wrapped in the middleware stack of the active
    /// environment, built on first access.
    pub fn pipeline(&mut self) -> Result<&Router, StartupError> {
        let pipeline = match self.pipeline.take() {
            Some(pipeline) => pipeline,
            None => self.build_pipeline()?,
        };
        Ok(self.pipeline.insert(pipeline))
    }

    fn build_pipeline(&mut self) -> Result<Router, StartupError> {
        let app = self.app()?.clone();
        let pipeline = middleware::build(app, &self.options.environment, &self.middleware, self)?;
        if self.options.debug {
            tracing::debug!(options = ?self.options, "Resolved options");
            tracing::debug!(?pipeline, "Built pipeline");
        }
        Ok(pipeline)
    }

    /// Run the startup sequence and serve until the adapter stops.
    ///
    /// Irreversible steps (daemonization, process-wide settings) happen at
    /// most once; any error is fatal for the process.
    pub fn start(mut self) -> Result<(), StartupError> {
        // Apply process-wide settings, once per process
        ProcessSettings::from_options(&self.options).apply(&self.components)?;
        self.options.absolutize_paths();

        // Refuse early if a live process already holds the pid file
        if let Some(path) = &self.options.pid {
            pidfile::check(path)?;
        }

        // Build the application while the original working directory is current
        let pipeline = self.pipeline()?.clone();
        self.lifecycle.advance(Phase::AppLoaded)?;

        if self.options.daemonize {
            (self.daemonizer)()?;
            self.lifecycle.advance(Phase::Daemonized)?;
        }

        // Lock the pid file with the daemon's pid
        let pid_file = match &self.options.pid {
            Some(path) => {
                let pid_file = PidFile::acquire(path)?;
                self.lifecycle.advance(Phase::PidLocked)?;
                Some(pid_file)
            }
            None => None,
        };

        // No threads may exist before this point, the runtime starts after fork
        let adapter = self.adapter()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(StartupError::Runtime)?;
        let _context = runtime.enter();

        signals::install(
            adapter.shutdown_handle(),
            pid_file.as_ref().map(PidFile::cleanup),
        )
        .map_err(LifecycleError::Signals)?;
        self.lifecycle.advance(Phase::SignalArmed)?;

        self.lifecycle.advance(Phase::Running)?;
        tracing::info!(
            adapter = %adapter.name(),
            environment = %self.options.environment,
            pid = std::process::id(),
            "Server running"
        );
        let result = runtime.block_on(adapter.run(pipeline, &self.options));

        // Release the pid file before reporting the adapter's result
        drop(pid_file);
        tracing::info!("Server stopped");
        Ok(result?)
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("options", &self.options)
            .field("phase", &self.lifecycle.phase())
            .finish_non_exhaustive()
    }
}
