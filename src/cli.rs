//! Command-line arguments and option resolution.
//!
//! Resolution priority is CLI flag > environment variable > default. The
//! result is a finalized [`Options`]; the configuration file can still merge
//! its own `[options]` table later, during application loading.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{
    absolute_path, default_host, LogFormat, Options, DEFAULT_CONFIG_PATH, DEFAULT_ENVIRONMENT,
    ENVIRONMENT_VAR,
};

/// hoist: boot an application pipeline and hand it to a server adapter
#[derive(Parser, Debug)]
#[command(name = "hoist", version, about)]
pub struct Args {
    /// Pipeline-description file
    #[arg(default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Inline pipeline description, used instead of the config file
    #[arg(short, long)]
    pub builder: Option<String>,

    /// Server adapter (http, tls, cgi)
    #[arg(short, long)]
    pub server: Option<String>,

    /// Address to bind (default: localhost in development, 0.0.0.0 otherwise)
    #[arg(short = 'o', long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Environment name (default: $HOIST_ENV or "development")
    #[arg(short = 'E', long = "env")]
    pub environment: Option<String>,

    /// Run in the background as a daemon
    #[arg(short = 'D', long)]
    pub daemonize: bool,

    /// Write the process id to this file, refusing to start if it is held
    #[arg(short = 'P', long)]
    pub pid: Option<PathBuf>,

    /// Enable debug logging and dump the resolved pipeline
    #[arg(short, long)]
    pub debug: bool,

    /// Report warnings from every component, not just this crate
    #[arg(short, long)]
    pub warn: bool,

    /// Turn off the access log
    #[arg(short, long)]
    pub quiet: bool,

    /// Directories searched for the config file (repeatable, ':'-separated)
    #[arg(short = 'I', long)]
    pub include: Vec<String>,

    /// Middleware component that must be available (repeatable)
    #[arg(short, long)]
    pub require: Vec<String>,

    /// Log output format
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Log level filter (e.g., "hoist=debug,tower_http=info")
    #[arg(short, long)]
    pub log_level: Option<String>,
}

/// Turns parsed arguments into finalized [`Options`].
pub struct ConfigResolver<F> {
    lookup: F,
}

impl ConfigResolver<fn(&str) -> Option<String>> {
    /// Resolver reading the real process environment.
    pub fn from_process_env() -> Self {
        fn lookup(key: &str) -> Option<String> {
            std::env::var(key).ok()
        }
        Self { lookup }
    }
}

impl<F> ConfigResolver<F>
where
    F: Fn(&str) -> Option<String>,
{
    pub fn new(lookup: F) -> Self {
        Self { lookup }
    }

    pub fn resolve(&self, args: Args) -> Options {
        let environment = args
            .environment
            .or_else(|| (self.lookup)(ENVIRONMENT_VAR).filter(|env| !env.is_empty()))
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());

        let mut options = Options::for_environment(&environment);
        options.host = args
            .host
            .unwrap_or_else(|| default_host(&environment).to_string());
        if let Some(port) = args.port {
            options.port = port;
        }
        options.config = args.config;
        options.builder = args.builder;
        options.server = args.server;
        options.daemonize = args.daemonize;
        options.pid = args.pid.map(absolute_path);
        options.debug = args.debug;
        options.warn = args.warn;
        options.quiet = args.quiet;
        options.include = args
            .include
            .iter()
            .flat_map(|paths| paths.split(':'))
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
            .collect();
        options.require = args.require;
        if let Some(format) = args.log_format {
            options.logging.format = format;
        }
        options.logging.level = args.log_level;

        options
    }
}
