//! Resolved options and defaults.
//!
//! `Options` is the finalized configuration for one run. It is produced once by
//! the resolver in [`crate::cli`] and treated as immutable afterwards, except for
//! a single merge of the `[options]` table a configuration file may declare
//! (see [`OptionsOverlay`]). File values win on collision.

use std::collections::BTreeMap;
use std::path::PathBuf;

use const_format::formatcp;
use serde::{Deserialize, Serialize};

// =============================================================================
// Defaults
// =============================================================================

/// Environment variable naming the active environment.
pub const ENVIRONMENT_VAR: &str = "HOIST_ENV";

/// Environment used when neither the CLI nor `HOIST_ENV` name one
pub const DEFAULT_ENVIRONMENT: &str = "development";

/// Default listening port
pub const DEFAULT_PORT: u16 = 9292;

/// Host used in the development environment
pub const DEVELOPMENT_HOST: &str = "localhost";

/// Host used in every other environment (all interfaces)
pub const PUBLIC_HOST: &str = "0.0.0.0";

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "config.ru";

/// Default port for the plain HTTP redirect listener of the `tls` adapter
pub const DEFAULT_REDIRECT_PORT: u16 = 80;

/// Log filter when neither RUST_LOG nor a log level is set
pub const DEFAULT_LOG_FILTER: &str = formatcp!("{}=info,tower_http=info", env!("CARGO_CRATE_NAME"));

/// Log filter applied by the debug flag
pub const DEBUG_LOG_FILTER: &str = formatcp!("{}=debug,tower_http=debug", env!("CARGO_CRATE_NAME"));

/// Pick the default bind host for an environment.
pub fn default_host(environment: &str) -> &'static str {
    if environment == DEFAULT_ENVIRONMENT {
        DEVELOPMENT_HOST
    } else {
        PUBLIC_HOST
    }
}

/// Resolve `path` against the current working directory. Paths that cannot
/// be resolved are returned unchanged.
pub fn absolute_path(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    std::path::absolute(&path).unwrap_or(path)
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// Explicit filter directive (e.g. "hoist=debug"), overrides RUST_LOG
    #[serde(default)]
    pub level: Option<String>,
}

/// Certificate settings for the `tls` adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    /// Spawn a plain HTTP listener that redirects to HTTPS
    #[serde(default)]
    pub redirect_http: bool,
    #[serde(default = "TlsConfig::default_redirect_port")]
    pub redirect_port: u16,
}

impl TlsConfig {
    fn default_redirect_port() -> u16 {
        DEFAULT_REDIRECT_PORT
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_path: None,
            key_path: None,
            redirect_http: false,
            redirect_port: DEFAULT_REDIRECT_PORT,
        }
    }
}

/// Finalized options for a single run.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// Active environment name, selects the middleware stack
    pub environment: String,
    /// Server adapter name; `None` picks the default adapter
    pub server: Option<String>,
    pub host: String,
    pub port: u16,
    /// Pipeline-description file, used when `builder` is absent
    pub config: PathBuf,
    /// Inline pipeline description
    pub builder: Option<String>,
    pub daemonize: bool,
    pub pid: Option<PathBuf>,
    pub debug: bool,
    pub warn: bool,
    /// Suppresses the access log layer
    pub quiet: bool,
    /// Directories searched for a relative config path
    pub include: Vec<PathBuf>,
    /// Middleware components that must be registered before startup
    pub require: Vec<String>,
    pub logging: LoggingConfig,
    pub tls: TlsConfig,
    /// Adapter-specific keys not interpreted here
    pub extra: BTreeMap<String, toml::Value>,
}

impl Default for Options {
    fn default() -> Self {
        Self::for_environment(DEFAULT_ENVIRONMENT)
    }
}

impl Options {
    /// Defaults for a given environment (host depends on it).
    pub fn for_environment(environment: &str) -> Self {
        Self {
            environment: environment.to_string(),
            server: None,
            host: default_host(environment).to_string(),
            port: DEFAULT_PORT,
            config: PathBuf::from(DEFAULT_CONFIG_PATH),
            builder: None,
            daemonize: false,
            pid: None,
            debug: false,
            warn: false,
            quiet: false,
            include: Vec::new(),
            require: Vec::new(),
            logging: LoggingConfig::default(),
            tls: TlsConfig::default(),
            extra: BTreeMap::new(),
        }
    }

    /// Merge options declared by a configuration file. Every key the overlay
    /// sets overwrites the current value.
    pub fn merge(&mut self, overlay: OptionsOverlay) {
        let OptionsOverlay {
            environment,
            server,
            host,
            port,
            daemonize,
            pid,
            debug,
            warn,
            quiet,
            include,
            require,
            logging,
            tls,
            extra,
        } = overlay;

        if let Some(environment) = environment {
            self.environment = environment;
        }
        if server.is_some() {
            self.server = server;
        }
        if let Some(host) = host {
            self.host = host;
        }
        if let Some(port) = port {
            self.port = port;
        }
        if let Some(daemonize) = daemonize {
            self.daemonize = daemonize;
        }
        if let Some(pid) = pid {
            self.pid = Some(absolute_path(pid));
        }
        if let Some(debug) = debug {
            self.debug = debug;
        }
        if let Some(warn) = warn {
            self.warn = warn;
        }
        if let Some(quiet) = quiet {
            self.quiet = quiet;
        }
        if let Some(include) = include {
            self.include = include;
        }
        if let Some(require) = require {
            self.require = require;
        }
        if let Some(logging) = logging {
            self.logging = logging;
        }
        if let Some(tls) = tls {
            self.tls = tls;
        }
        self.extra.extend(extra);
    }

    /// Pin relative paths that are used after daemonizing (which changes the
    /// working directory to `/`) to the current working directory.
    pub fn absolutize_paths(&mut self) {
        self.pid = self.pid.take().map(absolute_path);
    }

    /// Write the resolved environment name back to `HOIST_ENV` so child
    /// processes and re-entrant loads observe the same value.
    pub fn export_environment(&self) {
        std::env::set_var(ENVIRONMENT_VAR, &self.environment);
    }
}

/// Options contributed by the `[options]` table of a configuration file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OptionsOverlay {
    pub environment: Option<String>,
    pub server: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub daemonize: Option<bool>,
    pub pid: Option<PathBuf>,
    pub debug: Option<bool>,
    pub warn: Option<bool>,
    pub quiet: Option<bool>,
    pub include: Option<Vec<PathBuf>>,
    pub require: Option<Vec<String>>,
    pub logging: Option<LoggingConfig>,
    pub tls: Option<TlsConfig>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

impl OptionsOverlay {
    /// True when the overlay would not change anything.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_host_depends_on_environment() {
        assert_eq!(Options::for_environment("development").host, "localhost");
        assert_eq!(Options::for_environment("deployment").host, "0.0.0.0");
        assert_eq!(Options::for_environment("staging").host, "0.0.0.0");
    }

    #[test]
    fn test_defaults() {
        let options = Options::default();
        assert_eq!(options.environment, "development");
        assert_eq!(options.port, 9292);
        assert_eq!(options.config, PathBuf::from("config.ru"));
        assert!(options.builder.is_none());
        assert!(!options.daemonize);
        assert!(options.pid.is_none());
    }

    #[test]
    fn test_merge_file_value_wins() {
        let mut options = Options::default();
        options.port = 3000;
        options.pid = Some(PathBuf::from("/tmp/cli.pid"));

        let overlay: OptionsOverlay = toml::from_str(
            r#"
            port = 8080
            pid = "/tmp/file.pid"
            "#,
        )
        .unwrap();
        options.merge(overlay);

        assert_eq!(options.port, 8080);
        assert_eq!(options.pid, Some(PathBuf::from("/tmp/file.pid")));
    }

    #[test]
    fn test_merge_makes_relative_pid_absolute() {
        let mut options = Options::default();
        let overlay: OptionsOverlay = toml::from_str(r#"pid = "run/file.pid""#).unwrap();
        options.merge(overlay);

        let expected = std::env::current_dir().unwrap().join("run/file.pid");
        assert_eq!(options.pid, Some(expected));
    }

    #[test]
    fn test_absolutize_paths() {
        let mut options = Options::default();
        options.pid = Some(PathBuf::from("hoist.pid"));
        options.absolutize_paths();
        assert!(options.pid.as_ref().unwrap().is_absolute());
        assert!(options.pid.as_ref().unwrap().ends_with("hoist.pid"));

        options.pid = Some(PathBuf::from("/var/run/hoist.pid"));
        options.absolutize_paths();
        assert_eq!(options.pid, Some(PathBuf::from("/var/run/hoist.pid")));
    }

    #[test]
    fn test_merge_keeps_unset_keys() {
        let mut options = Options::default();
        options.host = "127.0.0.1".to_string();
        options.daemonize = true;

        options.merge(OptionsOverlay {
            port: Some(1234),
            ..Default::default()
        });

        assert_eq!(options.host, "127.0.0.1");
        assert!(options.daemonize);
        assert_eq!(options.port, 1234);
    }

    #[test]
    fn test_merge_extra_keys_overwrite_individually() {
        let mut options = Options::default();
        options
            .extra
            .insert("workers".to_string(), toml::Value::Integer(2));
        options
            .extra
            .insert("keep".to_string(), toml::Value::Boolean(true));

        let overlay: OptionsOverlay = toml::from_str("workers = 8\nthreads = 4").unwrap();
        options.merge(overlay);

        assert_eq!(options.extra["workers"], toml::Value::Integer(8));
        assert_eq!(options.extra["threads"], toml::Value::Integer(4));
        assert_eq!(options.extra["keep"], toml::Value::Boolean(true));
    }

    #[test]
    fn test_overlay_nested_tables() {
        let overlay: OptionsOverlay = toml::from_str(
            r#"
            [logging]
            format = "json"

            [tls]
            cert_path = "/etc/hoist/cert.pem"
            key_path = "/etc/hoist/key.pem"
            "#,
        )
        .unwrap();

        let logging = overlay.logging.unwrap();
        assert_eq!(logging.format, LogFormat::Json);
        let tls = overlay.tls.unwrap();
        assert_eq!(tls.redirect_port, DEFAULT_REDIRECT_PORT);
        assert!(!tls.redirect_http);
        assert!(overlay.extra.is_empty());
    }

    #[test]
    fn test_empty_overlay() {
        let overlay: OptionsOverlay = toml::from_str("").unwrap();
        assert!(overlay.is_empty());
    }
}
