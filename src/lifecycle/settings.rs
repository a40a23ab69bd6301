//! Process-wide settings applied once at startup.
//!
//! Everything [`ProcessSettings::apply`] does lasts for the rest of the
//! process: the global tracing subscriber cannot be replaced, and the
//! include and require checks describe the process's environment.

use std::path::PathBuf;

use crate::config::{LoggingConfig, Options};
use crate::middleware::ComponentRegistry;
use crate::observability;

/// Settings error
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("required middleware component {0} is not available")]
    MissingComponent(String),
}

/// The slice of [`Options`] with process-global effects.
#[derive(Debug, Clone)]
pub struct ProcessSettings {
    pub debug: bool,
    pub warn: bool,
    pub logging: LoggingConfig,
    pub include: Vec<PathBuf>,
    pub require: Vec<String>,
}

impl ProcessSettings {
    pub fn from_options(options: &Options) -> Self {
        Self {
            debug: options.debug,
            warn: options.warn,
            logging: options.logging.clone(),
            include: options.include.clone(),
            require: options.require.clone(),
        }
    }

    /// Install logging, report include directories and verify required
    /// components are registered.
    pub fn apply(self, components: &ComponentRegistry) -> Result<(), SettingsError> {
        if observability::init_tracing(self.debug, self.warn, &self.logging).is_err() {
            tracing::debug!("Tracing subscriber already installed, keeping it");
        }

        for dir in &self.include {
            if dir.is_dir() {
                tracing::debug!(dir = %dir.display(), "Config search directory");
            } else {
                tracing::warn!(dir = %dir.display(), "Include directory does not exist");
            }
        }

        for name in &self.require {
            if !components.contains(name) {
                return Err(SettingsError::MissingComponent(name.clone()));
            }
            tracing::debug!(component = %name, "Required component available");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_options() {
        let mut options = Options::default();
        options.debug = true;
        options.require = vec!["lint".to_string()];
        let settings = ProcessSettings::from_options(&options);
        assert!(settings.debug);
        assert!(!settings.warn);
        assert_eq!(settings.require, vec!["lint"]);
    }

    #[test]
    fn test_require_known_components() {
        let mut options = Options::default();
        options.require = vec!["lint".to_string(), "access_log".to_string()];
        options.include = vec![PathBuf::from("/nonexistent")];
        assert!(ProcessSettings::from_options(&options)
            .apply(&ComponentRegistry::builtin())
            .is_ok());
    }

    #[test]
    fn test_require_unknown_component() {
        let mut options = Options::default();
        options.require = vec!["profiler".to_string()];
        let err = ProcessSettings::from_options(&options)
            .apply(&ComponentRegistry::builtin())
            .unwrap_err();
        assert!(matches!(err, SettingsError::MissingComponent(name) if name == "profiler"));
    }
}
