//! Memoized application loading.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use axum::Router;

use super::builder::{BuildError, Builder};
use crate::config::Options;

/// Application loading error
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("configuration file not found: {}", path.display())]
    ConfigNotFound { path: PathBuf },

    #[error(transparent)]
    Build(#[from] BuildError),
}

/// Produces the application exactly once per run.
///
/// An inline description (`options.builder`) takes precedence over the
/// configuration file. When the file declares options they are merged into
/// `options` before the application is memoized, so callers reading options
/// after the first load observe the file's values.
pub struct ApplicationLoader {
    builder: Arc<dyn Builder>,
    app: OnceLock<Router>,
}

impl ApplicationLoader {
    pub fn new(builder: Arc<dyn Builder>) -> Self {
        Self {
            builder,
            app: OnceLock::new(),
        }
    }

    /// The memoized application, if it has been loaded.
    pub fn get(&self) -> Option<&Router> {
        self.app.get()
    }

    /// Load the application, or return the one already loaded.
    ///
    /// A failed load memoizes nothing; the next call tries again.
    pub fn load(&self, options: &mut Options) -> Result<&Router, LoadError> {
        if let Some(app) = self.app.get() {
            return Ok(app);
        }

        let app = match &options.builder {
            Some(source) => {
                tracing::debug!("Building application from inline description");
                self.builder.parse_str(source)?
            }
            None => {
                let path = resolve_config(&options.config, &options.include).ok_or_else(|| {
                    LoadError::ConfigNotFound {
                        path: options.config.clone(),
                    }
                })?;
                let (app, overlay) = self.builder.parse_file(&path)?;
                if !overlay.is_empty() {
                    tracing::debug!(config = %path.display(), ?overlay, "Merging file options");
                    options.merge(overlay);
                }
                tracing::info!(config = %path.display(), "Loaded application");
                app
            }
        };

        Ok(self.app.get_or_init(|| app))
    }
}

/// Locate the configuration file: the path itself, then, for relative paths,
/// each include directory in order.
pub fn resolve_config(config: &Path, include: &[PathBuf]) -> Option<PathBuf> {
    if config.is_file() {
        return Some(config.to_path_buf());
    }
    if config.is_absolute() {
        return None;
    }
    include
        .iter()
        .map(|dir| dir.join(config))
        .find(|candidate| candidate.is_file())
}
