//! Deletes per-request temporary files once the response is produced.
//!
//! Handlers reach the registry through the `Extension<Tempfiles>` extractor
//! and register any file they create while handling the request.

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;

use super::Component;

pub const NAME: &str = "tempfile_reaper";

/// Paths to delete when the current request completes.
#[derive(Clone, Debug, Default)]
pub struct Tempfiles(Arc<Mutex<Vec<PathBuf>>>);

impl Tempfiles {
    pub fn register(&self, path: impl Into<PathBuf>) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.into());
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete every registered file. Files already gone are ignored.
    pub fn reap(&self) {
        let paths = std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner));
        for path in paths {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "Removed request tempfile"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove request tempfile")
                }
            }
        }
    }
}

pub fn component() -> Component {
    Component::new(NAME, |app: Router, _args: &[toml::Value]| {
        Ok(app.layer(middleware::from_fn(reap_tempfiles)))
    })
}

pub async fn reap_tempfiles(mut request: Request, next: Next) -> Response {
    let tempfiles = Tempfiles::default();
    request.extensions_mut().insert(tempfiles.clone());

    let response = next.run(request).await;
    tempfiles.reap();
    response
}
