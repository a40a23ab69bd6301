//! Pipeline descriptions: turning TOML into an application.
//!
//! A description declares routes, optional application-level middleware and,
//! when it comes from a file, an `[options]` table merged into the run's
//! options. See [`TomlBuilder`] for the format.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use axum::response::Redirect;
use axum::routing::get;
use axum::Router;
use http::header::CONTENT_TYPE;
use http::StatusCode;
use serde::Deserialize;

use crate::config::OptionsOverlay;
use crate::http::static_files::create_static_service;
use crate::middleware::{wrap_all, ComponentRegistry, Layering, MiddlewareError};

/// Content type for `body` routes that do not declare one
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Pipeline description error
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed to read {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("failed to parse pipeline description: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid route {path}: {reason}")]
    InvalidRoute { path: String, reason: String },

    #[error("pipeline description defines no routes")]
    NoRoutes,

    #[error(transparent)]
    Middleware(#[from] MiddlewareError),
}

/// Constructs applications from pipeline descriptions.
pub trait Builder: Send + Sync {
    /// Parse a configuration file into an application plus the options it declares.
    fn parse_file(&self, path: &Path) -> Result<(Router, OptionsOverlay), BuildError>;

    /// Evaluate an inline description. Inline descriptions carry no options.
    fn parse_str(&self, source: &str) -> Result<Router, BuildError>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Description {
    health: Option<String>,
    options: Option<OptionsOverlay>,
    #[serde(default, rename = "use")]
    uses: Vec<UseEntry>,
    #[serde(default, rename = "route")]
    routes: Vec<RouteEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UseEntry {
    component: String,
    #[serde(default)]
    args: Vec<toml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RouteEntry {
    path: String,
    body: Option<String>,
    status: Option<u16>,
    content_type: Option<String>,
    dir: Option<PathBuf>,
    fallback: Option<PathBuf>,
    redirect: Option<String>,
}

/// Default builder: TOML descriptions with `route`, `use`, `health` and `options`.
///
/// ```toml
/// health = "/health"
///
/// [options]
/// port = 8080
///
/// [[use]]
/// component = "access_log"
/// args = ["structured"]
///
/// [[route]]
/// path = "/"
/// body = "Hello"
///
/// [[route]]
/// path = "/assets"
/// dir = "public"
/// ```
///
/// Relative `dir`/`fallback` paths are made absolute against the working
/// directory at build time, so they keep working after daemonization changes
/// the working directory.
#[derive(Clone, Debug)]
pub struct TomlBuilder {
    registry: ComponentRegistry,
}

impl Default for TomlBuilder {
    fn default() -> Self {
        Self::new(ComponentRegistry::builtin())
    }
}

impl TomlBuilder {
    pub fn new(registry: ComponentRegistry) -> Self {
        Self { registry }
    }

    fn build(&self, description: Description) -> Result<Router, BuildError> {
        let base = std::env::current_dir().map_err(|source| BuildError::Io {
            path: PathBuf::from("."),
            source,
        })?;

        if description.routes.is_empty() && description.health.is_none() {
            return Err(BuildError::NoRoutes);
        }

        // Validate every path up front: axum panics on conflicting routes
        let mut claims = PathClaims::default();
        if let Some(path) = &description.health {
            claims.claim(path, false)?;
        }
        for route in &description.routes {
            claims.claim(&route.path, route.dir.is_some())?;
        }

        let mut router = Router::new();
        if let Some(path) = description.health {
            router = router.route(&path, get(health));
        }
        for route in description.routes {
            router = add_route(router, route, &base)?;
        }

        let layerings = description
            .uses
            .into_iter()
            .map(|entry| {
                self.registry
                    .require(&entry.component)
                    .map(|component| component.clone().with_args(entry.args))
            })
            .collect::<Result<Vec<Layering>, _>>()?;

        Ok(wrap_all(router, &layerings)?)
    }
}

impl Builder for TomlBuilder {
    fn parse_file(&self, path: &Path) -> Result<(Router, OptionsOverlay), BuildError> {
        let contents = std::fs::read_to_string(path).map_err(|source| BuildError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut description: Description = toml::from_str(&contents)?;
        let overlay = description.options.take().unwrap_or_default();
        let router = self.build(description)?;
        Ok((router, overlay))
    }

    fn parse_str(&self, source: &str) -> Result<Router, BuildError> {
        let mut description: Description = toml::from_str(source)?;
        if description.options.take().is_some() {
            tracing::warn!("Ignoring [options] in inline pipeline description");
        }
        self.build(description)
    }
}

/// Health check handler.
///
/// Returns a simple "ok" response to indicate the service is running.
async fn health() -> &'static str {
    "ok"
}

/// Paths already taken by a description. A path and the same path with a
/// trailing slash are one claim, and a directory route owns every path below it.
#[derive(Debug, Default)]
struct PathClaims {
    paths: HashSet<String>,
    dirs: Vec<String>,
}

impl PathClaims {
    fn claim(&mut self, path: &str, subtree: bool) -> Result<(), BuildError> {
        let invalid = |reason: String| BuildError::InvalidRoute {
            path: path.to_string(),
            reason,
        };

        if !path.starts_with('/') {
            return Err(invalid("path must start with '/'".to_string()));
        }
        if path.contains(['{', '}', '*']) || path.split('/').any(|segment| segment.starts_with(':')) {
            return Err(invalid(
                "paths are literal, captures and wildcards are not supported".to_string(),
            ));
        }

        let key = match path.trim_end_matches('/') {
            "" => "/".to_string(),
            trimmed => trimmed.to_string(),
        };
        if self.paths.contains(&key) {
            return Err(invalid("path is declared more than once".to_string()));
        }
        if let Some(dir) = self.dirs.iter().find(|dir| is_below(&key, dir)) {
            return Err(invalid(format!("path lies under directory route {}", dir)));
        }
        // The root directory route is a fallback and owns nothing outright
        if subtree && key != "/" {
            if let Some(other) = self.paths.iter().find(|other| is_below(other, &key)) {
                return Err(invalid(format!("directory route would shadow {}", other)));
            }
            self.dirs.push(key.clone());
        }
        self.paths.insert(key);
        Ok(())
    }
}

fn is_below(path: &str, dir: &str) -> bool {
    path.strip_prefix(dir)
        .is_some_and(|rest| rest.starts_with('/'))
}

fn add_route(router: Router, route: RouteEntry, base: &Path) -> Result<Router, BuildError> {
    let invalid = |reason: &str| BuildError::InvalidRoute {
        path: route.path.clone(),
        reason: reason.to_string(),
    };

    match (&route.body, &route.dir, &route.redirect) {
        (Some(body), None, None) => {
            let code = route.status.unwrap_or(200);
            let status = StatusCode::from_u16(code)
                .ok()
                .filter(|_| (100..600).contains(&code))
                .ok_or_else(|| invalid("status must be between 100 and 599"))?;
            let content_type = route
                .content_type
                .clone()
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
            let body = body.clone();
            let handler = move || async move { (status, [(CONTENT_TYPE, content_type)], body) };
            Ok(router.route(&route.path, get(handler)))
        }
        (None, Some(dir), None) => {
            if route.path != "/" && route.path.ends_with('/') {
                return Err(invalid("directory paths must not end with '/'"));
            }
            let dir = base.join(dir);
            let fallback = route.fallback.as_ref().map(|fallback| base.join(fallback));
            let service = create_static_service(&dir, fallback.as_deref());
            if route.path == "/" {
                Ok(router.fallback_service(service))
            } else {
                Ok(router.nest_service(&route.path, service))
            }
        }
        (None, None, Some(target)) => {
            let target = target.clone();
            let handler = move || async move { Redirect::permanent(&target) };
            Ok(router.route(&route.path, get(handler)))
        }
        _ => Err(invalid("exactly one of body, dir or redirect must be set")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::Request;
    use tower::ServiceExt;

    async fn get_path(app: Router, path: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn test_body_route_and_health() {
        let app = TomlBuilder::default()
            .parse_str(
                r#"
                health = "/health"

                [[route]]
                path = "/"
                body = "Hello"
                status = 201
                "#,
            )
            .unwrap();

        assert_eq!(
            get_path(app.clone(), "/").await,
            (StatusCode::CREATED, "Hello".to_string())
        );
        assert_eq!(
            get_path(app, "/health").await,
            (StatusCode::OK, "ok".to_string())
        );
    }

    #[tokio::test]
    async fn test_redirect_route() {
        let app = TomlBuilder::default()
            .parse_str(
                r#"
                [[route]]
                path = "/old"
                redirect = "/new"
                "#,
            )
            .unwrap();
        let response = app
            .oneshot(Request::builder().uri("/old").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(response.headers()["location"], "/new");
    }

    #[tokio::test]
    async fn test_dir_route_serves_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("site.css"), "body {}").unwrap();

        let source = format!(
            "[[route]]\npath = \"/assets\"\ndir = {:?}\n",
            dir.path().display().to_string()
        );
        let app = TomlBuilder::default().parse_str(&source).unwrap();
        assert_eq!(
            get_path(app, "/assets/site.css").await,
            (StatusCode::OK, "body {}".to_string())
        );
    }

    #[test]
    fn test_file_options_are_returned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ru");
        std::fs::write(
            &path,
            r#"
            [options]
            port = 8080
            pid = "/tmp/from-file.pid"

            [[route]]
            path = "/"
            body = "hi"
            "#,
        )
        .unwrap();

        let (_app, overlay) = TomlBuilder::default().parse_file(&path).unwrap();
        assert_eq!(overlay.port, Some(8080));
        assert_eq!(overlay.pid, Some(PathBuf::from("/tmp/from-file.pid")));
    }

    #[test]
    fn test_inline_options_are_ignored() {
        let result = TomlBuilder::default().parse_str(
            r#"
            [options]
            port = 1

            [[route]]
            path = "/"
            body = "hi"
            "#,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_rejects_bad_routes() {
        let builder = TomlBuilder::default();

        let err = builder
            .parse_str("[[route]]\npath = \"nope\"\nbody = \"x\"\n")
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidRoute { .. }));

        let err = builder
            .parse_str("[[route]]\npath = \"/\"\nbody = \"x\"\n[[route]]\npath = \"/\"\nbody = \"y\"\n")
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidRoute { .. }));

        let err = builder
            .parse_str("[[route]]\npath = \"/\"\nbody = \"x\"\nredirect = \"/y\"\n")
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidRoute { .. }));

        let err = builder
            .parse_str("[[route]]\npath = \"/users/{id}\"\nbody = \"x\"\n")
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidRoute { .. }));

        let err = builder
            .parse_str("[[route]]\npath = \"/\"\nbody = \"x\"\nstatus = 42\n")
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidRoute { .. }));
    }

    #[test]
    fn test_trailing_slash_conflicts_with_dir_route() {
        let builder = TomlBuilder::default();
        for source in [
            "[[route]]\npath = \"/a/\"\nbody = \"x\"\n[[route]]\npath = \"/a\"\ndir = \"/tmp\"\n",
            "[[route]]\npath = \"/a\"\ndir = \"/tmp\"\n[[route]]\npath = \"/a/\"\nbody = \"x\"\n",
            "[[route]]\npath = \"/a/b\"\nbody = \"x\"\n[[route]]\npath = \"/a\"\ndir = \"/tmp\"\n",
            "[[route]]\npath = \"/a\"\ndir = \"/tmp\"\n[[route]]\npath = \"/a/b\"\nredirect = \"/\"\n",
        ] {
            let err = builder.parse_str(source).unwrap_err();
            assert!(matches!(err, BuildError::InvalidRoute { .. }), "{}", source);
        }
    }

    #[test]
    fn test_sibling_of_dir_route_allowed() {
        let result = TomlBuilder::default().parse_str(
            "[[route]]\npath = \"/a\"\ndir = \"/tmp\"\n[[route]]\npath = \"/ab\"\nbody = \"x\"\n[[route]]\npath = \"/\"\ndir = \"/tmp\"\n",
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_empty_description() {
        assert!(matches!(
            TomlBuilder::default().parse_str(""),
            Err(BuildError::NoRoutes)
        ));
    }

    #[test]
    fn test_unknown_component() {
        let err = TomlBuilder::default()
            .parse_str(
                r#"
                [[use]]
                component = "profiler"

                [[route]]
                path = "/"
                body = "hi"
                "#,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::Middleware(MiddlewareError::UnknownComponent(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = TomlBuilder::default()
            .parse_file(Path::new("/nonexistent/config.ru"))
            .unwrap_err();
        assert!(matches!(err, BuildError::Io { .. }));
    }
}
