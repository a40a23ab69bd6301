//! Middleware stack assembly.
//!
//! A stack is an ordered list of [`MiddlewareSpec`]s per environment name. At
//! build time the list is walked in reverse and every entry wraps the
//! application built so far, so the first-listed component ends up outermost:
//! `[A, B, C]` produces `A(B(C(app)))`.
//!
//! Entries are either a concrete [`Layering`] (component plus arguments) or a
//! factory evaluated against the live [`Server`], which may decline to
//! contribute a layer by returning `None`.

pub mod access_log;
pub mod chunked;
pub mod content_length;
pub mod lint;
pub mod show_exceptions;
pub mod tempfile_reaper;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use axum::Router;
use http::StatusCode;

use crate::lifecycle::Server;

/// Name of the environment used for production deployments
pub const DEPLOYMENT: &str = "deployment";

/// Name of the environment used for local development
pub const DEVELOPMENT: &str = "development";

/// Middleware construction error
#[derive(Debug, thiserror::Error)]
pub enum MiddlewareError {
    #[error("unknown middleware component: {0}")]
    UnknownComponent(String),

    #[error("invalid arguments for {component}: {reason}")]
    InvalidArgs {
        component: String,
        reason: String,
    },
}

type Wrap = dyn Fn(Router, &[toml::Value]) -> Result<Router, MiddlewareError> + Send + Sync;

/// A named wrapping step: given the current application and arguments,
/// returns the wrapped application.
#[derive(Clone)]
pub struct Component {
    name: String,
    wrap: Arc<Wrap>,
}

impl Component {
    pub fn new<F>(name: impl Into<String>, wrap: F) -> Self
    where
        F: Fn(Router, &[toml::Value]) -> Result<Router, MiddlewareError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            wrap: Arc::new(wrap),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wrap `app` with this component.
    pub fn apply(&self, app: Router, args: &[toml::Value]) -> Result<Router, MiddlewareError> {
        (self.wrap)(app, args)
    }

    /// Pair this component with constructor arguments.
    pub fn with_args(self, args: Vec<toml::Value>) -> Layering {
        Layering {
            component: self,
            args,
        }
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component").field("name", &self.name).finish()
    }
}

/// A concrete stack entry: component plus constructor arguments.
#[derive(Clone, Debug)]
pub struct Layering {
    pub component: Component,
    pub args: Vec<toml::Value>,
}

impl Layering {
    pub fn apply(&self, app: Router) -> Result<Router, MiddlewareError> {
        tracing::trace!(component = %self.component.name(), "Applying middleware");
        self.component.apply(app, &self.args)
    }
}

impl From<Component> for Layering {
    fn from(component: Component) -> Self {
        component.with_args(Vec::new())
    }
}

type Factory = dyn Fn(&Server) -> Option<Layering> + Send + Sync;

/// One entry of an environment's middleware list.
#[derive(Clone)]
pub enum MiddlewareSpec {
    /// Always applied
    Use(Layering),
    /// Evaluated at build time; `None` skips the entry
    Factory(Arc<Factory>),
}

impl MiddlewareSpec {
    pub fn factory<F>(factory: F) -> Self
    where
        F: Fn(&Server) -> Option<Layering> + Send + Sync + 'static,
    {
        Self::Factory(Arc::new(factory))
    }

    /// Resolve this entry against the live server.
    pub fn resolve(&self, server: &Server) -> Option<Layering> {
        match self {
            MiddlewareSpec::Use(layering) => Some(layering.clone()),
            MiddlewareSpec::Factory(factory) => factory(server),
        }
    }
}

impl From<Layering> for MiddlewareSpec {
    fn from(layering: Layering) -> Self {
        MiddlewareSpec::Use(layering)
    }
}

impl From<Component> for MiddlewareSpec {
    fn from(component: Component) -> Self {
        MiddlewareSpec::Use(component.into())
    }
}

impl fmt::Debug for MiddlewareSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MiddlewareSpec::Use(layering) => f.debug_tuple("Use").field(layering).finish(),
            MiddlewareSpec::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// Components addressable by name, from `[[use]]` entries and `--require`.
#[derive(Clone, Debug, Default)]
pub struct ComponentRegistry {
    components: HashMap<String, Component>,
}

impl ComponentRegistry {
    /// Registry holding every built-in component.
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.register(content_length::component());
        registry.register(chunked::component());
        registry.register(access_log::component());
        registry.register(show_exceptions::component());
        registry.register(lint::component());
        registry.register(tempfile_reaper::component());
        registry
    }

    pub fn register(&mut self, component: Component) {
        self.components.insert(component.name().to_string(), component);
    }

    pub fn get(&self, name: &str) -> Option<&Component> {
        self.components.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    /// Look up a component, failing with `UnknownComponent`.
    pub fn require(&self, name: &str) -> Result<&Component, MiddlewareError> {
        self.get(name)
            .ok_or_else(|| MiddlewareError::UnknownComponent(name.to_string()))
    }
}

/// Middleware lists keyed by environment name.
#[derive(Clone, Debug)]
pub struct MiddlewareTable {
    stacks: HashMap<String, Vec<MiddlewareSpec>>,
}

impl MiddlewareTable {
    /// An empty table: every environment builds the bare application.
    pub fn empty() -> Self {
        Self {
            stacks: HashMap::new(),
        }
    }

    /// Replace the list for `environment`.
    pub fn insert(&mut self, environment: impl Into<String>, specs: Vec<MiddlewareSpec>) {
        self.stacks.insert(environment.into(), specs);
    }

    /// The list for `environment`; unknown names yield an empty list.
    pub fn stack(&self, environment: &str) -> &[MiddlewareSpec] {
        self.stacks
            .get(environment)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl Default for MiddlewareTable {
    fn default() -> Self {
        let mut table = Self::empty();
        table.insert(
            DEPLOYMENT,
            vec![
                content_length::component().into(),
                chunked::component().into(),
                logging_factory(),
                tempfile_reaper::component().into(),
            ],
        );
        table.insert(
            DEVELOPMENT,
            vec![
                content_length::component().into(),
                chunked::component().into(),
                logging_factory(),
                show_exceptions::component().into(),
                lint::component().into(),
                tempfile_reaper::component().into(),
            ],
        );
        table
    }
}

/// Access logging, unless the adapter is a one-shot process or the run is quiet.
pub fn logging_factory() -> MiddlewareSpec {
    MiddlewareSpec::factory(|server: &Server| {
        let one_shot = server
            .adapter()
            .map(|adapter| adapter.is_one_shot())
            .unwrap_or(false);
        if one_shot || server.options().quiet {
            None
        } else {
            Some(access_log::component().into())
        }
    })
}

/// Wrap `app` with the stack for `environment`, last entry innermost.
pub fn build(
    app: Router,
    environment: &str,
    table: &MiddlewareTable,
    server: &Server,
) -> Result<Router, MiddlewareError> {
    let mut app = app;
    for spec in table.stack(environment).iter().rev() {
        let Some(layering) = spec.resolve(server) else {
            tracing::debug!(environment, "Middleware factory declined, skipping");
            continue;
        };
        app = layering.apply(app)?;
    }
    Ok(app)
}

/// Wrap `app` with concrete layerings, first entry outermost.
pub fn wrap_all(app: Router, layerings: &[Layering]) -> Result<Router, MiddlewareError> {
    layerings
        .iter()
        .rev()
        .try_fold(app, |app, layering| layering.apply(app))
}

/// Statuses that never carry a response body (1xx, 204, 304).
pub fn status_has_body(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

/// Read an optional string argument at `index`.
pub(crate) fn string_arg<'a>(
    component: &str,
    args: &'a [toml::Value],
    index: usize,
) -> Result<Option<&'a str>, MiddlewareError> {
    match args.get(index) {
        None => Ok(None),
        Some(toml::Value::String(value)) => Ok(Some(value.as_str())),
        Some(other) => Err(MiddlewareError::InvalidArgs {
            component: component.to_string(),
            reason: format!("argument {} must be a string, got {}", index, other.type_str()),
        }),
    }
}
