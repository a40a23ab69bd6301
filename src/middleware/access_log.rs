//! Per-request access logging.
//!
//! Generates a UUID v4 for each incoming request and creates a tracing span
//! that wraps the rest of the pipeline, so every log emitted while handling
//! the request carries the `request_id` field. On completion one access line
//! is emitted under the `access` target, either in Common Log Format or as
//! structured fields.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use chrono::{DateTime, FixedOffset, Local};
use http::header::CONTENT_LENGTH;
use http::{Method, Version};
use tracing::Instrument;
use uuid::Uuid;

use super::{string_arg, Component, MiddlewareError};

pub const NAME: &str = "access_log";

/// Extension type for accessing the request ID in handlers if needed.
#[derive(Clone, Debug)]
pub struct RequestId(pub Uuid);

/// Shape of the completion line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogStyle {
    /// Common Log Format line as the event message
    #[default]
    Common,
    /// Individual fields, for JSON log pipelines
    Structured,
}

impl LogStyle {
    fn from_args(args: &[toml::Value]) -> Result<Self, MiddlewareError> {
        match string_arg(NAME, args, 0)? {
            None | Some("common") => Ok(LogStyle::Common),
            Some("structured") => Ok(LogStyle::Structured),
            Some(other) => Err(MiddlewareError::InvalidArgs {
                component: NAME.to_string(),
                reason: format!("unknown log style {:?}, expected common or structured", other),
            }),
        }
    }
}

pub fn component() -> Component {
    Component::new(NAME, |app: Router, args: &[toml::Value]| {
        let style = LogStyle::from_args(args)?;
        Ok(app.layer(middleware::from_fn_with_state(style, access_log)))
    })
}

/// One finished request, as recorded in the access log.
#[derive(Debug)]
pub struct AccessEntry {
    pub remote: String,
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub status: u16,
    pub length: Option<String>,
    pub elapsed: Duration,
    pub time: DateTime<FixedOffset>,
}

impl AccessEntry {
    /// Render as a Common Log Format line with the request duration appended.
    pub fn common_line(&self) -> String {
        format!(
            "{} - - [{}] \"{} {} {:?}\" {} {} {:.4}",
            self.remote,
            self.time.format("%d/%b/%Y:%H:%M:%S %z"),
            self.method,
            self.target,
            self.version,
            self.status,
            self.length.as_deref().unwrap_or("-"),
            self.elapsed.as_secs_f64(),
        )
    }
}

fn remote_addr(request: &Request) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    if let Some(forwarded) = forwarded {
        return forwarded;
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Middleware that generates a request ID, opens a request span and logs completion.
pub async fn access_log(State(style): State<LogStyle>, request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let method = request.method().clone();
    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let version = request.version();
    let remote = remote_addr(&request);

    // Open the request span; duration is filled in on completion
    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %request.uri().path(),
        duration_ms = tracing::field::Empty,
    );

    let start = Instant::now();

    // Handlers can read the id back from the extensions
    let mut request = request;
    request.extensions_mut().insert(RequestId(request_id));

    async move {
        let response = next.run(request).await;

        // Record duration and write the completion line in the chosen style
        let elapsed = start.elapsed();
        let duration_ms = elapsed.as_millis() as u64;
        tracing::Span::current().record("duration_ms", duration_ms);

        let entry = AccessEntry {
            remote,
            method,
            target,
            version,
            status: response.status().as_u16(),
            length: response
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            elapsed,
            time: Local::now().into(),
        };

        match style {
            LogStyle::Common => {
                tracing::info!(target: "access", "{}", entry.common_line());
            }
            LogStyle::Structured => {
                tracing::info!(
                    target: "access",
                    remote = %entry.remote,
                    target_uri = %entry.target,
                    status = entry.status,
                    length = entry.length.as_deref().unwrap_or("-"),
                    duration_ms,
                    "Request completed"
                );
            }
        }

        response
    }
    .instrument(span)
    .await
}
