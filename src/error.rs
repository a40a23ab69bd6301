//! Fatal startup errors and the HTML error page.

use http::StatusCode;

use crate::app::LoadError;
use crate::http::AdapterError;
use crate::lifecycle::daemon::DaemonError;
use crate::lifecycle::pidfile::PidFileError;
use crate::lifecycle::settings::SettingsError;
use crate::lifecycle::LifecycleError;
use crate::middleware::MiddlewareError;

/// Any failure that stops the process before or while serving.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("failed to build middleware stack: {0}")]
    Middleware(#[from] MiddlewareError),

    #[error(transparent)]
    PidFile(#[from] PidFileError),

    #[error(transparent)]
    Daemon(#[from] DaemonError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl StartupError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        1
    }
}

/// Escape text for inclusion in HTML.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Render a standalone error page. `title` and `detail` are escaped.
pub fn error_page(status: StatusCode, title: &str, detail: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Error {code}</title>
</head>
<body>
    <div class="error-page">
        <h1>Error {code}: {title}</h1>
        <pre>{detail}</pre>
    </div>
</body>
</html>"#,
        code = status.as_u16(),
        title = escape_html(title),
        detail = escape_html(detail),
    )
}
