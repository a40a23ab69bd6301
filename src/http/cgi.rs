//! CGI adapter: one request per process.
//!
//! The request is described by the CGI meta-variables (RFC 3875) and the body
//! on stdin; the response is written to stdout as a `Status:` line, header
//! lines, a blank line and the body.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;
use axum::Router;
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::{Method, Version};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tower::ServiceExt;

use super::{AdapterError, ServerAdapter};
use crate::config::Options;
use crate::middleware::status_has_body;

pub(crate) const NAME: &str = "cgi";

/// Serves the single request described by the process environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct CgiAdapter;

#[async_trait]
impl ServerAdapter for CgiAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn is_one_shot(&self) -> bool {
        true
    }

    async fn run(&self, app: Router, _options: &Options) -> Result<(), AdapterError> {
        let vars: HashMap<String, String> = std::env::vars().collect();

        let length = content_length(&vars)?;
        let mut body = Vec::with_capacity(length);
        tokio::io::stdin()
            .take(length as u64)
            .read_to_end(&mut body)
            .await?;

        let request = request_from_env(&vars, body)?;
        tracing::debug!(method = %request.method(), uri = %request.uri(), "Serving CGI request");

        let response = match app.oneshot(request).await {
            Ok(response) => response,
            Err(infallible) => match infallible {},
        };
        let output = render_response(response).await?;

        let mut stdout = tokio::io::stdout();
        stdout.write_all(&output).await?;
        stdout.flush().await?;
        Ok(())
    }
}

fn content_length(vars: &HashMap<String, String>) -> Result<usize, AdapterError> {
    match vars.get("CONTENT_LENGTH").map(|v| v.trim()) {
        None | Some("") => Ok(0),
        Some(value) => value
            .parse()
            .map_err(|_| AdapterError::Cgi(format!("invalid CONTENT_LENGTH {:?}", value))),
    }
}

/// Build a request from CGI meta-variables and the request body.
pub fn request_from_env(
    vars: &HashMap<String, String>,
    body: Vec<u8>,
) -> Result<Request, AdapterError> {
    let var = |key: &str| vars.get(key).map(String::as_str).unwrap_or("");

    let method = Method::from_bytes(var("REQUEST_METHOD").as_bytes())
        .map_err(|_| AdapterError::Cgi(format!("invalid REQUEST_METHOD {:?}", var("REQUEST_METHOD"))))?;

    let mut path = format!("{}{}", var("SCRIPT_NAME"), var("PATH_INFO"));
    if path.is_empty() {
        path.push('/');
    }
    let query = var("QUERY_STRING");
    let uri = if query.is_empty() {
        path
    } else {
        format!("{}?{}", path, query)
    };

    let version = match var("SERVER_PROTOCOL") {
        "HTTP/1.0" => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let mut builder = Request::builder().method(method).uri(&uri).version(version);
    for (key, value) in vars {
        let name = match key.as_str() {
            "CONTENT_TYPE" => CONTENT_TYPE,
            "CONTENT_LENGTH" => CONTENT_LENGTH,
            other => match other.strip_prefix("HTTP_") {
                Some(header) => match HeaderName::from_bytes(header.replace('_', "-").as_bytes()) {
                    Ok(name) => name,
                    Err(_) => continue,
                },
                None => continue,
            },
        };
        if value.is_empty() {
            continue;
        }
        if let Ok(value) = HeaderValue::from_str(value) {
            builder = builder.header(name, value);
        }
    }

    builder
        .body(Body::from(body))
        .map_err(|e| AdapterError::Cgi(format!("invalid request URI {:?}: {}", uri, e)))
}

/// Connection-level headers; the web server in front of us owns framing.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Serialize a response in CGI output form.
///
/// The body is collected in full, so hop-by-hop headers are dropped and
/// `Content-Length` always matches the bytes written.
pub async fn render_response(response: Response) -> Result<Vec<u8>, AdapterError> {
    let (mut parts, body) = response.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| AdapterError::Cgi(format!("failed to read response body: {}", e)))?;

    let hop_by_hop: Vec<HeaderName> = parts
        .headers
        .keys()
        .filter(|name| is_hop_by_hop(name))
        .cloned()
        .collect();
    for name in hop_by_hop {
        parts.headers.remove(name);
    }
    if status_has_body(parts.status) {
        parts
            .headers
            .insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    } else {
        parts.headers.remove(CONTENT_LENGTH);
    }

    let mut output = format!(
        "Status: {} {}\r\n",
        parts.status.as_u16(),
        parts.status.canonical_reason().unwrap_or("")
    )
    .into_bytes();
    for (name, value) in &parts.headers {
        output.extend_from_slice(name.as_str().as_bytes());
        output.extend_from_slice(b": ");
        output.extend_from_slice(value.as_bytes());
        output.extend_from_slice(b"\r\n");
    }
    output.extend_from_slice(b"\r\n");
    output.extend_from_slice(&body);
    Ok(output)
}
