//! Marks HTTP/1.1 responses of unknown length for chunked transfer encoding.
//!
//! axum frames exact-size bodies with `Content-Length` itself, so only
//! streaming bodies are left for this layer.

use axum::body::HttpBody;
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use http::header::{HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::Version;

use super::{status_has_body, Component};

pub const NAME: &str = "chunked";

pub fn component() -> Component {
    Component::new(NAME, |app: Router, _args: &[toml::Value]| {
        Ok(app.layer(middleware::from_fn(chunked)))
    })
}

pub async fn chunked(request: Request, next: Next) -> Response {
    let version = request.version();
    let mut response = next.run(request).await;
    mark_chunked(version, &mut response);
    response
}

/// Add `Transfer-Encoding: chunked` when nothing else frames the body.
pub fn mark_chunked(version: Version, response: &mut Response) {
    let headers = response.headers();
    if version != Version::HTTP_11
        || !status_has_body(response.status())
        || headers.contains_key(CONTENT_LENGTH)
        || headers.contains_key(TRANSFER_ENCODING)
        || response.body().size_hint().exact().is_some()
    {
        return;
    }
    response
        .headers_mut()
        .insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
}
