//! Sets `Content-Length` on responses whose body size is known up front.

use axum::body::HttpBody;
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use http::header::{HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};

use super::{status_has_body, Component};

pub const NAME: &str = "content_length";

pub fn component() -> Component {
    Component::new(NAME, |app: Router, _args: &[toml::Value]| {
        Ok(app.layer(middleware::from_fn(content_length)))
    })
}

pub async fn content_length(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    set_content_length(&mut response);
    response
}

/// Leaves streaming bodies and explicitly framed responses untouched.
pub fn set_content_length(response: &mut Response) {
    let headers = response.headers();
    if !status_has_body(response.status())
        || headers.contains_key(CONTENT_LENGTH)
        || headers.contains_key(TRANSFER_ENCODING)
    {
        return;
    }

    if let Some(length) = response.body().size_hint().exact() {
        response
            .headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from(length));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use http::StatusCode;
    use tower::ServiceExt;

    fn response(status: StatusCode, body: &'static str) -> Response {
        Response::builder()
            .status(status)
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_sets_length_through_router() {
        let app = Router::new().route("/", get(|| async { "hello" }));
        let app = component().apply(app, &[]).unwrap();
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.headers()[CONTENT_LENGTH], "5");
        assert!(!response.headers().contains_key(TRANSFER_ENCODING));
    }

    #[test]
    fn test_sets_length_for_full_body() {
        let mut r = response(StatusCode::OK, "hello");
        set_content_length(&mut r);
        assert_eq!(r.headers()[CONTENT_LENGTH], "5");
    }

    #[test]
    fn test_skips_bodyless_status() {
        let mut r = response(StatusCode::NO_CONTENT, "");
        set_content_length(&mut r);
        assert!(!r.headers().contains_key(CONTENT_LENGTH));
    }

    #[test]
    fn test_respects_existing_transfer_encoding() {
        let mut r = response(StatusCode::OK, "streamed");
        r.headers_mut()
            .insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        set_content_length(&mut r);
        assert!(!r.headers().contains_key(CONTENT_LENGTH));
    }
}
