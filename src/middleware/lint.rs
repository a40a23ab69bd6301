//! Strict conformance checks on responses.
//!
//! Violations never reach the client as-is: the response is replaced with a
//! 500 listing every problem found, and the problems are logged.

use axum::body::HttpBody;
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{Method, StatusCode};

use super::{status_has_body, Component};

pub const NAME: &str = "lint";

/// A single conformance problem.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("{header} header must not be set for status {status}")]
    HeaderOnBodylessStatus { status: u16, header: &'static str },

    #[error("Content-Length {0:?} is not a decimal length")]
    InvalidContentLength(String),

    #[error("Content-Length declares {declared} bytes but the body has {actual}")]
    ContentLengthMismatch { declared: u64, actual: u64 },

    #[error("Content-Length and Transfer-Encoding must not both be set")]
    ConflictingFraming,
}

pub fn component() -> Component {
    Component::new(NAME, |app: Router, _args: &[toml::Value]| {
        Ok(app.layer(middleware::from_fn(lint)))
    })
}

pub async fn lint(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let response = next.run(request).await;

    let violations = check_response(&method, &response);
    if violations.is_empty() {
        return response;
    }

    tracing::error!(
        method = %method,
        status = response.status().as_u16(),
        violations = ?violations,
        "Response failed conformance checks"
    );

    let body = violations
        .iter()
        .map(|violation| format!("- {}", violation))
        .collect::<Vec<_>>()
        .join("\n");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(CONTENT_TYPE, "text/plain; charset=utf-8")],
        format!("Response failed conformance checks:\n{}\n", body),
    )
        .into_response()
}

/// Collect every violation in `response`. HEAD responses skip the body length check.
pub fn check_response(method: &Method, response: &Response) -> Vec<Violation> {
    let mut violations = Vec::new();
    let status = response.status();
    let headers = response.headers();

    if !status_has_body(status) {
        // axum frames every empty body with `Content-Length: 0`
        let declares_length = headers
            .get(CONTENT_LENGTH)
            .is_some_and(|value| value.as_bytes() != b"0");
        for (present, header) in [
            (headers.contains_key(CONTENT_TYPE), "Content-Type"),
            (declares_length, "Content-Length"),
        ] {
            if present {
                violations.push(Violation::HeaderOnBodylessStatus {
                    status: status.as_u16(),
                    header,
                });
            }
        }
    }

    if headers.contains_key(CONTENT_LENGTH) && headers.contains_key(TRANSFER_ENCODING) {
        violations.push(Violation::ConflictingFraming);
    }

    if let Some(value) = headers.get(CONTENT_LENGTH) {
        let raw = String::from_utf8_lossy(value.as_bytes()).into_owned();
        match raw.trim().parse::<u64>() {
            Err(_) => violations.push(Violation::InvalidContentLength(raw)),
            Ok(declared) if *method != Method::HEAD && status_has_body(status) => {
                if let Some(actual) = response.body().size_hint().exact() {
                    if actual != declared {
                        violations.push(Violation::ContentLengthMismatch { declared, actual });
                    }
                }
            }
            Ok(_) => {}
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use tower::ServiceExt;

    fn response(
        status: StatusCode,
        headers: &[(http::HeaderName, &str)],
        body: &'static str,
    ) -> Response {
        let mut builder = Response::builder().status(status);
        for (name, value) in headers {
            builder = builder.header(name, *value);
        }
        builder.body(Body::from(body)).unwrap()
    }

    #[test]
    fn test_clean_response_passes() {
        let r = response(StatusCode::OK, &[(CONTENT_LENGTH, "2")], "ok");
        assert!(check_response(&Method::GET, &r).is_empty());
    }

    #[test]
    fn test_bodyless_status_with_content_type() {
        let r = response(StatusCode::NO_CONTENT, &[(CONTENT_TYPE, "text/html")], "");
        assert_eq!(
            check_response(&Method::GET, &r),
            vec![Violation::HeaderOnBodylessStatus {
                status: 204,
                header: "Content-Type"
            }]
        );
    }

    #[test]
    fn test_length_mismatch_and_conflict() {
        let r = response(
            StatusCode::OK,
            &[(CONTENT_LENGTH, "10"), (TRANSFER_ENCODING, "chunked")],
            "short",
        );
        let violations = check_response(&Method::GET, &r);
        assert!(violations.contains(&Violation::ConflictingFraming));
        assert!(violations.contains(&Violation::ContentLengthMismatch {
            declared: 10,
            actual: 5
        }));
    }

    #[test]
    fn test_head_skips_length_check() {
        let r = response(StatusCode::OK, &[(CONTENT_LENGTH, "10")], "");
        assert!(check_response(&Method::HEAD, &r).is_empty());
    }

    #[test]
    fn test_unparsable_length() {
        let r = response(StatusCode::OK, &[(CONTENT_LENGTH, "ten")], "0123456789");
        assert_eq!(
            check_response(&Method::GET, &r),
            vec![Violation::InvalidContentLength("ten".to_string())]
        );
    }

    #[test]
    fn test_bodyless_status_with_length() {
        let r = response(StatusCode::NO_CONTENT, &[(CONTENT_LENGTH, "3")], "");
        assert_eq!(
            check_response(&Method::GET, &r),
            vec![Violation::HeaderOnBodylessStatus {
                status: 204,
                header: "Content-Length"
            }]
        );
    }

    #[tokio::test]
    async fn test_no_content_through_router_passes() {
        let app = Router::new().route("/", get(|| async { StatusCode::NO_CONTENT }));
        let app = component().apply(app, &[]).unwrap();
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_violation_replaced_with_500() {
        let app = Router::new().route(
            "/",
            get(|| async { (StatusCode::NOT_MODIFIED, [(CONTENT_TYPE, "text/plain")]) }),
        );
        let app = component().apply(app, &[]).unwrap();
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
