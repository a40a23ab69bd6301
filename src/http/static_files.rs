//! Static file serving for `dir` routes.

use std::path::Path;

use tower_http::services::ServeDir;

/// Create a static file service for `dir`.
///
/// Files missing from `dir` are looked up in `fallback` when one is given.
/// Without a fallback the directory is its own fallback, which keeps the
/// return type the same in both cases.
pub fn create_static_service(dir: &Path, fallback: Option<&Path>) -> ServeDir<ServeDir> {
    ServeDir::new(dir).fallback(ServeDir::new(fallback.unwrap_or(dir)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::Request;
    use http::StatusCode;
    use tower::ServiceExt;

    async fn fetch(service: ServeDir<ServeDir>, path: &str) -> (StatusCode, Vec<u8>) {
        let response = service
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(Body::new(response.into_body()), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_falls_back_to_second_directory() {
        let primary = tempfile::tempdir().unwrap();
        let fallback = tempfile::tempdir().unwrap();
        std::fs::write(primary.path().join("a.txt"), "primary").unwrap();
        std::fs::write(fallback.path().join("a.txt"), "fallback").unwrap();
        std::fs::write(fallback.path().join("b.txt"), "only in fallback").unwrap();

        let service = create_static_service(primary.path(), Some(fallback.path()));
        assert_eq!(fetch(service.clone(), "/a.txt").await.1, b"primary");
        assert_eq!(fetch(service, "/b.txt").await.1, b"only in fallback");
    }

    #[tokio::test]
    async fn test_missing_file_without_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let service = create_static_service(dir.path(), None);
        assert_eq!(fetch(service, "/nope.txt").await.0, StatusCode::NOT_FOUND);
    }
}
