//! HTTP to HTTPS redirect server.
//!
//! Spawns a lightweight HTTP server on port 80 (or the configured port) that
//! redirects all requests to HTTPS.

use std::net::{IpAddr, SocketAddr};

use axum::http::Uri;
use axum::response::Redirect;
use axum::routing::any;
use axum::Router;
use axum_extra::extract::Host;

/// Spawn an HTTP server that redirects all requests to HTTPS.
///
/// This runs in the background and does not block.
pub fn spawn_redirect_server(ip: IpAddr, http_port: u16, https_port: u16) {
    tokio::spawn(async move {
        let addr = SocketAddr::new(ip, http_port);

        tracing::info!(
            http_port = %http_port,
            https_port = %https_port,
            "Starting HTTP->HTTPS redirect server"
        );

        let app = Router::new().fallback(any(move |Host(host): Host, uri: Uri| async move {
            Redirect::permanent(&https_url(&host, &uri, https_port))
        }));

        match axum_server::bind(addr).serve(app.into_make_service()).await {
            Ok(()) => {
                tracing::debug!("HTTP redirect server stopped");
            }
            Err(e) => {
                tracing::error!(error = %e, "HTTP redirect server failed");
            }
        }
    });
}

/// Build the HTTPS URL for a plain HTTP request.
fn https_url(host: &str, uri: &Uri, https_port: u16) -> String {
    // Remove port from host if present
    let host = host.split(':').next().unwrap_or(host);
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    let url = if https_port == 443 {
        format!("https://{}{}", host, path)
    } else {
        format!("https://{}:{}{}", host, https_port, path)
    };
    tracing::debug!(from = %uri, to = %url, "Redirecting HTTP to HTTPS");
    url
}
