//! Renders panics raised inside the pipeline as a 500 debug page.

use std::any::Any;

use axum::response::{Html, IntoResponse, Response};
use axum::Router;
use http::StatusCode;
use tower_http::catch_panic::CatchPanicLayer;

use super::Component;
use crate::error::error_page;

pub const NAME: &str = "show_exceptions";

pub fn component() -> Component {
    Component::new(NAME, |app: Router, _args: &[toml::Value]| {
        Ok(app.layer(CatchPanicLayer::custom(render_panic)))
    })
}

/// Turn a caught panic payload into an HTML error response.
pub fn render_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic_message(&*panic);
    tracing::error!(panic = %message, "Request handler panicked");

    let body = error_page(StatusCode::INTERNAL_SERVER_ERROR, "Unhandled panic", &message);
    (StatusCode::INTERNAL_SERVER_ERROR, Html(body)).into_response()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else {
        "panic with a non-string payload".to_string()
    }
}
