use std::time::Instant;

use axum::{extract::Request, http, middleware::Next, response::Response};
use tracing::Span;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init(default_level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Middleware that logs HTTP requests at INFO level.
///
/// Upload paths carry a secret token, so only their prefix is logged.
pub async fn request_logger(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request_target(&request);

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        path = %path,
        status = %response.status().as_u16(),
        duration_ms = %start.elapsed().as_millis(),
        "HTTP request"
    );

    response
}

/// Span for `TraceLayer`. Records the redacted path only, never the query,
/// since `/api/events` takes its bearer token as `?token=`.
pub fn http_span<B>(request: &http::Request<B>) -> Span {
    tracing::info_span!(
        "http_request",
        method = %request.method(),
        path = %request_target(request),
    )
}

fn request_target<B>(request: &http::Request<B>) -> String {
    loggable_path(request.uri().path())
}

fn loggable_path(path: &str) -> String {
    match path.strip_prefix("/api/uploads/") {
        Some(_) => "/api/uploads/:token".to_string(),
        None => path.to_string(),
    }
}
