use std::sync::Arc;

use axum::http::HeaderValue;
use axum::middleware;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use receipt_backend::auth::JwksClient;
use receipt_backend::config::Config;
use receipt_backend::{logging, routes, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    logging::init(&config.logging.level);
    tracing::info!("Starting Receipt Tracker API");

    // Initialize components
    let jwks_client = JwksClient::new(&config.oidc.issuer, config.oidc.audience.as_deref()).await?;
    let (state, triggers) = AppState::new(config.clone(), jwks_client)?;
    let state = Arc::new(state);

    // Background extraction; the first recovery sweep picks up jobs left by a previous run
    let _dispatcher = state.spawn_extraction(triggers)?;

    // Build CORS layer
    let allow_origin = match config.cors_origins() {
        Some(origins) => AllowOrigin::list(
            origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok()),
        ),
        None => AllowOrigin::from(Any),
    };
    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router
    let app = routes::router(state)
        .layer(middleware::from_fn(logging::request_logger))
        .layer(cors)
        .layer(TraceLayer::new_for_http().make_span_with(logging::http_span));

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
