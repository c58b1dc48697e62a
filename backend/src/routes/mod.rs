pub mod admin;
pub mod events;
pub mod files;
pub mod health;
pub mod receipts;
pub mod users;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::Router;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::AppState;

/// Authenticate the caller and charge one request against their rate limit.
pub(crate) async fn authorize(state: &AppState, headers: &HeaderMap) -> ApiResult<AuthUser> {
    let user = state.jwks_client.authenticate(headers).await?;
    state.rate_limiter.check(&user.sub)?;
    Ok(user)
}

/// All routes of the service.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router())
        .merge(users::router(state.clone()))
        .merge(files::router(state.clone()))
        .merge(receipts::router(state.clone()))
        .merge(events::router(state.clone()))
        .nest("/admin", admin::router(state))
}
