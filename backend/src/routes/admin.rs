//! Admin API routes, nested under `/admin`.
//!
//! Every route requires a bearer token carrying the `admin` role.

use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{post, put},
    Json, Router,
};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::store::{BillingDetails, NewUser, User};
use crate::AppState;

/// Middleware that requires an authenticated admin user.
async fn require_admin(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    match state.jwks_client.authenticate(request.headers()).await {
        Ok(user) if user.is_admin() => next.run(request).await,
        Ok(user) => {
            tracing::warn!("Admin access denied for {}", user.sub);
            ApiError::Forbidden("Admin access required".to_string()).into_response()
        }
        Err(e) => ApiError::Auth(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlanRequest {
    pub plan_tier: String,
    #[serde(flatten)]
    pub billing: BillingDetails,
}

#[derive(Debug, Deserialize)]
pub struct AdminCreateUserRequest {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// PUT /admin/users/:id/plan
async fn update_plan(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(request): Json<UpdatePlanRequest>,
) -> ApiResult<Json<User>> {
    Ok(Json(state.store.update_plan_tier(&user_id, &request.plan_tier, &request.billing)?))
}

/// POST /admin/users
async fn create_user(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AdminCreateUserRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    if request.id.trim().is_empty() {
        return Err(ApiError::invalid("id must not be empty"));
    }
    let user = state.store.create_user(NewUser {
        id: request.id,
        email: request.email,
        name: request.name,
    })?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// Build the admin router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/users", post(create_user))
        .route("/users/:id/plan", put(update_plan))
        .layer(middleware::from_fn_with_state(state.clone(), require_admin))
        .with_state(state)
}
