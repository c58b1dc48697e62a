use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use receipt_common::{UsageCounters, UserPlan};
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::store::{NewUser, User};
use crate::AppState;

use super::authorize;

/// Optional profile fields; missing ones fall back to the token's claims.
#[derive(Debug, Default, Deserialize)]
pub struct CreateUserRequest {
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
struct ExistsResponse {
    exists: bool,
}

/// GET /api/users/me/plan
async fn get_plan(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<Json<UserPlan>> {
    let user = authorize(&state, &headers).await?;
    Ok(Json(state.store.get_user_plan(&user.sub)?))
}

/// GET /api/users/me/exists
async fn user_exists(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<Json<ExistsResponse>> {
    let user = authorize(&state, &headers).await?;
    let exists = state.store.user_exists(&user.sub)?;
    Ok(Json(ExistsResponse { exists }))
}

/// POST /api/users - register the caller on the free tier
async fn create_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<CreateUserRequest>>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let auth_user = authorize(&state, &headers).await?;
    let request = body.map(|Json(r)| r).unwrap_or_default();

    let user = state.store.create_user(NewUser {
        id: auth_user.sub,
        email: request.email.or(auth_user.email),
        name: request.name.or(auth_user.name),
    })?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /api/users/me/usage - counters for the current month
async fn get_usage(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<Json<UsageCounters>> {
    let user = authorize(&state, &headers).await?;
    Ok(Json(state.store.usage(&user.sub, Utc::now())?))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/users", post(create_user))
        .route("/api/users/me/plan", get(get_plan))
        .route("/api/users/me/exists", get(user_exists))
        .route("/api/users/me/usage", get(get_usage))
        .with_state(state)
}
