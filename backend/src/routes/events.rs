//! Receipt lifecycle signals over HTTP.
//!
//! - `GET /api/events` streams the caller's signals as server-sent events.
//!   Browsers cannot set headers on `EventSource`, so the token may also be
//!   passed as `?token=`.
//! - `POST /api/events` publishes a signal about one of the caller's receipts.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use futures_util::stream::Stream;
use receipt_common::Signal;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as TokioStreamExt;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::store::StoreError;
use crate::AppState;

use super::authorize;

#[derive(Debug, Deserialize)]
pub struct SseAuthQuery {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEventRequest {
    pub event_name: Option<String>,
    pub event_data: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct SendEventResponse {
    success: bool,
}

async fn authorize_stream(state: &AppState, headers: &HeaderMap, query: &SseAuthQuery) -> ApiResult<AuthUser> {
    let user = match &query.token {
        Some(token) if !headers.contains_key(axum::http::header::AUTHORIZATION) => {
            state.jwks_client.validate_token(token).await?
        }
        _ => state.jwks_client.authenticate(headers).await?,
    };
    state.rate_limiter.check(&user.sub)?;
    Ok(user)
}

/// GET /api/events - SSE stream of signals for the caller's receipts
async fn stream_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<SseAuthQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let user = authorize_stream(&state, &headers, &query).await?;
    tracing::debug!("Event stream opened for {}", user.sub);

    let rx = state.signals.subscribe();
    let user_id = user.sub;

    let stream = TokioStreamExt::filter_map(BroadcastStream::new(rx), move |result| match result {
        Ok(signal) if signal.user_id() == user_id => match serde_json::to_string(&signal) {
            Ok(data) => Some(Ok(Event::default().event(signal.name()).data(data))),
            Err(_) => None,
        },
        // Other users' signals and lag notices
        _ => None,
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

/// POST /api/events - publish `{eventName, eventData}`
async fn send_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<SendEventRequest>,
) -> ApiResult<Json<SendEventResponse>> {
    let user = authorize(&state, &headers).await?;

    let (name, data) = match (request.event_name, request.event_data) {
        (Some(name), Some(data)) if !name.is_empty() => (name, data),
        _ => return Err(ApiError::invalid("Missing required fields: eventName and eventData")),
    };

    let signal = Signal::from_parts(&name, data)
        .map_err(|e| ApiError::invalid(format!("Invalid event {}: {}", name, e)))?;

    if signal.user_id() != user.sub {
        return Err(ApiError::Forbidden("Cannot publish events for another user".to_string()));
    }
    let receipt = state.store.get_receipt(signal.receipt_id())?;
    if receipt.user_id != user.sub {
        return Err(StoreError::NotFound("Receipt").into());
    }

    tracing::info!("Publishing {} for receipt {}", signal.name(), signal.receipt_id());
    state.signals.publish(signal);
    Ok(Json(SendEventResponse { success: true }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/events", get(stream_events).post(send_event))
        .with_state(state)
}
