use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use receipt_common::{
    parse_receipt_date, MonthlySummary, Receipt, ReceiptPatch, ReceiptStatus, ReceiptUploaded, Signal,
    UserStats,
};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::store::{ReceiptQuery, StoreError};
use crate::AppState;

use super::{authorize, files::owned_file};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReceiptRequest {
    pub file_id: String,
    pub file_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub limit: Option<usize>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryParams {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

fn parse_date_param(name: &str, value: Option<&str>) -> ApiResult<Option<DateTime<Utc>>> {
    match value {
        None => Ok(None),
        Some(raw) => parse_receipt_date(raw)
            .map(Some)
            .ok_or_else(|| ApiError::invalid(format!("Invalid {}: {}", name, raw))),
    }
}

/// Load a receipt, hiding receipts owned by someone else.
fn owned_receipt(state: &AppState, receipt_id: &str, user_id: &str) -> Result<Receipt, StoreError> {
    let receipt = state.store.get_receipt(receipt_id)?;
    if receipt.user_id != user_id {
        return Err(StoreError::NotFound("Receipt"));
    }
    Ok(receipt)
}

/// POST /api/receipts - create a receipt for an uploaded file and queue extraction
async fn create_receipt(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateReceiptRequest>,
) -> ApiResult<(StatusCode, Json<Receipt>)> {
    let user = authorize(&state, &headers).await?;
    if request.file_name.trim().is_empty() {
        return Err(ApiError::invalid("fileName must not be empty"));
    }

    owned_file(&state, &request.file_id, &user.sub)?;
    match state.files.is_pdf(&request.file_id) {
        Ok(true) => {}
        Ok(false) => tracing::warn!(
            "File {} for receipt upload is not a PDF, extraction may fail",
            request.file_id
        ),
        Err(e) => tracing::warn!("Could not inspect file {}: {}", request.file_id, e),
    }

    let receipt = state
        .store
        .create_receipt(&user.sub, &request.file_id, &request.file_name, Utc::now())?;

    state.signals.publish(Signal::Uploaded(ReceiptUploaded {
        user_id: receipt.user_id.clone(),
        receipt_id: receipt.id.clone(),
        file_id: receipt.file_id.clone(),
    }));

    Ok((StatusCode::CREATED, Json(receipt)))
}

/// GET /api/receipts?limit=N&dateFrom=..&dateTo=..
async fn list_receipts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<Receipt>>> {
    let user = authorize(&state, &headers).await?;
    let query = ReceiptQuery {
        limit: params.limit,
        date_from: parse_date_param("dateFrom", params.date_from.as_deref())?,
        date_to: parse_date_param("dateTo", params.date_to.as_deref())?,
    };
    Ok(Json(state.store.list_receipts(&user.sub, &query)?))
}

/// GET /api/receipts/stats
async fn get_stats(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<Json<UserStats>> {
    let user = authorize(&state, &headers).await?;
    Ok(Json(state.store.user_stats(&user.sub, Utc::now())?))
}

/// GET /api/receipts/summary?startDate=..&endDate=..
async fn get_summary(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<SummaryParams>,
) -> ApiResult<Json<MonthlySummary>> {
    let user = authorize(&state, &headers).await?;
    let start = parse_date_param("startDate", params.start_date.as_deref())?
        .ok_or_else(|| ApiError::invalid("Missing required parameter: startDate"))?;
    let end = parse_date_param("endDate", params.end_date.as_deref())?
        .ok_or_else(|| ApiError::invalid("Missing required parameter: endDate"))?;
    if end < start {
        return Err(ApiError::invalid("endDate must not be before startDate"));
    }

    Ok(Json(state.store.monthly_summary(&user.sub, start, end)?))
}

/// GET /api/receipts/:id
async fn get_receipt(
    State(state): State<Arc<AppState>>,
    Path(receipt_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Receipt>> {
    let user = authorize(&state, &headers).await?;
    Ok(Json(owned_receipt(&state, &receipt_id, &user.sub)?))
}

/// PATCH /api/receipts/:id
async fn patch_receipt(
    State(state): State<Arc<AppState>>,
    Path(receipt_id): Path<String>,
    headers: HeaderMap,
    Json(patch): Json<ReceiptPatch>,
) -> ApiResult<Json<Receipt>> {
    let user = authorize(&state, &headers).await?;
    let current = owned_receipt(&state, &receipt_id, &user.sub)?;

    // Completed, failed and processing belong to the extraction workflow
    if let Some(to) = patch.status.filter(|s| *s != ReceiptStatus::ManualEdit) {
        return Err(StoreError::InvalidTransition { from: current.status, to }.into());
    }

    let patch = patch.into_user_edit();
    Ok(Json(state.store.patch_receipt(&receipt_id, &patch, Utc::now())?))
}

/// DELETE /api/receipts/:id
async fn delete_receipt(
    State(state): State<Arc<AppState>>,
    Path(receipt_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let user = authorize(&state, &headers).await?;
    owned_receipt(&state, &receipt_id, &user.sub)?;
    state.store.delete_receipt(&receipt_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/receipts", get(list_receipts).post(create_receipt))
        .route("/api/receipts/stats", get(get_stats))
        .route("/api/receipts/summary", get(get_summary))
        .route(
            "/api/receipts/:id",
            get(get_receipt).patch(patch_receipt).delete(delete_receipt),
        )
        .with_state(state)
}
