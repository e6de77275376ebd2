use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use tracing::warn;

use super::dto::{
    ApiResponse, DepositRequest, LetterResponse, OverrideRequest, WillDraftRequest, WillView,
};
use super::error::{ApiError, ApiResult};
use super::extract::{ApiJson, ApiPath};
use super::AppState;
use crate::engine::WillDraft;
use crate::identity::Caller;
use crate::will::WillId;

// ── health ───────────────────────────────────────────────────────────────────

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn health_db(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    state
        .engine
        .store()
        .ping()
        .await
        .map_err(|e| ApiError::Internal(format!("database unavailable: {e}")))?;
    Ok(Json(json!({ "status": "ok", "database": "connected" })))
}

// ── owner operations ─────────────────────────────────────────────────────────

pub async fn create_will(
    State(state): State<AppState>,
    caller: Caller,
    ApiJson(body): ApiJson<WillDraftRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<WillView>>)> {
    let draft = WillDraft::try_from(body).map_err(|e| ApiError::Validation(e.to_string()))?;
    let record = state.engine.create_draft(&caller, draft).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message("Will draft created", record.into())),
    ))
}

pub async fn list_wills(
    State(state): State<AppState>,
    caller: Caller,
) -> ApiResult<Json<ApiResponse<Vec<WillView>>>> {
    let records = state.engine.list_for_owner(&caller).await?;
    Ok(Json(ApiResponse::success(
        records.iter().map(WillView::from).collect(),
    )))
}

pub async fn get_will(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<WillId>,
    caller: Caller,
) -> ApiResult<Json<ApiResponse<WillView>>> {
    let record = state.engine.get(id, &caller).await?;
    Ok(Json(ApiResponse::success(record.into())))
}

pub async fn update_will(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<WillId>,
    caller: Caller,
    ApiJson(body): ApiJson<WillDraftRequest>,
) -> ApiResult<Json<ApiResponse<WillView>>> {
    let draft = WillDraft::try_from(body).map_err(|e| ApiError::Validation(e.to_string()))?;
    let record = state.engine.update_draft(id, &caller, draft).await?;
    Ok(Json(ApiResponse::with_message("Will draft updated", record.into())))
}

pub async fn cancel_will(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<WillId>,
    caller: Caller,
) -> ApiResult<Json<ApiResponse<Value>>> {
    state.engine.cancel(id, &caller).await?;
    Ok(Json(ApiResponse::with_message(
        "Will draft cancelled",
        json!({ "id": id }),
    )))
}

pub async fn deposit(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<WillId>,
    caller: Caller,
    ApiJson(body): ApiJson<DepositRequest>,
) -> ApiResult<Json<ApiResponse<WillView>>> {
    let record = state.engine.deposit(id, &caller, body.amount).await?;
    Ok(Json(ApiResponse::with_message("Funds deposited", record.into())))
}

pub async fn deploy(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<WillId>,
    caller: Caller,
) -> ApiResult<Json<ApiResponse<WillView>>> {
    let record = state.engine.deploy(id, &caller).await?;
    Ok(Json(ApiResponse::with_message("Will deployed", record.into())))
}

pub async fn check_in(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<WillId>,
    caller: Caller,
) -> ApiResult<Json<ApiResponse<WillView>>> {
    let record = state.engine.check_in(id, &caller).await?;
    Ok(Json(ApiResponse::with_message("Check-in recorded", record.into())))
}

pub async fn retry_distribution(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<WillId>,
    caller: Caller,
) -> ApiResult<Json<ApiResponse<WillView>>> {
    let record = state.engine.retry_distribution(id, &caller).await?;
    Ok(Json(ApiResponse::success(record.into())))
}

pub async fn read_letter(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<WillId>,
    caller: Caller,
) -> ApiResult<Json<ApiResponse<LetterResponse>>> {
    let letter = state.engine.read_letter(id, &caller).await?;
    Ok(Json(ApiResponse::success(LetterResponse {
        will_id: id,
        letter,
    })))
}

// ── emergency override ───────────────────────────────────────────────────────

/// Anyone holding the override secret may trigger execution, so attempts are
/// throttled per will before any hashing happens.
pub async fn override_execute(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<WillId>,
    ApiJson(body): ApiJson<OverrideRequest>,
) -> ApiResult<Json<ApiResponse<WillView>>> {
    if state.override_limiter.check_key(&id).is_err() {
        warn!(will_id = %id, "Override attempts throttled");
        return Err(ApiError::TooManyRequests);
    }

    let record = state.engine.override_execute(id, &body.password).await?;
    Ok(Json(ApiResponse::with_message(
        "Will executed by override",
        record.into(),
    )))
}
