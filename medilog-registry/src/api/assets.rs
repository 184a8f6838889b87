//! Asset endpoints
//!
//! Reads go through the clinic's live subscription (the synchronizer's
//! mirror, never a direct table scan), writes through the mutation gateway.
//! Every asset in a response carries its derived maintenance status; the
//! status is computed on read and never stored.

use super::{clinic_from_headers, error_response, ApiError};
use crate::sync::SyncView;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use medilog_common::events::AssetSnapshot;
use medilog_common::maintenance::{maintenance_status, MaintenanceStatus};
use medilog_common::models::{Asset, AssetPatch, NewAsset, NewDocument, NewMaintenanceRecord};
use medilog_common::{qr, time, Error};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Query parameters for GET /api/assets
#[derive(Debug, Deserialize)]
pub struct ListParams {
    /// Case-insensitive filter over name, brand, and serial number
    #[serde(default)]
    pub search: Option<String>,
}

/// An asset annotated with its derived maintenance status
#[derive(Debug, Serialize)]
pub struct AssetWithStatus {
    #[serde(flatten)]
    pub asset: Asset,
    pub maintenance_status: MaintenanceStatus,
}

/// Response body for GET /api/assets
#[derive(Debug, Serialize)]
pub struct AssetListResponse {
    pub clinic_id: Uuid,
    pub taken_at: DateTime<Utc>,
    pub count: usize,
    pub assets: Vec<AssetWithStatus>,
}

/// GET /api/assets
///
/// Current ordered snapshot from the live subscription. Order comes from the
/// feed (creation time, descending) and is passed through untouched.
pub async fn list_assets(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Json<AssetListResponse>, ApiError> {
    let clinic_id = clinic_from_headers(&headers)?;
    let snapshot = current_snapshot(&state, clinic_id).await?;
    let AssetSnapshot {
        assets, taken_at, ..
    } = snapshot;

    let today = time::now().date_naive();
    let needle = params.search.as_deref().map(str::to_lowercase);
    let assets: Vec<AssetWithStatus> = assets
        .into_iter()
        .filter(|asset| match &needle {
            Some(n) => {
                asset.name.to_lowercase().contains(n)
                    || asset.brand.to_lowercase().contains(n)
                    || asset.serial_number.to_lowercase().contains(n)
            }
            None => true,
        })
        .map(|asset| AssetWithStatus {
            maintenance_status: maintenance_status(asset.next_service_date, today),
            asset,
        })
        .collect();

    Ok(Json(AssetListResponse {
        clinic_id,
        taken_at,
        count: assets.len(),
        assets,
    }))
}

/// Response body for POST /api/assets
#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub guid: Uuid,
}

/// POST /api/assets
///
/// Quota-gated creation. A refusal carries the sub-reason: 402 for an
/// expired subscription, 409 for a reached plan limit.
pub async fn create_asset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(fields): Json<NewAsset>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    let clinic_id = clinic_from_headers(&headers)?;
    let guid = state
        .create_asset(clinic_id, fields)
        .await
        .map_err(error_response)?;

    Ok((StatusCode::CREATED, Json(CreatedResponse { guid })))
}

/// PUT /api/assets/:id
pub async fn update_asset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(asset_id): Path<Uuid>,
    Json(patch): Json<AssetPatch>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let clinic_id = clinic_from_headers(&headers)?;
    owned_asset(&state, clinic_id, asset_id).await?;

    state
        .gateway
        .update_asset(asset_id, patch)
        .await
        .map_err(error_response)?;

    Ok(Json(serde_json::json!({ "status": "ok" })))
}

/// POST /api/assets/:id/maintenance
pub async fn append_maintenance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(asset_id): Path<Uuid>,
    Json(record): Json<NewMaintenanceRecord>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let clinic_id = clinic_from_headers(&headers)?;
    owned_asset(&state, clinic_id, asset_id).await?;

    state
        .gateway
        .append_maintenance_record(asset_id, record)
        .await
        .map_err(error_response)?;

    Ok(Json(serde_json::json!({ "status": "ok" })))
}

/// POST /api/assets/:id/documents
pub async fn attach_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(asset_id): Path<Uuid>,
    Json(document): Json<NewDocument>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let clinic_id = clinic_from_headers(&headers)?;
    owned_asset(&state, clinic_id, asset_id).await?;

    state
        .gateway
        .attach_document(asset_id, document)
        .await
        .map_err(error_response)?;

    Ok(Json(serde_json::json!({ "status": "ok" })))
}

/// DELETE /api/assets/:id
///
/// Idempotent: deleting an already-deleted identifier (or one outside the
/// caller's clinic) is answered 204 without touching anything.
pub async fn delete_asset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(asset_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let clinic_id = clinic_from_headers(&headers)?;

    match state.store.get_asset(asset_id).await {
        Ok(asset) if asset.clinic_id == clinic_id => {
            state
                .gateway
                .delete_asset(asset_id)
                .await
                .map_err(error_response)?;
        }
        // Foreign tenant or already gone: both read as absent
        Ok(_) | Err(Error::NotFound(_)) => {}
        Err(err) => return Err(error_response(err)),
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Query parameters for GET /api/assets/resolve
#[derive(Debug, Deserialize)]
pub struct ResolveParams {
    pub token: String,
}

/// GET /api/assets/resolve?token=...
///
/// Decode a scanned token and look it up in the clinic's current list.
/// An unreadable token (422) and a decoded-but-unknown identifier (404) are
/// different outcomes: one is a scan problem, the other a data problem.
pub async fn resolve_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ResolveParams>,
) -> Result<Json<AssetWithStatus>, ApiError> {
    let clinic_id = clinic_from_headers(&headers)?;

    let Some(asset_id) = qr::decode(&params.token) else {
        return Err(error_response(Error::DecodeFailure));
    };

    let snapshot = current_snapshot(&state, clinic_id).await?;
    match qr::resolve(&asset_id, &snapshot.assets) {
        Some(asset) => Ok(Json(AssetWithStatus {
            maintenance_status: maintenance_status(
                asset.next_service_date,
                time::now().date_naive(),
            ),
            asset: asset.clone(),
        })),
        None => Err(error_response(Error::NotFound(format!(
            "asset {}",
            asset_id
        )))),
    }
}

/// Response body for GET /api/assets/:id/qr
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// GET /api/assets/:id/qr
///
/// The stable token to print into this asset's QR label.
pub async fn qr_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(asset_id): Path<Uuid>,
) -> Result<Json<TokenResponse>, ApiError> {
    let clinic_id = clinic_from_headers(&headers)?;
    owned_asset(&state, clinic_id, asset_id).await?;

    Ok(Json(TokenResponse {
        token: qr::encode(clinic_id, asset_id),
    }))
}

/// Current snapshot from the clinic's live subscription, or an explicit
/// failure — a stale mirror is never served as current data
async fn current_snapshot(state: &AppState, clinic_id: Uuid) -> Result<AssetSnapshot, ApiError> {
    let rx = state
        .subscription(clinic_id)
        .await
        .map_err(error_response)?;
    let view = rx.borrow().clone();
    match view {
        SyncView::Live(snapshot) => Ok(snapshot),
        SyncView::Failed { message } => Err(error_response(Error::Sync(message))),
    }
}

/// Confirm the asset exists inside the caller's clinic; a foreign clinic's
/// asset reads as absent
async fn owned_asset(state: &AppState, clinic_id: Uuid, asset_id: Uuid) -> Result<(), ApiError> {
    match state.store.get_asset(asset_id).await {
        Ok(asset) if asset.clinic_id == clinic_id => Ok(()),
        Ok(_) => Err(error_response(Error::NotFound(format!(
            "asset {}",
            asset_id
        )))),
        Err(err) => Err(error_response(err)),
    }
}
