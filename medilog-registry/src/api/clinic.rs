//! Clinic account endpoints
//!
//! Registration, profile (with computed subscription state and trial
//! countdown), and the write-through that billing events apply. The
//! registry never calls out to the billing provider; it only stores what
//! billing decided.

use super::{clinic_from_headers, error_response, ApiError};
use crate::AppState;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use medilog_common::models::{Clinic, SubscriptionStatus};
use medilog_common::quota::{effective_status, trial_days_left};
use medilog_common::time;
use serde::{Deserialize, Serialize};

/// Request body for POST /api/clinic
#[derive(Debug, Deserialize)]
pub struct RegisterClinic {
    pub name: String,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub contact_phone: Option<String>,
}

/// POST /api/clinic
///
/// Register a clinic account. The trial clock starts at registration.
pub async fn register_clinic(
    State(state): State<AppState>,
    Json(body): Json<RegisterClinic>,
) -> Result<(StatusCode, Json<Clinic>), ApiError> {
    let clinic = state
        .store
        .create_clinic(
            &body.name,
            body.contact_email.as_deref(),
            body.contact_phone.as_deref(),
        )
        .await
        .map_err(error_response)?;

    Ok((StatusCode::CREATED, Json(clinic)))
}

/// Clinic profile with the derived subscription state
#[derive(Debug, Serialize)]
pub struct ClinicProfile {
    #[serde(flatten)]
    pub clinic: Clinic,
    /// Stored status re-evaluated against the trial clock
    pub effective_status: SubscriptionStatus,
    /// Days of trial remaining; absent once off trial
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial_days_left: Option<i64>,
}

/// GET /api/clinic
pub async fn get_clinic(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ClinicProfile>, ApiError> {
    let clinic_id = clinic_from_headers(&headers)?;
    let clinic = state
        .store
        .get_clinic(clinic_id)
        .await
        .map_err(error_response)?;

    let now = time::now();
    let effective = effective_status(&clinic, now);
    let days_left = (clinic.subscription_status == SubscriptionStatus::Trial)
        .then(|| trial_days_left(clinic.trial_started_at, now));

    Ok(Json(ClinicProfile {
        effective_status: effective,
        trial_days_left: days_left,
        clinic,
    }))
}

/// Request body for PUT /api/clinic/subscription
#[derive(Debug, Deserialize)]
pub struct SubscriptionUpdate {
    #[serde(default)]
    pub plan_id: Option<String>,
    pub status: SubscriptionStatus,
}

/// PUT /api/clinic/subscription
///
/// Apply a billing-provider update to the clinic's plan and status fields.
pub async fn update_subscription(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SubscriptionUpdate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let clinic_id = clinic_from_headers(&headers)?;
    state
        .store
        .set_subscription(clinic_id, body.plan_id.as_deref(), body.status)
        .await
        .map_err(error_response)?;

    Ok(Json(serde_json::json!({ "status": "ok" })))
}
