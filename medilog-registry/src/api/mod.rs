//! HTTP surface for the registry service
//!
//! These handlers are glue: tenant extraction, error mapping, and JSON
//! shapes over the synchronizer, gateway, and resolver. The clinic
//! identifier arrives in the `X-Clinic-Id` header, placed there by the
//! authentication layer in front of this service; it is trusted as the
//! tenant boundary for every query and write.

pub mod assets;
pub mod clinic;
pub mod events;
pub mod health;

pub use assets::*;
pub use clinic::*;
pub use events::*;
pub use health::*;

use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use medilog_common::quota::DenyReason;
use medilog_common::{uuid_utils, Error};
use serde::Serialize;
use uuid::Uuid;

/// Header carrying the authenticated clinic identifier
pub const CLINIC_HEADER: &str = "x-clinic-id";

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Stable machine-readable error code
    pub error: String,
    /// Human-readable error message
    pub message: String,
}

/// Handler error type: status code plus JSON body
pub type ApiError = (StatusCode, Json<ErrorBody>);

/// Map a registry error onto a status code and stable error code.
///
/// The two quota sub-reasons and the decode-vs-not-found pair map to
/// distinct codes on purpose: their user-facing remediation differs.
pub(crate) fn error_response(err: Error) -> ApiError {
    let (status, code) = match &err {
        Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        Error::DecodeFailure => (StatusCode::UNPROCESSABLE_ENTITY, "decode_failure"),
        Error::QuotaDenied(DenyReason::SubscriptionExpired) => {
            (StatusCode::PAYMENT_REQUIRED, "subscription_expired")
        }
        Error::QuotaDenied(DenyReason::LimitReached) => (StatusCode::CONFLICT, "limit_reached"),
        Error::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
        Error::Sync(_) => (StatusCode::SERVICE_UNAVAILABLE, "sync_failed"),
        Error::WriteFailure(_) => (StatusCode::BAD_GATEWAY, "write_failure"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };

    (
        status,
        Json(ErrorBody {
            error: code.to_string(),
            message: err.to_string(),
        }),
    )
}

/// Extract the authenticated clinic identifier from request headers
pub(crate) fn clinic_from_headers(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    let raw = headers
        .get(CLINIC_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            error_response(Error::InvalidInput(
                "missing X-Clinic-Id header".to_string(),
            ))
        })?;

    uuid_utils::parse(raw).map_err(|_| {
        error_response(Error::InvalidInput(
            "malformed X-Clinic-Id header".to_string(),
        ))
    })
}
