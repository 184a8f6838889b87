//! Quota policy for asset creation
//!
//! Stateless decisions: the caller supplies the plan, the current asset
//! count, and the already-computed subscription status. Trial expiry is its
//! own pure function so the time-dependent part stays independently
//! testable.

use crate::models::{Clinic, Plan, SubscriptionStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Length of the free trial, in days
pub const TRIAL_LENGTH_DAYS: i64 = 14;

/// Why asset creation was refused
///
/// The sub-reason matters to callers: an expired subscription is remedied by
/// upgrading (or waiting out billing), a reached limit by moving to a larger
/// plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    SubscriptionExpired,
    LimitReached,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::SubscriptionExpired => write!(f, "subscription expired"),
            DenyReason::LimitReached => write!(f, "plan asset limit reached"),
        }
    }
}

/// Outcome of a quota check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateDecision {
    Allow,
    Deny(DenyReason),
}

/// Decide whether a clinic may register another asset.
///
/// An expired subscription always denies, regardless of count; otherwise the
/// plan's asset limit applies.
pub fn can_create_asset(
    plan: &Plan,
    current_asset_count: usize,
    status: SubscriptionStatus,
) -> CreateDecision {
    if status == SubscriptionStatus::Expired {
        return CreateDecision::Deny(DenyReason::SubscriptionExpired);
    }
    if current_asset_count as i64 >= plan.asset_limit {
        return CreateDecision::Deny(DenyReason::LimitReached);
    }
    CreateDecision::Allow
}

/// Whether a trial that started at `trial_start` is still running at `now`.
///
/// The trial covers `[trial_start, trial_start + trial_length_days)`.
pub fn trial_status(
    trial_start: DateTime<Utc>,
    trial_length_days: i64,
    now: DateTime<Utc>,
) -> SubscriptionStatus {
    if now < trial_start + Duration::days(trial_length_days) {
        SubscriptionStatus::Trial
    } else {
        SubscriptionStatus::Expired
    }
}

/// Days of trial remaining at `now`, clamped to zero
pub fn trial_days_left(trial_start: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let ends_at = trial_start + Duration::days(TRIAL_LENGTH_DAYS);
    (ends_at - now).num_days().max(0)
}

/// Effective subscription status of a clinic at `now`.
///
/// A stored `trial` status is re-evaluated against the trial clock; `active`
/// and `expired` are taken as the billing provider last wrote them.
pub fn effective_status(clinic: &Clinic, now: DateTime<Utc>) -> SubscriptionStatus {
    match clinic.subscription_status {
        SubscriptionStatus::Trial => trial_status(clinic.trial_started_at, TRIAL_LENGTH_DAYS, now),
        other => other,
    }
}
