//! Maintenance status engine
//!
//! Derives a three-state health signal from an asset's next-service date.
//! Pure computation: callers pass the current date, nothing here reads the
//! clock.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// Width of the "due soon" window, in days. An asset due within this many
/// days (inclusive) reports `Warning`. Tunable here without touching call
/// sites.
pub const SERVICE_WARNING_WINDOW_DAYS: u64 = 7;

/// Derived maintenance health of an asset. Never stored; computed on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaintenanceStatus {
    Ok,
    Warning,
    Overdue,
}

impl std::fmt::Display for MaintenanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MaintenanceStatus::Ok => write!(f, "ok"),
            MaintenanceStatus::Warning => write!(f, "warning"),
            MaintenanceStatus::Overdue => write!(f, "overdue"),
        }
    }
}

/// Compute the maintenance status of an asset from its next-service date.
///
/// - `Overdue` only when the date has strictly passed.
/// - `Warning` from the due date itself through the end of the warning
///   window: due today is a warning, not overdue.
/// - `Ok` otherwise. An absent date is `Ok`: an asset without a schedule is
///   not reported as overdue.
pub fn maintenance_status(next_service: Option<NaiveDate>, today: NaiveDate) -> MaintenanceStatus {
    let Some(due) = next_service else {
        return MaintenanceStatus::Ok;
    };

    if due < today {
        MaintenanceStatus::Overdue
    } else if due <= today + Days::new(SERVICE_WARNING_WINDOW_DAYS) {
        MaintenanceStatus::Warning
    } else {
        MaintenanceStatus::Ok
    }
}
