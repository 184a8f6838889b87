//! Data models for clinics, plans, and assets
//!
//! Assets own their maintenance history and document references as
//! array-of-value JSON columns: no sharing, no back-references beyond the
//! parent, no independent lifecycle.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Subscription state of a clinic account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Trial,
    Active,
    Expired,
}

impl SubscriptionStatus {
    /// Database column representation
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trial => "trial",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
        }
    }

    /// Parse the database column representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trial" => Some(SubscriptionStatus::Trial),
            "active" => Some(SubscriptionStatus::Active),
            "expired" => Some(SubscriptionStatus::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a registered asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    Active,
    Inactive,
    InService,
    Broken,
}

impl AssetStatus {
    /// Database column representation
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Active => "active",
            AssetStatus::Inactive => "inactive",
            AssetStatus::InService => "in_service",
            AssetStatus::Broken => "broken",
        }
    }

    /// Parse the database column representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AssetStatus::Active),
            "inactive" => Some(AssetStatus::Inactive),
            "in_service" => Some(AssetStatus::InService),
            "broken" => Some(AssetStatus::Broken),
            _ => None,
        }
    }
}

impl std::fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subscription plan (static reference data, seeded at init)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub display_name: String,
    pub monthly_price: f64,
    /// Maximum asset count permitted while on this plan
    pub asset_limit: i64,
}

/// A clinic account: the tenant boundary owning a set of assets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clinic {
    pub guid: Uuid,
    pub name: String,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub plan_id: String,
    pub subscription_status: SubscriptionStatus,
    pub trial_started_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One maintenance event in an asset's history
///
/// Treated as immutable once written: nothing references a record from
/// outside its parent asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceRecord {
    pub guid: Uuid,
    pub date: NaiveDate,
    pub category: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub technician: Option<String>,
    /// Cost in the clinic's currency; validated non-negative on append
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

/// Reference to an uploaded document (manual, certificate, invoice, ...)
///
/// The upload itself happens against the external document storage; only the
/// returned locator is kept here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRef {
    pub guid: Uuid,
    pub name: String,
    /// Opaque storage locator returned by the document storage service
    pub url: String,
    pub media_category: String,
    pub uploaded_at: DateTime<Utc>,
    pub size_bytes: i64,
}

/// A tracked piece of clinic equipment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub guid: Uuid,
    pub clinic_id: Uuid,
    pub name: String,
    pub brand: String,
    pub serial_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_service_date: Option<NaiveDate>,
    pub status: AssetStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub documents: Vec<DocumentRef>,
    #[serde(default)]
    pub maintenance_history: Vec<MaintenanceRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when registering a new asset
#[derive(Debug, Clone, Deserialize)]
pub struct NewAsset {
    pub name: String,
    pub brand: String,
    pub serial_number: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub next_service_date: Option<NaiveDate>,
    #[serde(default = "default_asset_status")]
    pub status: AssetStatus,
    #[serde(default)]
    pub service_provider: Option<String>,
    #[serde(default)]
    pub service_phone: Option<String>,
    #[serde(default)]
    pub service_email: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_asset_status() -> AssetStatus {
    AssetStatus::Active
}

/// Partial update with merge semantics: absent fields are left untouched
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssetPatch {
    pub name: Option<String>,
    pub brand: Option<String>,
    pub serial_number: Option<String>,
    pub location: Option<String>,
    pub next_service_date: Option<NaiveDate>,
    pub status: Option<AssetStatus>,
    pub service_provider: Option<String>,
    pub service_phone: Option<String>,
    pub service_email: Option<String>,
    pub notes: Option<String>,
}

impl AssetPatch {
    /// True when no field is set (nothing to write)
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.brand.is_none()
            && self.serial_number.is_none()
            && self.location.is_none()
            && self.next_service_date.is_none()
            && self.status.is_none()
            && self.service_provider.is_none()
            && self.service_phone.is_none()
            && self.service_email.is_none()
            && self.notes.is_none()
    }
}

/// Fields accepted when appending a maintenance record
#[derive(Debug, Clone, Deserialize)]
pub struct NewMaintenanceRecord {
    pub date: NaiveDate,
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub technician: Option<String>,
    #[serde(default)]
    pub cost: Option<f64>,
}

/// Fields accepted when attaching a document reference
#[derive(Debug, Clone, Deserialize)]
pub struct NewDocument {
    pub name: String,
    pub url: String,
    pub media_category: String,
    pub size_bytes: i64,
}
