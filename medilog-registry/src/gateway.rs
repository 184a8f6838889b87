//! Mutation gateway
//!
//! The only write path for asset data. Creation is quota-gated: the policy
//! runs against the synchronizer's current count and the clinic's effective
//! subscription status before any store call, so a refusal can never leave a
//! partial write behind. The gateway keeps no cache of its own — every
//! successful mutation reaches observers through the live feed, and callers
//! must treat visibility as eventually consistent with the write
//! acknowledgment.

use crate::sync::SyncHandle;
use medilog_common::db::AssetStore;
use medilog_common::models::{
    AssetPatch, DocumentRef, MaintenanceRecord, NewAsset, NewDocument, NewMaintenanceRecord,
};
use medilog_common::quota::{can_create_asset, effective_status, CreateDecision};
use medilog_common::{time, uuid_utils, Error, Result};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Orchestrates create/update/delete against the store
pub struct MutationGateway {
    store: Arc<AssetStore>,
}

impl MutationGateway {
    pub fn new(store: Arc<AssetStore>) -> Self {
        Self { store }
    }

    /// Register a new asset for the clinic behind the given subscription.
    ///
    /// The quota check reads the subscription's current asset count; on deny
    /// no store call is made. On allow, returns the new identifier once the
    /// store acknowledges the write — the persisted document itself arrives
    /// through the subscription's next snapshot, not through this return
    /// value.
    pub async fn create_asset(&self, sub: &SyncHandle, fields: NewAsset) -> Result<Uuid> {
        if fields.name.trim().is_empty() {
            return Err(Error::InvalidInput("asset name must not be empty".to_string()));
        }
        if fields.serial_number.trim().is_empty() {
            return Err(Error::InvalidInput(
                "asset serial number must not be empty".to_string(),
            ));
        }

        let view = sub.current();
        let snapshot = view.snapshot()?;

        let clinic = self.store.get_clinic(sub.clinic_id()).await?;
        let plan = self.store.get_plan(&clinic.plan_id).await?;
        let status = effective_status(&clinic, time::now());

        match can_create_asset(&plan, snapshot.count(), status) {
            CreateDecision::Deny(reason) => {
                info!(
                    "Refused asset creation for clinic {}: {} ({} of {} used)",
                    clinic.guid,
                    reason,
                    snapshot.count(),
                    plan.asset_limit
                );
                Err(Error::QuotaDenied(reason))
            }
            CreateDecision::Allow => {
                let guid = self.store.insert_asset(sub.clinic_id(), &fields).await?;
                debug!("Created asset {} for clinic {}", guid, clinic.guid);
                Ok(guid)
            }
        }
    }

    /// Merge-write a partial update. No quota check applies.
    pub async fn update_asset(&self, asset_id: Uuid, patch: AssetPatch) -> Result<()> {
        self.store.merge_update(asset_id, &patch).await
    }

    /// Append a maintenance record to an asset's history.
    ///
    /// Merged at the field level: a concurrent edit to any other asset field
    /// survives the append.
    pub async fn append_maintenance_record(
        &self,
        asset_id: Uuid,
        record: NewMaintenanceRecord,
    ) -> Result<()> {
        if record.description.trim().is_empty() {
            return Err(Error::InvalidInput(
                "maintenance description must not be empty".to_string(),
            ));
        }
        if let Some(cost) = record.cost {
            if cost < 0.0 {
                return Err(Error::InvalidInput(
                    "maintenance cost must be non-negative".to_string(),
                ));
            }
        }

        let entry = MaintenanceRecord {
            guid: uuid_utils::generate(),
            date: record.date,
            category: record.category,
            description: record.description,
            technician: record.technician,
            cost: record.cost,
        };

        self.store.append_maintenance(asset_id, entry).await
    }

    /// Attach an uploaded document's locator to an asset
    pub async fn attach_document(&self, asset_id: Uuid, document: NewDocument) -> Result<()> {
        if document.url.trim().is_empty() {
            return Err(Error::InvalidInput(
                "document locator must not be empty".to_string(),
            ));
        }
        if document.size_bytes < 0 {
            return Err(Error::InvalidInput(
                "document size must be non-negative".to_string(),
            ));
        }

        let entry = DocumentRef {
            guid: uuid_utils::generate(),
            name: document.name,
            url: document.url,
            media_category: document.media_category,
            uploaded_at: time::now(),
            size_bytes: document.size_bytes,
        };

        self.store.append_document(asset_id, entry).await
    }

    /// Delete an asset. Idempotent: a second delete of the same identifier
    /// is not an error.
    pub async fn delete_asset(&self, asset_id: Uuid) -> Result<()> {
        self.store.delete_asset(asset_id).await
    }
}
