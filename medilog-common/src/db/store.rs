//! Per-clinic asset document store
//!
//! Plays the role of the remote document store: scoped collections per
//! clinic, ordered live subscriptions, field-level merge writes, and
//! server-assigned timestamps. Every successful mutation republishes the
//! clinic's complete ordered snapshot on that clinic's feed; observers never
//! receive per-field patches.

use crate::error::{Error, Result};
use crate::events::AssetSnapshot;
use crate::models::{
    Asset, AssetPatch, AssetStatus, Clinic, DocumentRef, MaintenanceRecord, NewAsset, Plan,
    SubscriptionStatus,
};
use crate::{time, uuid_utils};
use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

/// Snapshots buffered per clinic feed before slow receivers lag
const FEED_CAPACITY: usize = 64;

/// The shared asset store, one instance per process.
///
/// The store owns the feed senders; subscribers own receivers. Snapshot order
/// (creation time, descending) is assigned here and is authoritative —
/// consumers must not re-sort.
pub struct AssetStore {
    pool: SqlitePool,
    feeds: Mutex<HashMap<Uuid, broadcast::Sender<AssetSnapshot>>>,
}

impl AssetStore {
    /// Create a store over an initialized database pool
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            feeds: Mutex::new(HashMap::new()),
        }
    }

    /// Underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Live subscription
    // ------------------------------------------------------------------

    /// Open a live subscription to a clinic's asset collection.
    ///
    /// Returns the current snapshot plus a receiver that yields one complete
    /// snapshot per subsequent delta. Fails with `NotFound` for an unknown
    /// clinic.
    pub async fn subscribe(
        &self,
        clinic_id: Uuid,
    ) -> Result<(AssetSnapshot, broadcast::Receiver<AssetSnapshot>)> {
        // Unknown tenants fail here, not with an empty feed
        self.get_clinic(clinic_id).await?;

        let rx = self.feed_sender(clinic_id).subscribe();
        let snapshot = self.load_snapshot(clinic_id).await?;

        info!("Opened asset feed for clinic {}", clinic_id);
        Ok((snapshot, rx))
    }

    fn feed_sender(&self, clinic_id: Uuid) -> broadcast::Sender<AssetSnapshot> {
        let mut feeds = self.feeds.lock().expect("feed registry lock poisoned");
        feeds
            .entry(clinic_id)
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .clone()
    }

    /// Load the complete ordered snapshot for a clinic
    async fn load_snapshot(&self, clinic_id: Uuid) -> Result<AssetSnapshot> {
        let rows = sqlx::query(
            r#"
            SELECT guid, clinic_id, name, brand, serial_number, location,
                   next_service_date, status, service_provider, service_phone,
                   service_email, notes, documents, maintenance_history,
                   created_at, updated_at
            FROM assets
            WHERE clinic_id = ?
            ORDER BY created_at DESC, guid
            "#,
        )
        .bind(clinic_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let assets = rows
            .iter()
            .map(asset_from_row)
            .collect::<Result<Vec<Asset>>>()?;

        Ok(AssetSnapshot {
            clinic_id,
            assets,
            taken_at: time::now(),
        })
    }

    /// Republish the clinic's snapshot after a delta
    async fn republish(&self, clinic_id: Uuid) -> Result<()> {
        let snapshot = self.load_snapshot(clinic_id).await?;
        let sender = self.feed_sender(clinic_id);
        match sender.send(snapshot) {
            Ok(count) => debug!("Published snapshot for clinic {} to {} feeds", clinic_id, count),
            Err(_) => debug!("No open feeds for clinic {}", clinic_id),
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Clinics and plans
    // ------------------------------------------------------------------

    /// Register a new clinic. The trial clock starts now.
    pub async fn create_clinic(
        &self,
        name: &str,
        contact_email: Option<&str>,
        contact_phone: Option<&str>,
    ) -> Result<Clinic> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("clinic name must not be empty".to_string()));
        }

        let guid = uuid_utils::generate();
        let now = time::now();
        let now_str = time::to_store_format(now);

        sqlx::query(
            r#"
            INSERT INTO clinics (guid, name, contact_email, contact_phone,
                                 plan_id, subscription_status, trial_started_at,
                                 created_at, updated_at)
            VALUES (?, ?, ?, ?, 'starter', 'trial', ?, ?, ?)
            "#,
        )
        .bind(guid.to_string())
        .bind(name)
        .bind(contact_email)
        .bind(contact_phone)
        .bind(&now_str)
        .bind(&now_str)
        .bind(&now_str)
        .execute(&self.pool)
        .await?;

        info!("Registered clinic {} ({})", name, guid);
        self.get_clinic(guid).await
    }

    /// Fetch a clinic by identifier
    pub async fn get_clinic(&self, clinic_id: Uuid) -> Result<Clinic> {
        let row = sqlx::query(
            r#"
            SELECT guid, name, contact_email, contact_phone, plan_id,
                   subscription_status, trial_started_at, created_at, updated_at
            FROM clinics
            WHERE guid = ?
            "#,
        )
        .bind(clinic_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("clinic {}", clinic_id)))?;

        clinic_from_row(&row)
    }

    /// Apply a billing-provider update to a clinic's subscription fields.
    ///
    /// The registry only stores what billing decided; it never calls out to
    /// the billing provider itself.
    pub async fn set_subscription(
        &self,
        clinic_id: Uuid,
        plan_id: Option<&str>,
        status: SubscriptionStatus,
    ) -> Result<()> {
        if let Some(plan) = plan_id {
            // Surface unknown plans as input errors instead of FK failures
            self.get_plan(plan).await?;
        }

        let now_str = time::to_store_format(time::now());
        let result = match plan_id {
            Some(plan) => {
                sqlx::query(
                    "UPDATE clinics SET plan_id = ?, subscription_status = ?, updated_at = ? WHERE guid = ?",
                )
                .bind(plan)
                .bind(status.as_str())
                .bind(&now_str)
                .bind(clinic_id.to_string())
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "UPDATE clinics SET subscription_status = ?, updated_at = ? WHERE guid = ?",
                )
                .bind(status.as_str())
                .bind(&now_str)
                .bind(clinic_id.to_string())
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("clinic {}", clinic_id)));
        }

        info!(
            "Clinic {} subscription set to {} (plan: {:?})",
            clinic_id, status, plan_id
        );
        Ok(())
    }

    /// Fetch a plan by identifier
    pub async fn get_plan(&self, plan_id: &str) -> Result<Plan> {
        let row = sqlx::query(
            "SELECT id, display_name, monthly_price, asset_limit FROM plans WHERE id = ?",
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("plan {}", plan_id)))?;

        Ok(Plan {
            id: row.get("id"),
            display_name: row.get("display_name"),
            monthly_price: row.get("monthly_price"),
            asset_limit: row.get("asset_limit"),
        })
    }

    // ------------------------------------------------------------------
    // Asset mutations
    // ------------------------------------------------------------------

    /// Insert a new asset document with server-assigned timestamps.
    ///
    /// Returns the new identifier once the write is acknowledged; the full
    /// persisted shape reaches observers through the feed, not through this
    /// return value.
    pub async fn insert_asset(&self, clinic_id: Uuid, fields: &NewAsset) -> Result<Uuid> {
        let guid = uuid_utils::generate();
        let now_str = time::to_store_format(time::now());

        sqlx::query(
            r#"
            INSERT INTO assets (guid, clinic_id, name, brand, serial_number,
                                location, next_service_date, status,
                                service_provider, service_phone, service_email,
                                notes, documents, maintenance_history,
                                created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, '[]', '[]', ?, ?)
            "#,
        )
        .bind(guid.to_string())
        .bind(clinic_id.to_string())
        .bind(&fields.name)
        .bind(&fields.brand)
        .bind(&fields.serial_number)
        .bind(&fields.location)
        .bind(fields.next_service_date.map(|d| d.to_string()))
        .bind(fields.status.as_str())
        .bind(&fields.service_provider)
        .bind(&fields.service_phone)
        .bind(&fields.service_email)
        .bind(&fields.notes)
        .bind(&now_str)
        .bind(&now_str)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::WriteFailure(format!("asset insert rejected: {}", e)))?;

        debug!("Inserted asset {} for clinic {}", guid, clinic_id);
        self.republish(clinic_id).await?;
        Ok(guid)
    }

    /// Fetch a single asset by identifier
    pub async fn get_asset(&self, asset_id: Uuid) -> Result<Asset> {
        let row = sqlx::query(
            r#"
            SELECT guid, clinic_id, name, brand, serial_number, location,
                   next_service_date, status, service_provider, service_phone,
                   service_email, notes, documents, maintenance_history,
                   created_at, updated_at
            FROM assets
            WHERE guid = ?
            "#,
        )
        .bind(asset_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("asset {}", asset_id)))?;

        asset_from_row(&row)
    }

    /// Merge-write the provided fields of an asset, leaving the rest alone
    pub async fn merge_update(&self, asset_id: Uuid, patch: &AssetPatch) -> Result<()> {
        if patch.is_empty() {
            return Err(Error::InvalidInput("update carries no fields".to_string()));
        }

        let clinic_id = self
            .clinic_of(asset_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("asset {}", asset_id)))?;

        let now_str = time::to_store_format(time::now());

        let mut qb = sqlx::QueryBuilder::<sqlx::Sqlite>::new("UPDATE assets SET ");
        {
            let mut updates = qb.separated(", ");
            if let Some(name) = &patch.name {
                updates.push("name = ").push_bind_unseparated(name);
            }
            if let Some(brand) = &patch.brand {
                updates.push("brand = ").push_bind_unseparated(brand);
            }
            if let Some(serial) = &patch.serial_number {
                updates.push("serial_number = ").push_bind_unseparated(serial);
            }
            if let Some(location) = &patch.location {
                updates.push("location = ").push_bind_unseparated(location);
            }
            if let Some(date) = &patch.next_service_date {
                updates
                    .push("next_service_date = ")
                    .push_bind_unseparated(date.to_string());
            }
            if let Some(status) = &patch.status {
                updates.push("status = ").push_bind_unseparated(status.as_str());
            }
            if let Some(provider) = &patch.service_provider {
                updates
                    .push("service_provider = ")
                    .push_bind_unseparated(provider);
            }
            if let Some(phone) = &patch.service_phone {
                updates.push("service_phone = ").push_bind_unseparated(phone);
            }
            if let Some(email) = &patch.service_email {
                updates.push("service_email = ").push_bind_unseparated(email);
            }
            if let Some(notes) = &patch.notes {
                updates.push("notes = ").push_bind_unseparated(notes);
            }
            updates.push("updated_at = ").push_bind_unseparated(&now_str);
        }
        qb.push(" WHERE guid = ").push_bind(asset_id.to_string());

        qb.build()
            .execute(&self.pool)
            .await
            .map_err(|e| Error::WriteFailure(format!("asset update rejected: {}", e)))?;

        debug!("Merged update into asset {}", asset_id);
        self.republish(clinic_id).await?;
        Ok(())
    }

    /// Append a maintenance record to an asset's history.
    ///
    /// Read-modify-write of the history column only: a concurrent edit to any
    /// other column of the same asset is never dropped.
    pub async fn append_maintenance(
        &self,
        asset_id: Uuid,
        record: MaintenanceRecord,
    ) -> Result<()> {
        let clinic_id = self
            .append_json_column(asset_id, "maintenance_history", |history: &mut Vec<MaintenanceRecord>| {
                history.push(record);
            })
            .await?;

        debug!("Appended maintenance record to asset {}", asset_id);
        self.republish(clinic_id).await?;
        Ok(())
    }

    /// Attach a document reference to an asset
    pub async fn append_document(&self, asset_id: Uuid, document: DocumentRef) -> Result<()> {
        let clinic_id = self
            .append_json_column(asset_id, "documents", |documents: &mut Vec<DocumentRef>| {
                documents.push(document);
            })
            .await?;

        debug!("Attached document to asset {}", asset_id);
        self.republish(clinic_id).await?;
        Ok(())
    }

    /// Delete an asset. Idempotent: deleting an absent identifier is not an
    /// error, and identifiers are never reused afterwards.
    pub async fn delete_asset(&self, asset_id: Uuid) -> Result<()> {
        let Some(clinic_id) = self.clinic_of(asset_id).await? else {
            debug!("Delete of absent asset {} ignored", asset_id);
            return Ok(());
        };

        sqlx::query("DELETE FROM assets WHERE guid = ?")
            .bind(asset_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::WriteFailure(format!("asset delete rejected: {}", e)))?;

        info!("Deleted asset {} from clinic {}", asset_id, clinic_id);
        self.republish(clinic_id).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn clinic_of(&self, asset_id: Uuid) -> Result<Option<Uuid>> {
        let row: Option<String> =
            sqlx::query_scalar("SELECT clinic_id FROM assets WHERE guid = ?")
                .bind(asset_id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(raw) => Ok(Some(parse_uuid_column(&raw)?)),
            None => Ok(None),
        }
    }

    /// Read-modify-write of a single JSON array column inside a transaction.
    ///
    /// Returns the owning clinic so the caller can republish.
    async fn append_json_column<T, F>(
        &self,
        asset_id: Uuid,
        column: &str,
        mutate: F,
    ) -> Result<Uuid>
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
        F: FnOnce(&mut Vec<T>),
    {
        let mut tx = self.pool.begin().await?;

        let select_sql = format!("SELECT clinic_id, {} FROM assets WHERE guid = ?", column);
        let row = sqlx::query(&select_sql)
            .bind(asset_id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound(format!("asset {}", asset_id)))?;

        let clinic_id = parse_uuid_column(&row.get::<String, _>("clinic_id"))?;
        let raw: String = row.get(1);
        let mut entries: Vec<T> = serde_json::from_str(&raw)
            .map_err(|e| Error::Internal(format!("corrupt {} column: {}", column, e)))?;

        mutate(&mut entries);

        let serialized = serde_json::to_string(&entries)
            .map_err(|e| Error::Internal(format!("serialize {} column: {}", column, e)))?;
        let now_str = time::to_store_format(time::now());

        let update_sql = format!(
            "UPDATE assets SET {} = ?, updated_at = ? WHERE guid = ?",
            column
        );
        sqlx::query(&update_sql)
            .bind(&serialized)
            .bind(&now_str)
            .bind(asset_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::WriteFailure(format!("{} append rejected: {}", column, e)))?;

        tx.commit().await?;
        Ok(clinic_id)
    }
}

fn parse_uuid_column(raw: &str) -> Result<Uuid> {
    uuid_utils::parse(raw).map_err(|e| Error::Internal(format!("corrupt identifier column: {}", e)))
}

fn parse_timestamp_column(raw: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    time::from_store_format(raw)
        .ok_or_else(|| Error::Internal(format!("corrupt timestamp column: {}", raw)))
}

fn clinic_from_row(row: &SqliteRow) -> Result<Clinic> {
    let status_raw: String = row.get("subscription_status");
    let subscription_status = SubscriptionStatus::parse(&status_raw)
        .ok_or_else(|| Error::Internal(format!("unknown subscription status: {}", status_raw)))?;

    Ok(Clinic {
        guid: parse_uuid_column(&row.get::<String, _>("guid"))?,
        name: row.get("name"),
        contact_email: row.get("contact_email"),
        contact_phone: row.get("contact_phone"),
        plan_id: row.get("plan_id"),
        subscription_status,
        trial_started_at: parse_timestamp_column(&row.get::<String, _>("trial_started_at"))?,
        created_at: parse_timestamp_column(&row.get::<String, _>("created_at"))?,
        updated_at: parse_timestamp_column(&row.get::<String, _>("updated_at"))?,
    })
}

fn asset_from_row(row: &SqliteRow) -> Result<Asset> {
    let status_raw: String = row.get("status");
    let status = AssetStatus::parse(&status_raw)
        .ok_or_else(|| Error::Internal(format!("unknown asset status: {}", status_raw)))?;

    let next_service_date = match row.get::<Option<String>, _>("next_service_date") {
        Some(raw) => Some(
            NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                .map_err(|e| Error::Internal(format!("corrupt service date: {}", e)))?,
        ),
        None => None,
    };

    let documents: Vec<DocumentRef> =
        serde_json::from_str(&row.get::<String, _>("documents"))
            .map_err(|e| Error::Internal(format!("corrupt documents column: {}", e)))?;
    let maintenance_history: Vec<MaintenanceRecord> =
        serde_json::from_str(&row.get::<String, _>("maintenance_history"))
            .map_err(|e| Error::Internal(format!("corrupt maintenance history: {}", e)))?;

    Ok(Asset {
        guid: parse_uuid_column(&row.get::<String, _>("guid"))?,
        clinic_id: parse_uuid_column(&row.get::<String, _>("clinic_id"))?,
        name: row.get("name"),
        brand: row.get("brand"),
        serial_number: row.get("serial_number"),
        location: row.get("location"),
        next_service_date,
        status,
        service_provider: row.get("service_provider"),
        service_phone: row.get("service_phone"),
        service_email: row.get("service_email"),
        notes: row.get("notes"),
        documents,
        maintenance_history,
        created_at: parse_timestamp_column(&row.get::<String, _>("created_at"))?,
        updated_at: parse_timestamp_column(&row.get::<String, _>("updated_at"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_database;

    async fn setup() -> (tempfile::TempDir, AssetStore, Clinic) {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = init_database(&dir.path().join("medilog.db"))
            .await
            .expect("init");
        let store = AssetStore::new(pool);
        let clinic = store
            .create_clinic("Acme Clinic", Some("front@acme.test"), None)
            .await
            .expect("clinic");
        (dir, store, clinic)
    }

    fn new_asset(name: &str) -> NewAsset {
        NewAsset {
            name: name.to_string(),
            brand: "TC".to_string(),
            serial_number: "121314".to_string(),
            location: None,
            next_service_date: None,
            status: AssetStatus::Active,
            service_provider: None,
            service_phone: None,
            service_email: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_insert_publishes_ordered_snapshot() {
        let (_dir, store, clinic) = setup().await;
        let (initial, mut rx) = store.subscribe(clinic.guid).await.expect("subscribe");
        assert_eq!(initial.count(), 0);

        let first = store.insert_asset(clinic.guid, &new_asset("Autoclave")).await.expect("insert");
        let snap = rx.recv().await.expect("delta");
        assert_eq!(snap.count(), 1);
        assert_eq!(snap.assets[0].guid, first);

        let second = store.insert_asset(clinic.guid, &new_asset("Centrifuge")).await.expect("insert");
        let snap = rx.recv().await.expect("delta");
        // Newest first: feed order is creation time, descending
        assert_eq!(snap.assets[0].guid, second);
        assert_eq!(snap.assets[1].guid, first);
        assert!(snap.assets[0].created_at >= snap.assets[1].created_at);
    }

    #[tokio::test]
    async fn test_subscribe_unknown_clinic_fails() {
        let (_dir, store, _clinic) = setup().await;
        let err = store.subscribe(Uuid::new_v4()).await.err().expect("must fail");
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_merge_update_leaves_other_fields_alone() {
        let (_dir, store, clinic) = setup().await;
        let id = store.insert_asset(clinic.guid, &new_asset("Ultrasound")).await.expect("insert");

        let patch = AssetPatch {
            location: Some("Room 3".to_string()),
            ..Default::default()
        };
        store.merge_update(id, &patch).await.expect("update");

        let asset = store.get_asset(id).await.expect("fetch");
        assert_eq!(asset.location.as_deref(), Some("Room 3"));
        assert_eq!(asset.name, "Ultrasound");
        assert_eq!(asset.brand, "TC");
    }

    #[tokio::test]
    async fn test_empty_patch_is_rejected() {
        let (_dir, store, clinic) = setup().await;
        let id = store.insert_asset(clinic.guid, &new_asset("Ultrasound")).await.expect("insert");

        let err = store
            .merge_update(id, &AssetPatch::default())
            .await
            .err()
            .expect("must fail");
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_maintenance_append_preserves_concurrent_field_edit() {
        let (_dir, store, clinic) = setup().await;
        let id = store.insert_asset(clinic.guid, &new_asset("Ventilator")).await.expect("insert");

        // An unrelated field edit lands between read and append in another
        // UI flow; the history write must not clobber it.
        let patch = AssetPatch {
            notes: Some("Filter changed".to_string()),
            ..Default::default()
        };
        store.merge_update(id, &patch).await.expect("update");

        let record = MaintenanceRecord {
            guid: uuid_utils::generate(),
            date: NaiveDate::from_ymd_opt(2025, 5, 2).unwrap(),
            category: "calibration".to_string(),
            description: "Annual calibration".to_string(),
            technician: Some("E. Demir".to_string()),
            cost: Some(1200.0),
        };
        store.append_maintenance(id, record).await.expect("append");

        let asset = store.get_asset(id).await.expect("fetch");
        assert_eq!(asset.maintenance_history.len(), 1);
        assert_eq!(asset.notes.as_deref(), Some("Filter changed"));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_dir, store, clinic) = setup().await;
        let id = store.insert_asset(clinic.guid, &new_asset("Defibrillator")).await.expect("insert");

        store.delete_asset(id).await.expect("first delete");
        store.delete_asset(id).await.expect("second delete is not an error");

        let err = store.get_asset(id).await.err().expect("gone");
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_set_subscription_updates_fields() {
        let (_dir, store, clinic) = setup().await;
        store
            .set_subscription(clinic.guid, Some("clinic"), SubscriptionStatus::Active)
            .await
            .expect("subscription update");

        let reloaded = store.get_clinic(clinic.guid).await.expect("fetch");
        assert_eq!(reloaded.plan_id, "clinic");
        assert_eq!(reloaded.subscription_status, SubscriptionStatus::Active);

        let err = store
            .set_subscription(clinic.guid, Some("nonexistent"), SubscriptionStatus::Active)
            .await
            .err()
            .expect("unknown plan rejected");
        assert!(matches!(err, Error::NotFound(_)));
    }
}
