//! Database initialization
//!
//! Creates the schema on first run and is safe to call again on every
//! startup: all statements are idempotent.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL allows concurrent readers while one writer holds the lock
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_plans_table(&pool).await?;
    create_clinics_table(&pool).await?;
    create_assets_table(&pool).await?;

    seed_default_plans(&pool).await?;

    Ok(pool)
}

/// Create the plans table
///
/// Static reference data: never created or mutated by the registry itself.
async fn create_plans_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS plans (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            monthly_price REAL NOT NULL,
            asset_limit INTEGER NOT NULL,
            CHECK (monthly_price >= 0.0),
            CHECK (asset_limit > 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Seed the subscription plans if missing
async fn seed_default_plans(pool: &SqlitePool) -> Result<()> {
    let defaults = vec![
        ("starter", "Starter", 9.0, 10),
        ("clinic", "Clinic", 29.0, 50),
        ("professional", "Professional", 59.0, 250),
    ];

    for (id, display_name, monthly_price, asset_limit) in defaults {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO plans (id, display_name, monthly_price, asset_limit)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(display_name)
        .bind(monthly_price)
        .bind(asset_limit)
        .execute(pool)
        .await?;
    }

    info!("Default plans seeded");
    Ok(())
}

/// Create the clinics table
///
/// The clinic row is the tenant boundary: every asset query and write is
/// scoped to one clinic identifier. Rows are never hard-deleted.
async fn create_clinics_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS clinics (
            guid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            contact_email TEXT,
            contact_phone TEXT,
            plan_id TEXT NOT NULL DEFAULT 'starter' REFERENCES plans(id),
            subscription_status TEXT NOT NULL DEFAULT 'trial'
                CHECK (subscription_status IN ('trial', 'active', 'expired')),
            trial_started_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the assets table
///
/// Maintenance history and document references are JSON array columns owned
/// exclusively by their asset row. The (clinic_id, created_at) index backs
/// the ordered snapshot query.
async fn create_assets_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS assets (
            guid TEXT PRIMARY KEY,
            clinic_id TEXT NOT NULL REFERENCES clinics(guid) ON DELETE CASCADE,
            name TEXT NOT NULL,
            brand TEXT NOT NULL,
            serial_number TEXT NOT NULL,
            location TEXT,
            next_service_date TEXT,
            status TEXT NOT NULL DEFAULT 'active'
                CHECK (status IN ('active', 'inactive', 'in_service', 'broken')),
            service_provider TEXT,
            service_phone TEXT,
            service_email TEXT,
            notes TEXT,
            documents TEXT NOT NULL DEFAULT '[]',
            maintenance_history TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_assets_clinic_created ON assets(clinic_id, created_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_assets_serial ON assets(serial_number)")
        .execute(pool)
        .await?;

    Ok(())
}
