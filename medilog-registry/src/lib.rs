//! medilog-registry library — live clinic equipment registry
//!
//! Wires the store, the registry synchronizer, and the mutation gateway into
//! one application state and exposes them over HTTP/SSE. The server keeps at
//! most one live subscription per clinic, opened on first use and replaced
//! only after it has explicitly failed.

use axum::routing::{get, post, put};
use axum::Router;
use medilog_common::db::AssetStore;
use medilog_common::models::NewAsset;
use medilog_common::Result;
use sqlx::SqlitePool;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub mod api;
pub mod gateway;
pub mod scan;
pub mod sync;

use gateway::MutationGateway;
use sync::{RegistrySynchronizer, SyncHandle, SyncView};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<AssetStore>,
    pub synchronizer: Arc<RegistrySynchronizer>,
    pub gateway: Arc<MutationGateway>,
    /// The server session's open subscriptions, one per clinic
    subs: Arc<Mutex<HashMap<Uuid, SyncHandle>>>,
}

impl AppState {
    /// Create application state over an initialized database pool
    pub fn new(pool: SqlitePool) -> Self {
        let store = Arc::new(AssetStore::new(pool));
        let synchronizer = Arc::new(RegistrySynchronizer::new(Arc::clone(&store)));
        let gateway = Arc::new(MutationGateway::new(Arc::clone(&store)));
        Self {
            store,
            synchronizer,
            gateway,
            subs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Watch the live view for a clinic, opening the subscription on first use
    pub async fn subscription(&self, clinic_id: Uuid) -> Result<watch::Receiver<SyncView>> {
        let mut subs = self.subs.lock().await;
        let handle = self.live_handle(&mut subs, clinic_id).await?;
        Ok(handle.watch())
    }

    /// Create an asset through the gateway, against the clinic's open
    /// subscription (the quota check reads its current count)
    pub async fn create_asset(&self, clinic_id: Uuid, fields: NewAsset) -> Result<Uuid> {
        let mut subs = self.subs.lock().await;
        let handle = self.live_handle(&mut subs, clinic_id).await?;
        self.gateway.create_asset(handle, fields).await
    }

    /// Get the clinic's subscription handle, reopening a dead one.
    ///
    /// A handle goes dead when its feed drops or a newer subscription
    /// supersedes it; it never recovers on its own (retry is a caller
    /// decision), so the server session replaces it here.
    async fn live_handle<'a>(
        &self,
        subs: &'a mut HashMap<Uuid, SyncHandle>,
        clinic_id: Uuid,
    ) -> Result<&'a mut SyncHandle> {
        match subs.entry(clinic_id) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_live() {
                    occupied.get_mut().close().await;
                    let replacement = self.synchronizer.open(clinic_id).await?;
                    *occupied.get_mut() = replacement;
                }
                Ok(occupied.into_mut())
            }
            Entry::Vacant(vacant) => {
                let handle = self.synchronizer.open(clinic_id).await?;
                Ok(vacant.insert(handle))
            }
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health_check))
        .route("/api/clinic", post(api::register_clinic).get(api::get_clinic))
        .route("/api/clinic/subscription", put(api::update_subscription))
        .route("/api/assets", get(api::list_assets).post(api::create_asset))
        .route("/api/assets/resolve", get(api::resolve_token))
        .route(
            "/api/assets/:id",
            put(api::update_asset).delete(api::delete_asset),
        )
        .route("/api/assets/:id/qr", get(api::qr_token))
        .route("/api/assets/:id/maintenance", post(api::append_maintenance))
        .route("/api/assets/:id/documents", post(api::attach_document))
        .route("/api/events", get(api::event_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
