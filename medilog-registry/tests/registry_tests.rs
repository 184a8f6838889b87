//! End-to-end tests over the synchronizer, gateway, and scan session
//!
//! These drive the components directly (no HTTP): open a live subscription,
//! write through the gateway, observe the echo through the feed, and resolve
//! a scanned token back to the exact asset.

use medilog_common::db::{init_database, AssetStore};
use medilog_common::models::{AssetStatus, Clinic, NewAsset};
use medilog_common::quota::DenyReason;
use medilog_common::{qr, Error};
use medilog_registry::gateway::MutationGateway;
use medilog_registry::scan::{Frame, FrameSource, ScanSession, TokenDetector};
use medilog_registry::sync::{RegistrySynchronizer, SyncView};
use std::sync::Arc;

async fn setup() -> (
    tempfile::TempDir,
    Arc<AssetStore>,
    RegistrySynchronizer,
    MutationGateway,
    Clinic,
) {
    let dir = tempfile::tempdir().expect("tempdir");
    let pool = init_database(&dir.path().join("medilog.db"))
        .await
        .expect("database init");
    let store = Arc::new(AssetStore::new(pool));
    let synchronizer = RegistrySynchronizer::new(Arc::clone(&store));
    let gateway = MutationGateway::new(Arc::clone(&store));
    let clinic = store
        .create_clinic("Acme Clinic", None, None)
        .await
        .expect("clinic");
    (dir, store, synchronizer, gateway, clinic)
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

/// Camera that shows one printed label, then nothing
struct LabelCamera {
    label: Option<Frame>,
}

impl LabelCamera {
    fn showing(payload: &str) -> Self {
        Self {
            label: Some(Frame {
                width: 250,
                height: 250,
                luma: payload.as_bytes().to_vec(),
            }),
        }
    }
}

impl FrameSource for LabelCamera {
    fn next_frame(&mut self) -> Option<Frame> {
        self.label.take()
    }

    fn release(&mut self) {}
}

/// Detector that reads the payload a frame carries
struct PayloadDetector;

impl TokenDetector for PayloadDetector {
    fn detect(&mut self, frame: &Frame) -> Option<String> {
        std::str::from_utf8(&frame.luma).ok().map(str::to_string)
    }
}

#[tokio::test]
async fn test_create_echoes_through_feed_and_scans_back() {
    let (_dir, _store, synchronizer, gateway, clinic) = setup().await;

    let mut handle = synchronizer.open(clinic.guid).await.expect("open");
    let initial = handle.current().snapshot().expect("live view").count();
    assert_eq!(initial, 0);

    let first = gateway
        .create_asset(&handle, new_asset("Autoclave"))
        .await
        .expect("create below limit");

    handle.changed().await.expect("delta notification");
    let second = gateway
        .create_asset(&handle, new_asset("Centrifuge"))
        .await
        .expect("create below limit");
    handle.changed().await.expect("delta notification");

    let view = handle.current();
    let snapshot = view.snapshot().expect("live view");
    assert_eq!(snapshot.count(), 2);
    // Newest first, with a later creation timestamp than every prior asset
    assert_eq!(snapshot.assets[0].guid, second);
    assert_eq!(snapshot.assets[1].guid, first);
    assert!(snapshot.assets[0].created_at > snapshot.assets[1].created_at);

    // Scan the newest asset's own printed token
    let token = qr::encode(clinic.guid, second);
    let session = ScanSession::start_at(LabelCamera::showing(&token), PayloadDetector, 200);
    let scanned = session.wait().await.expect("label decodes");

    let asset_id = qr::decode(&scanned).expect("token decodes");
    let found = qr::resolve(&asset_id, &snapshot.assets).expect("token resolves");
    assert_eq!(found.guid, second);
    assert_eq!(found.name, "Centrifuge");

    handle.close().await;
}

#[tokio::test]
async fn test_second_open_supersedes_first() {
    let (_dir, _store, synchronizer, gateway, clinic) = setup().await;

    let mut first = synchronizer.open(clinic.guid).await.expect("first open");
    let mut second = synchronizer.open(clinic.guid).await.expect("second open");

    // The first holder is told, not left staring at stale data
    first.changed().await.expect("failure is signaled");
    match first.current() {
        SyncView::Failed { message } => {
            assert!(message.contains("superseded"), "got: {}", message)
        }
        SyncView::Live(_) => panic!("superseded handle still reports live data"),
    }
    assert!(!first.is_live());

    // The replacement keeps mirroring
    gateway
        .create_asset(&second, new_asset("Autoclave"))
        .await
        .expect("create");
    second.changed().await.expect("delta notification");
    assert_eq!(second.current().snapshot().expect("live").count(), 1);

    first.close().await;
    second.close().await;
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (_dir, _store, synchronizer, _gateway, clinic) = setup().await;

    let mut handle = synchronizer.open(clinic.guid).await.expect("open");
    handle.close().await;
    handle.close().await; // second close is a no-op

    let err = handle.changed().await.err().expect("closed handle errors");
    assert!(matches!(err, Error::Sync(_)));
}

#[tokio::test]
async fn test_open_unknown_clinic_fails() {
    let (_dir, _store, synchronizer, _gateway, _clinic) = setup().await;

    let err = synchronizer
        .open(uuid::Uuid::new_v4())
        .await
        .err()
        .expect("must fail");
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_quota_refusal_writes_nothing() {
    let (_dir, store, synchronizer, gateway, clinic) = setup().await;

    store
        .set_subscription(clinic.guid, None, medilog_common::models::SubscriptionStatus::Expired)
        .await
        .expect("expire subscription");

    let handle = synchronizer.open(clinic.guid).await.expect("open");
    let feed = handle.watch();

    let err = gateway
        .create_asset(&handle, new_asset("Autoclave"))
        .await
        .err()
        .expect("refused");
    assert!(matches!(
        err,
        Error::QuotaDenied(DenyReason::SubscriptionExpired)
    ));

    // No partial write: nothing stored, no delta published
    assert_eq!(handle.current().snapshot().expect("live").count(), 0);
    assert_eq!(feed.has_changed().ok(), Some(false));
}

#[tokio::test]
async fn test_delete_twice_then_snapshot_lacks_id() {
    let (_dir, _store, synchronizer, gateway, clinic) = setup().await;

    let mut handle = synchronizer.open(clinic.guid).await.expect("open");
    let asset = gateway
        .create_asset(&handle, new_asset("Defibrillator"))
        .await
        .expect("create");
    handle.changed().await.expect("delta");

    gateway.delete_asset(asset).await.expect("first delete");
    gateway
        .delete_asset(asset)
        .await
        .expect("second delete is not an error");

    handle.changed().await.expect("delta");
    let view = handle.current();
    let snapshot = view.snapshot().expect("live");
    assert!(snapshot.assets.iter().all(|a| a.guid != asset));

    handle.close().await;
}
