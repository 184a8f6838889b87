//! Asset registry synchronizer
//!
//! Keeps a read-only local mirror of one clinic's assets in step with the
//! store's live feed. The mirror is always driven by the subscription, never
//! by local optimistic writes: the gateway writes to the store, the store
//! republishes, and the new state arrives here like any other delta.
//!
//! Failure is explicit. When the subscription drops, the handle flips to a
//! failed view instead of quietly continuing to serve the last snapshot.
//! Retry is the caller's decision, not this component's.

use medilog_common::db::AssetStore;
use medilog_common::events::AssetSnapshot;
use medilog_common::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// What a subscription holder currently sees: a live snapshot, or an explicit
/// failure (stale data is never displayed as current).
#[derive(Debug, Clone)]
pub enum SyncView {
    Live(AssetSnapshot),
    Failed { message: String },
}

impl SyncView {
    /// Current snapshot, or a sync error if the subscription has failed
    pub fn snapshot(&self) -> Result<&AssetSnapshot> {
        match self {
            SyncView::Live(snapshot) => Ok(snapshot),
            SyncView::Failed { message } => Err(Error::Sync(message.clone())),
        }
    }
}

struct OpenEntry {
    generation: u64,
    cancel: watch::Sender<&'static str>,
}

/// Opens and tracks live subscriptions, at most one per clinic per session
pub struct RegistrySynchronizer {
    store: Arc<AssetStore>,
    open: Arc<Mutex<HashMap<Uuid, OpenEntry>>>,
    generations: AtomicU64,
}

impl RegistrySynchronizer {
    pub fn new(store: Arc<AssetStore>) -> Self {
        Self {
            store,
            open: Arc::new(Mutex::new(HashMap::new())),
            generations: AtomicU64::new(0),
        }
    }

    /// Establish a live subscription for a clinic.
    ///
    /// If a subscription for the same clinic is already open in this session,
    /// it is closed first; its holder sees a failed view, not silent
    /// staleness.
    pub async fn open(&self, clinic_id: Uuid) -> Result<SyncHandle> {
        let prior = {
            let mut open = self.open.lock().expect("subscription registry lock poisoned");
            open.remove(&clinic_id)
        };
        if let Some(entry) = prior {
            info!("Superseding open subscription for clinic {}", clinic_id);
            let _ = entry.cancel.send("superseded by a newer subscription");
        }

        let (initial, feed) = match self.store.subscribe(clinic_id).await {
            Ok(opened) => opened,
            Err(err @ Error::NotFound(_)) => return Err(err),
            Err(err) => return Err(Error::Sync(format!("subscription failed: {}", err))),
        };

        let (view_tx, view_rx) = watch::channel(SyncView::Live(initial));
        let (cancel_tx, cancel_rx) = watch::channel("");

        let task = tokio::spawn(mirror_feed(clinic_id, feed, view_tx, cancel_rx));

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        {
            let mut open = self.open.lock().expect("subscription registry lock poisoned");
            open.insert(
                clinic_id,
                OpenEntry {
                    generation,
                    cancel: cancel_tx,
                },
            );
        }

        info!("Opened registry subscription for clinic {}", clinic_id);
        Ok(SyncHandle {
            clinic_id,
            generation,
            rx: view_rx,
            task: Some(task),
            open: Arc::clone(&self.open),
        })
    }
}

/// Forward feed deltas into the watch channel until cancelled or the feed
/// closes. Each received message is a complete snapshot in feed order; the
/// mirror replaces wholesale and never re-sorts.
async fn mirror_feed(
    clinic_id: Uuid,
    mut feed: broadcast::Receiver<AssetSnapshot>,
    view_tx: watch::Sender<SyncView>,
    mut cancel_rx: watch::Receiver<&'static str>,
) {
    loop {
        tokio::select! {
            changed = cancel_rx.changed() => {
                let message = if changed.is_ok() {
                    *cancel_rx.borrow()
                } else {
                    "subscription closed"
                };
                let _ = view_tx.send(SyncView::Failed {
                    message: message.to_string(),
                });
                break;
            }
            received = feed.recv() => match received {
                Ok(snapshot) => {
                    if view_tx.send(SyncView::Live(snapshot)).is_err() {
                        // Handle dropped; nothing left to notify
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Whole-snapshot feed: the next message supersedes
                    // anything missed, so lag costs nothing but this log line
                    warn!(
                        "Asset feed for clinic {} lagged by {} snapshots",
                        clinic_id, skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    let _ = view_tx.send(SyncView::Failed {
                        message: "asset feed closed".to_string(),
                    });
                    break;
                }
            },
        }
    }
}

/// Handle to one open subscription.
///
/// `current()` reads the present view; `changed()` wakes once per delivered
/// delta. Dropping the handle tears the mirror task down; `close()` does the
/// same but waits until the subscription is fully released.
pub struct SyncHandle {
    clinic_id: Uuid,
    generation: u64,
    rx: watch::Receiver<SyncView>,
    task: Option<JoinHandle<()>>,
    open: Arc<Mutex<HashMap<Uuid, OpenEntry>>>,
}

impl SyncHandle {
    pub fn clinic_id(&self) -> Uuid {
        self.clinic_id
    }

    /// The current view: live snapshot or explicit failure
    pub fn current(&self) -> SyncView {
        self.rx.borrow().clone()
    }

    /// A clonable receiver over the same view, for streaming consumers
    pub fn watch(&self) -> watch::Receiver<SyncView> {
        self.rx.clone()
    }

    /// True while the mirror task is running and the view is not failed.
    /// Once false the handle can only be closed; deltas will never resume.
    pub fn is_live(&self) -> bool {
        self.rx.has_changed().is_ok() && !matches!(&*self.rx.borrow(), SyncView::Failed { .. })
    }

    /// Wait for the next view change.
    ///
    /// Errors once the subscription is gone for good (closed or superseded
    /// and torn down).
    pub async fn changed(&mut self) -> Result<()> {
        self.rx
            .changed()
            .await
            .map_err(|_| Error::Sync("subscription closed".to_string()))
    }

    /// Close the subscription. Idempotent; returns only after the mirror
    /// task has stopped and the feed receiver is released.
    pub async fn close(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        {
            let mut open = self.open.lock().expect("subscription registry lock poisoned");
            let owns_entry = open
                .get(&self.clinic_id)
                .is_some_and(|entry| entry.generation == self.generation);
            if owns_entry {
                if let Some(entry) = open.remove(&self.clinic_id) {
                    let _ = entry.cancel.send("subscription closed");
                }
            }
        }

        // If this handle was already superseded the cancel signal has fired;
        // either way the task is on its way out.
        task.abort();
        let _ = task.await;
        // Mark any final view as seen so `changed()` after close errors
        // instead of reporting one last stale wake-up
        let _ = self.rx.borrow_and_update();
        info!("Closed registry subscription for clinic {}", self.clinic_id);
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
