//! Persistent FIFO queue of offline mutations and its drain loop
//!
//! A drain replays a snapshot of the queue strictly in insertion order.
//! Each item is removed from the persisted queue as soon as it has been
//! processed, so an interrupted drain leaves exactly the unprocessed
//! remainder queued. A handler error fails only its own item; the drain
//! continues with the next one.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::handlers::HandlerTable;
use crate::models::{OfflineSyncItem, SyncAction, SyncHistoryEntry, SyncModule};
use crate::store::Store;

pub const QUEUE_KEY: &str = "pending-sync-queue";
pub const HISTORY_KEY: &str = "sync-history";
pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

/// What happens to an item whose handler failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailedItemPolicy {
    /// Record the failure in history and drop the item (at-most-once)
    #[default]
    Drop,
    /// Record the failure and keep the item queued for the next drain
    Retain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Offline,
    EmptyQueue,
    AlreadyDraining,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DrainOutcome {
    Completed(SyncHistoryEntry),
    Skipped { reason: SkipReason },
}

/// Clears the draining flag when the drain ends, including when the drain
/// future is dropped part-way.
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncQueue {
    store: Arc<Store>,
    history_capacity: usize,
    failed_items: FailedItemPolicy,
    draining: AtomicBool,
    // Set by enqueue, cleared when a drain takes its snapshot
    arrivals: AtomicBool,
    // Serializes read-modify-write of the persisted queue and history
    state_lock: Mutex<()>,
}

impl SyncQueue {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            failed_items: FailedItemPolicy::default(),
            draining: AtomicBool::new(false),
            arrivals: AtomicBool::new(false),
            state_lock: Mutex::new(()),
        }
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity.max(1);
        self
    }

    pub fn with_failed_items(mut self, policy: FailedItemPolicy) -> Self {
        self.failed_items = policy;
        self
    }

    /// Append a mutation to the persisted queue.
    pub fn enqueue(
        &self,
        module: SyncModule,
        action: SyncAction,
        data: serde_json::Value,
    ) -> OfflineSyncItem {
        let item = OfflineSyncItem::new(module, action, data);

        let _guard = self.lock();
        let mut queue = self.load_queue();
        queue.push(item.clone());
        self.store.set(QUEUE_KEY, &queue);
        self.arrivals.store(true, Ordering::SeqCst);

        tracing::info!(
            item_id = %item.id,
            module = %item.module,
            action = %item.action,
            pending = queue.len(),
            "Queued offline change"
        );
        item
    }

    pub fn pending_items(&self) -> Vec<OfflineSyncItem> {
        let _guard = self.lock();
        self.load_queue()
    }

    pub fn pending_count(&self) -> usize {
        self.pending_items().len()
    }

    /// History entries, most recent first
    pub fn history(&self) -> Vec<SyncHistoryEntry> {
        let _guard = self.lock();
        self.load_history()
    }

    /// Empty the history log. Pending items are untouched.
    pub fn clear_history(&self) {
        let _guard = self.lock();
        self.store.set(HISTORY_KEY, &Vec::<SyncHistoryEntry>::new());
        tracing::info!("Cleared sync history");
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Whether items were enqueued after the last drain took its snapshot.
    pub fn has_unsnapshotted_items(&self) -> bool {
        self.arrivals.load(Ordering::SeqCst)
    }

    /// Replay the queued items through `handlers`.
    ///
    /// Does nothing when offline, when another drain is running, or when the
    /// queue is empty. Items enqueued while the drain runs wait for the next
    /// one.
    pub async fn process(&self, handlers: &HandlerTable, online: bool) -> DrainOutcome {
        if !online {
            return DrainOutcome::Skipped {
                reason: SkipReason::Offline,
            };
        }

        let Some(_drain) = DrainGuard::acquire(&self.draining) else {
            tracing::debug!("Drain already in progress, ignoring request");
            return DrainOutcome::Skipped {
                reason: SkipReason::AlreadyDraining,
            };
        };

        let snapshot = {
            let _guard = self.lock();
            self.arrivals.store(false, Ordering::SeqCst);
            self.load_queue()
        };
        if snapshot.is_empty() {
            return DrainOutcome::Skipped {
                reason: SkipReason::EmptyQueue,
            };
        }

        tracing::info!(items = snapshot.len(), "Draining offline sync queue");

        let mut success_count = 0;
        let mut error_count = 0;
        let mut details = Vec::with_capacity(snapshot.len());

        for (index, item) in snapshot.iter().enumerate() {
            let result = match handlers.get(&item.module) {
                Some(handler) => handler.apply(item).await.map_err(|e| format!("{:#}", e)),
                None => Err("unsupported module".to_string()),
            };

            match result {
                Ok(()) => {
                    success_count += 1;
                    details.push(format!("{}: synced", item.label()));
                    self.remove_item(&item.id);
                }
                Err(reason) => {
                    error_count += 1;
                    tracing::warn!(
                        item_id = %item.id,
                        index,
                        module = %item.module,
                        action = %item.action,
                        error = %reason,
                        "Failed to replay queued change"
                    );
                    details.push(format!("{}: failed: {}", item.label(), reason));
                    if self.failed_items == FailedItemPolicy::Drop {
                        self.remove_item(&item.id);
                    }
                }
            }
        }

        let entry = SyncHistoryEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            total_items: snapshot.len(),
            success_count,
            error_count,
            details,
        };
        self.push_history(entry.clone());

        tracing::info!(
            total = entry.total_items,
            succeeded = entry.success_count,
            failed = entry.error_count,
            "Drain complete"
        );

        DrainOutcome::Completed(entry)
    }

    fn remove_item(&self, id: &str) {
        let _guard = self.lock();
        let mut queue = self.load_queue();
        queue.retain(|item| item.id != id);
        self.store.set(QUEUE_KEY, &queue);
    }

    fn push_history(&self, entry: SyncHistoryEntry) {
        let _guard = self.lock();
        let mut history = self.load_history();
        history.insert(0, entry);
        history.truncate(self.history_capacity);
        self.store.set(HISTORY_KEY, &history);
    }

    fn load_queue(&self) -> Vec<OfflineSyncItem> {
        self.store.get(QUEUE_KEY, Vec::new())
    }

    fn load_history(&self) -> Vec<SyncHistoryEntry> {
        self.store.get(HISTORY_KEY, Vec::new())
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.state_lock.lock().unwrap_or_else(|e| e.into_inner())
    }
}
