//! Sync orchestration: connectivity-triggered and manual drains
//!
//! When connectivity comes back with work queued, the drain starts after a
//! settle delay. Another connectivity change before the delay elapses
//! cancels the pending drain (offline) or restarts the delay (online again).
//!
//! Changes submitted while a drain is running are picked up by a follow-up
//! drain as soon as it finishes.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::connectivity::Connectivity;
use crate::handlers::HandlerTable;
use crate::models::{OfflineSyncItem, SyncAction, SyncModule};
use crate::queue::{DrainOutcome, SyncQueue};

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Snapshot for the dashboard's sync indicator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub online: bool,
    pub draining: bool,
    pub pending: usize,
    pub history_len: usize,
    pub last_sync: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
enum DrainTrigger {
    Reconnected,
    Manual,
    Submitted,
    FollowUp,
}

struct Inner {
    queue: Arc<SyncQueue>,
    handlers: HandlerTable,
    connectivity: Connectivity,
    settle_delay: Duration,
}

#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    pub fn new(
        queue: Arc<SyncQueue>,
        handlers: HandlerTable,
        connectivity: Connectivity,
        settle_delay: Duration,
    ) -> Self {
        if handlers.is_empty() {
            tracing::warn!("No sync handlers registered, every queued change will fail to replay");
        }

        Self {
            inner: Arc::new(Inner {
                queue,
                handlers,
                connectivity,
                settle_delay,
            }),
        }
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.inner.queue
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.inner.connectivity
    }

    /// Queue a change and, when online, replay it right away.
    pub fn submit(
        &self,
        module: SyncModule,
        action: SyncAction,
        data: serde_json::Value,
    ) -> OfflineSyncItem {
        let item = self.inner.queue.enqueue(module, action, data);

        if self.inner.connectivity.is_online() {
            let this = self.clone();
            tokio::spawn(async move {
                this.drain(DrainTrigger::Submitted).await;
            });
        }
        item
    }

    /// User-initiated drain. A no-op while another drain is running.
    ///
    /// The drain runs on its own task and completes its snapshot even if
    /// the caller stops waiting for it.
    pub async fn force_sync_now(&self) -> anyhow::Result<DrainOutcome> {
        let this = self.clone();
        tokio::spawn(async move { this.drain(DrainTrigger::Manual).await })
            .await
            .context("Drain task failed")
    }

    pub fn clear_history(&self) {
        self.inner.queue.clear_history();
    }

    pub fn status(&self) -> SyncStatus {
        let history = self.inner.queue.history();
        SyncStatus {
            online: self.inner.connectivity.is_online(),
            draining: self.inner.queue.is_draining(),
            pending: self.inner.queue.pending_count(),
            history_len: history.len(),
            last_sync: history.first().map(|entry| entry.timestamp),
        }
    }

    /// Start watching connectivity until `cancel` fires.
    pub fn spawn(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let rx = self.inner.connectivity.subscribe();
        tokio::spawn(self.clone().run(rx, cancel))
    }

    async fn run(self, mut rx: watch::Receiver<bool>, cancel: CancellationToken) {
        let mut deadline = None;
        if *rx.borrow_and_update() {
            deadline = self.schedule();
        }

        loop {
            let settle = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if *rx.borrow_and_update() {
                        deadline = self.schedule();
                    } else if deadline.take().is_some() {
                        tracing::debug!("Went offline before settle delay elapsed, drain cancelled");
                    }
                }
                _ = settle => {
                    deadline = None;
                    self.drain(DrainTrigger::Reconnected).await;
                }
            }
        }

        tracing::debug!("Sync orchestrator stopped");
    }

    fn schedule(&self) -> Option<Instant> {
        let pending = self.inner.queue.pending_count();
        if pending == 0 {
            return None;
        }

        tracing::info!(
            pending,
            delay_ms = self.inner.settle_delay.as_millis() as u64,
            "Online with pending changes, scheduling drain"
        );
        Some(Instant::now() + self.inner.settle_delay)
    }

    async fn drain(&self, trigger: DrainTrigger) -> DrainOutcome {
        let outcome = self.drain_once(trigger).await;
        if !matches!(outcome, DrainOutcome::Completed(_)) {
            return outcome;
        }

        // Submissions rejected as AlreadyDraining while this drain ran
        while self.inner.queue.has_unsnapshotted_items() {
            tracing::debug!("Changes queued during drain, draining again");
            if !matches!(
                self.drain_once(DrainTrigger::FollowUp).await,
                DrainOutcome::Completed(_)
            ) {
                break;
            }
        }
        outcome
    }

    async fn drain_once(&self, trigger: DrainTrigger) -> DrainOutcome {
        let online = self.inner.connectivity.is_online();
        let outcome = self.inner.queue.process(&self.inner.handlers, online).await;

        if let DrainOutcome::Skipped { reason } = &outcome {
            tracing::debug!(?trigger, ?reason, "Drain skipped");
        }
        outcome
    }
}
