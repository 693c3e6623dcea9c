//! Online/offline signal consumed by the sync orchestrator

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Shared connectivity flag. Subscribers are only woken on real transitions.
#[derive(Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Update the flag. Returns whether it changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            if online {
                tracing::info!("Connectivity restored");
            } else {
                tracing::warn!("Connectivity lost");
            }
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Poll `url` every `interval` and mirror reachability into `connectivity`.
///
/// Any HTTP response counts as online; transport errors count as offline.
pub async fn probe_loop(
    connectivity: Connectivity,
    url: String,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) {
    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build probe client, connectivity probe disabled");
            return;
        }
    };

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Connectivity probe stopped");
                return;
            }
            _ = ticker.tick() => {}
        }

        let reachable = match client.get(&url).send().await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Connectivity probe failed");
                false
            }
        };
        connectivity.set_online(reachable);
    }
}
