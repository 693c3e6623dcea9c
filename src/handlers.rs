//! Replay handlers for queued mutations

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{OfflineSyncItem, SyncAction, SyncModule};

/// Applies one queued item to the backing store.
///
/// Implementations dispatch on `item.action` and return an error when the
/// mutation was not applied.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    async fn apply(&self, item: &OfflineSyncItem) -> Result<()>;
}

/// Dispatch table from sync module to its handler
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<SyncModule, Arc<dyn SyncHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, module: SyncModule, handler: Arc<dyn SyncHandler>) -> Self {
        self.register(module, handler);
        self
    }

    pub fn register(&mut self, module: SyncModule, handler: Arc<dyn SyncHandler>) {
        self.handlers.insert(module, handler);
    }

    pub fn get(&self, module: &SyncModule) -> Option<&Arc<dyn SyncHandler>> {
        self.handlers.get(module)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Forwards queued mutations to a REST backend.
///
/// `create` posts the payload to `{base}/{module}`, `update` patches
/// `{base}/{module}/{id}` with the `updates` object and `delete` removes
/// `{base}/{module}/{id}`.
pub struct RestHandler {
    client: reqwest::Client,
    base_url: String,
}

impl RestHandler {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Table routing every known module to this backend
    pub fn into_table(self) -> HandlerTable {
        let handler: Arc<dyn SyncHandler> = Arc::new(self);
        [
            SyncModule::Tickets,
            SyncModule::TechnicalResources,
            SyncModule::Technicians,
            SyncModule::Villas,
        ]
        .into_iter()
        .fold(HandlerTable::new(), |table, module| {
            table.with(module, handler.clone())
        })
    }

    fn collection_url(&self, module: &SyncModule) -> String {
        format!("{}/{}", self.base_url, module)
    }

    fn entity_url(&self, item: &OfflineSyncItem) -> Result<String> {
        let id = item
            .target_id()
            .with_context(|| format!("{} payload has no entity id", item.action))?;
        Ok(format!("{}/{}", self.collection_url(&item.module), id))
    }
}

#[async_trait]
impl SyncHandler for RestHandler {
    async fn apply(&self, item: &OfflineSyncItem) -> Result<()> {
        let request = match item.action {
            SyncAction::Create => self
                .client
                .post(self.collection_url(&item.module))
                .json(&item.data),
            SyncAction::Update => {
                let updates = item
                    .data
                    .get("updates")
                    .context("update payload has no updates object")?;
                self.client.patch(self.entity_url(item)?).json(updates)
            }
            SyncAction::Delete => self.client.delete(self.entity_url(item)?),
        };

        let response = request.send().await.context("Backend request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("backend returned {}: {}", status, body);
        }

        tracing::debug!(item_id = %item.id, label = %item.label(), "Replayed item on backend");
        Ok(())
    }
}
