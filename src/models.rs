//! Offline sync data models
//!
//! These are persisted as JSON in the store and returned by the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Target domain of a queued mutation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SyncModule {
    Tickets,
    TechnicalResources,
    Technicians,
    Villas,
    /// A domain this build has no handler type for
    Other(String),
}

impl SyncModule {
    pub fn as_str(&self) -> &str {
        match self {
            SyncModule::Tickets => "tickets",
            SyncModule::TechnicalResources => "technical_resources",
            SyncModule::Technicians => "technicians",
            SyncModule::Villas => "villas",
            SyncModule::Other(name) => name,
        }
    }
}

impl From<String> for SyncModule {
    fn from(name: String) -> Self {
        match name.as_str() {
            "tickets" => SyncModule::Tickets,
            "technical_resources" => SyncModule::TechnicalResources,
            "technicians" => SyncModule::Technicians,
            "villas" => SyncModule::Villas,
            _ => SyncModule::Other(name),
        }
    }
}

impl From<&str> for SyncModule {
    fn from(name: &str) -> Self {
        SyncModule::from(name.to_string())
    }
}

impl From<SyncModule> for String {
    fn from(module: SyncModule) -> Self {
        module.as_str().to_string()
    }
}

impl fmt::Display for SyncModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncAction::Create => "create",
            SyncAction::Update => "update",
            SyncAction::Delete => "delete",
        })
    }
}

/// A mutation recorded while offline, waiting to be replayed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineSyncItem {
    /// Time-ordered UUID assigned at enqueue time
    pub id: String,
    pub module: SyncModule,
    pub action: SyncAction,
    /// Payload: the full entity for `create`, `{ id, updates }` for
    /// `update`, `{ id }` for `delete`
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl OfflineSyncItem {
    pub fn new(module: SyncModule, action: SyncAction, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            module,
            action,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Id of the entity the payload targets, if it carries one
    pub fn target_id(&self) -> Option<String> {
        match self.data.get("id")? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Short human-readable label used in history details
    pub fn label(&self) -> String {
        match self.target_id() {
            Some(target) => format!("{} {} {}", self.module, self.action, target),
            None => format!("{} {}", self.module, self.action),
        }
    }
}

/// Summary of one drain cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncHistoryEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub total_items: usize,
    pub success_count: usize,
    pub error_count: usize,
    /// One line per processed item, in processing order
    pub details: Vec<String>,
}

/// Body of an enqueue request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub module: SyncModule,
    pub action: SyncAction,
    #[serde(default)]
    pub data: serde_json::Value,
}
