//! Error types for the opsdeck engines

use thiserror::Error;

/// Failures of the durable key-value backend.
///
/// These never escape [`crate::store::Store`]; they are logged and the store
/// falls back to its in-process overlay.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to create store directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("store connection lock poisoned")]
    Poisoned,
}

/// Rejected module-order commands
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderError {
    #[error("index {index} out of range for {len} visible modules")]
    IndexOutOfRange { index: usize, len: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate module id: {0}")]
    DuplicateModule(String),

    #[error("module {0} has no allowed roles")]
    NoRoles(String),

    #[error("unknown role: {0}")]
    UnknownRole(String),
}
