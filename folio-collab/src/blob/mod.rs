//! Blob storage for binary attachments referenced by the document tree.
//!
//! ```text
//! ┌─────────────┐   get / set    ┌────────────┐  miss / upload  ┌───────────────┐
//! │ BlobSource  │ ─────────────► │ BlobEngine │ ──────────────► │ remote storage│
//! │ (facade)    │                │            │                 │ (optional)    │
//! └─────────────┘                └─────┬──────┘                 └───────────────┘
//!                                      │
//!                                      ▼
//!                               ┌──────────────────┐
//!                               │ RocksBlobStorage │  CF "blobs"     LZ4 payloads
//!                               │ (local cache)    │  CF "blob_meta" mime, sizes
//!                               └──────────────────┘
//! ```
//!
//! All blob mutation goes through [`BlobEngine`]; nothing writes to a
//! [`BlobStorage`] behind its back.

pub mod engine;
pub mod rocks;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

pub use engine::BlobEngine;
pub use rocks::{BlobStoreConfig, RocksBlobStorage};

/// One stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRecord {
    pub key: String,
    pub data: Vec<u8>,
    pub mime: String,
    /// Seconds since epoch
    pub created_at: u64,
}

impl BlobRecord {
    pub fn new(key: impl Into<String>, data: Vec<u8>, mime: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            data,
            mime: mime.into(),
            created_at: now_secs(),
        }
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Sync status of one blob key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlobStatus {
    #[default]
    Idle,
    Uploading,
    Downloading,
    Synced,
    Error,
}

/// Observable per-key state, published by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlobState {
    pub status: BlobStatus,
    pub error: Option<String>,
}

impl BlobState {
    pub fn with_status(status: BlobStatus) -> Self {
        Self { status, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: BlobStatus::Error,
            error: Some(error.into()),
        }
    }
}

/// Blob errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BlobError {
    #[error("Blob not found: {0}")]
    NotFound(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Remote blob storage error: {0}")]
    Remote(String),
    #[error("Blob operation cancelled")]
    Cancelled,
}

impl From<rocksdb::Error> for BlobError {
    fn from(e: rocksdb::Error) -> Self {
        BlobError::Database(e.to_string())
    }
}

/// Key/value storage for blobs, local or remote.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<BlobRecord>, BlobError>;
    async fn set(&self, record: BlobRecord) -> Result<(), BlobError>;
    async fn delete(&self, key: &str) -> Result<(), BlobError>;
    async fn list(&self) -> Result<Vec<String>, BlobError>;
}
