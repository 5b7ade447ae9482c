//! Remote store contract for workspace embedding.

use async_trait::async_trait;
use folio_reactive::{CancellationToken, Retryable};
use thiserror::Error;

use crate::types::{
    EmbeddingFile, EmbeddingFilePage, EmbeddingProgress, IgnoredDoc, Pagination, UploadFile,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    /// Some files of an upload batch were rejected. `failed` holds their
    /// indices within the batch.
    #[error("{} file(s) failed to upload: {message}", failed.len())]
    PartialBatch { failed: Vec<usize>, message: String },
}

impl Retryable for EmbeddingError {
    fn is_transient(&self) -> bool {
        match self {
            EmbeddingError::Network(_) | EmbeddingError::Timeout => true,
            EmbeddingError::Server { status, .. } => *status >= 500,
            EmbeddingError::Validation(_) | EmbeddingError::PartialBatch { .. } => false,
        }
    }
}

/// Server-side embedding operations for a workspace.
///
/// Implementations must stop the underlying request when `signal` is
/// cancelled. Dropping the returned future must have the same effect.
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    async fn get_enabled(
        &self,
        workspace_id: &str,
        signal: CancellationToken,
    ) -> Result<bool, EmbeddingError>;

    async fn update_enabled(
        &self,
        workspace_id: &str,
        enabled: bool,
        signal: CancellationToken,
    ) -> Result<(), EmbeddingError>;

    async fn get_ignored_docs(
        &self,
        workspace_id: &str,
        signal: CancellationToken,
    ) -> Result<Vec<IgnoredDoc>, EmbeddingError>;

    async fn update_ignored_docs(
        &self,
        workspace_id: &str,
        add: &[String],
        remove: &[String],
        signal: CancellationToken,
    ) -> Result<(), EmbeddingError>;

    async fn get_embedding_files(
        &self,
        workspace_id: &str,
        pagination: &Pagination,
        signal: CancellationToken,
    ) -> Result<EmbeddingFilePage, EmbeddingError>;

    /// Upload a batch. Either every file is stored, or the error says which
    /// ones were not.
    async fn add_embedding_files(
        &self,
        workspace_id: &str,
        files: &[UploadFile],
        signal: CancellationToken,
    ) -> Result<Vec<EmbeddingFile>, EmbeddingError>;

    async fn remove_embedding_file(
        &self,
        workspace_id: &str,
        file_id: &str,
        signal: CancellationToken,
    ) -> Result<(), EmbeddingError>;

    async fn get_embedding_progress(
        &self,
        workspace_id: &str,
        signal: CancellationToken,
    ) -> Result<EmbeddingProgress, EmbeddingError>;
}
