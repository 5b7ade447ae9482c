//! # folio-embedding: Workspace embedding settings for Folio
//!
//! Tracks whether a workspace is embedded for AI context, which documents
//! are excluded, which files are attached, and how far indexing has come.
//! All state lives in [`folio_reactive::LiveData`] containers driven by
//! effect pipelines over an [`EmbeddingStore`].
//!
//! ## Modules
//!
//! - [`entity`]: The `Embedding` entity
//! - [`store`]: Remote store contract and error type
//! - [`types`]: Attachments, ignored docs, progress, pagination
//! - [`config`]: Entity configuration
//! - [`confirm`]: Confirmation step for destructive operations

pub mod config;
pub mod confirm;
pub mod entity;
pub mod store;
pub mod types;

// Re-exports for convenience
pub use config::{EmbeddingConfig, MAX_PAGE_SIZE};
pub use confirm::{AutoConfirm, ConfirmRequest, Confirmation};
pub use entity::Embedding;
pub use store::{EmbeddingError, EmbeddingStore};
pub use types::{
    Attachment, AttachmentPage, AttachmentStatus, EmbeddingFile, EmbeddingFilePage,
    EmbeddingProgress, IgnoredDoc, IgnoredDocsUpdate, LocalAttachment, PageInfo, Pagination,
    PersistedAttachment, UploadFile, UploadStatus,
};
