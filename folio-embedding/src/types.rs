//! Attachment, ignored-doc and progress data model.
//!
//! An attachment is either a [`LocalAttachment`] (an optimistic placeholder
//! for a file still being uploaded, keyed by a client-generated id) or a
//! [`PersistedAttachment`] (a server record). The two never share a type, so
//! a placeholder cannot carry a server id and a server record cannot be
//! "uploading".

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A file handed to [`add_attachments`](crate::Embedding::add_attachments).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadFile {
    pub file_name: String,
    pub mime_type: String,
    /// Last modification time, ms since epoch
    pub last_modified: u64,
    pub data: Vec<u8>,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            last_modified: 0,
            data,
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadStatus {
    Uploading,
    Error,
}

/// Optimistic placeholder shown while a file uploads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalAttachment {
    pub local_id: String,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    pub created_at: u64,
    pub status: UploadStatus,
    pub error_message: Option<String>,
}

impl LocalAttachment {
    /// Placeholder for `file` with a fresh ephemeral id.
    pub fn placeholder(file: &UploadFile) -> Self {
        Self {
            local_id: format!("local-{}", Uuid::new_v4()),
            file_name: file.file_name.clone(),
            mime_type: file.mime_type.clone(),
            size: file.size(),
            created_at: file.last_modified,
            status: UploadStatus::Uploading,
            error_message: None,
        }
    }

    pub fn failed(mut self, message: &str) -> Self {
        self.status = UploadStatus::Error;
        self.error_message = Some(message.to_string());
        self
    }
}

/// Attachment confirmed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedAttachment {
    pub id: String,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    pub created_at: u64,
}

/// Embedding file as the server reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingFile {
    pub file_id: String,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    pub created_at: u64,
}

impl From<EmbeddingFile> for PersistedAttachment {
    fn from(file: EmbeddingFile) -> Self {
        Self {
            id: file.file_id,
            file_name: file.file_name,
            mime_type: file.mime_type,
            size: file.size,
            created_at: file.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentStatus {
    Uploading,
    Error,
    Uploaded,
}

/// Entry of the merged attachment view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    Local(LocalAttachment),
    Persisted(PersistedAttachment),
}

impl Attachment {
    /// Ephemeral id for placeholders, server id otherwise.
    pub fn id(&self) -> &str {
        match self {
            Attachment::Local(local) => &local.local_id,
            Attachment::Persisted(persisted) => &persisted.id,
        }
    }

    pub fn file_name(&self) -> &str {
        match self {
            Attachment::Local(local) => &local.file_name,
            Attachment::Persisted(persisted) => &persisted.file_name,
        }
    }

    pub fn status(&self) -> AttachmentStatus {
        match self {
            Attachment::Local(local) => match local.status {
                UploadStatus::Uploading => AttachmentStatus::Uploading,
                UploadStatus::Error => AttachmentStatus::Error,
            },
            Attachment::Persisted(_) => AttachmentStatus::Uploaded,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Attachment::Local(_))
    }
}

/// Cursor-based page request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub first: u32,
    pub after: Option<String>,
}

impl Pagination {
    pub fn first_page(size: u32) -> Self {
        Self {
            first: size,
            after: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
}

/// One page of server records, as returned by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingFilePage {
    pub total_count: u64,
    pub page_info: PageInfo,
    pub items: Vec<EmbeddingFile>,
}

/// The currently loaded attachment page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentPage {
    pub total_count: u64,
    pub page_info: PageInfo,
    pub items: Vec<PersistedAttachment>,
}

impl From<EmbeddingFilePage> for AttachmentPage {
    fn from(page: EmbeddingFilePage) -> Self {
        Self {
            total_count: page.total_count,
            page_info: page.page_info,
            items: page.items.into_iter().map(PersistedAttachment::from).collect(),
        }
    }
}

/// A workspace document excluded from embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IgnoredDoc {
    pub doc_id: String,
    pub created_at: u64,
    pub title: Option<String>,
    pub created_by: Option<String>,
    pub doc_updated_at: Option<u64>,
}

impl IgnoredDoc {
    pub fn new(doc_id: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            created_at: 0,
            title: None,
            created_by: None,
            doc_updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoredDocsUpdate {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl IgnoredDocsUpdate {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingProgress {
    pub embedded: u64,
    pub total: u64,
}

impl EmbeddingProgress {
    pub fn is_complete(&self) -> bool {
        self.embedded >= self.total
    }
}

/// Keep the first occurrence of each `doc_id`.
pub(crate) fn dedup_ignored(docs: Vec<IgnoredDoc>) -> Vec<IgnoredDoc> {
    let mut seen = std::collections::HashSet::new();
    docs.into_iter()
        .filter(|doc| seen.insert(doc.doc_id.clone()))
        .collect()
}

/// Placeholders first, then server records, capped at `limit`.
pub(crate) fn merge_attachments(
    uploading: &[LocalAttachment],
    page: &AttachmentPage,
    limit: usize,
) -> Vec<Attachment> {
    uploading
        .iter()
        .cloned()
        .map(Attachment::Local)
        .chain(page.items.iter().cloned().map(Attachment::Persisted))
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persisted(id: &str) -> PersistedAttachment {
        PersistedAttachment {
            id: id.into(),
            file_name: format!("{id}.pdf"),
            mime_type: "application/pdf".into(),
            size: 1,
            created_at: 0,
        }
    }

    #[test]
    fn test_placeholder_ids_are_unique() {
        let file = UploadFile::new("a.txt", "text/plain", vec![1, 2, 3]);
        let a = LocalAttachment::placeholder(&file);
        let b = LocalAttachment::placeholder(&file);
        assert_ne!(a.local_id, b.local_id);
        assert_eq!(a.size, 3);
        assert_eq!(a.status, UploadStatus::Uploading);
    }

    #[test]
    fn test_attachment_status() {
        let file = UploadFile::new("a.txt", "text/plain", vec![]);
        let local = LocalAttachment::placeholder(&file);
        assert_eq!(Attachment::Local(local.clone()).status(), AttachmentStatus::Uploading);

        let failed = Attachment::Local(local.failed("boom"));
        assert_eq!(failed.status(), AttachmentStatus::Error);
        assert_eq!(Attachment::Persisted(persisted("p")).status(), AttachmentStatus::Uploaded);
    }

    #[test]
    fn test_merge_orders_local_first_and_caps() {
        let file = UploadFile::new("a.txt", "text/plain", vec![]);
        let uploading: Vec<_> = (0..3).map(|_| LocalAttachment::placeholder(&file)).collect();
        let page = AttachmentPage {
            total_count: 12,
            items: (0..12).map(|i| persisted(&format!("p{i}"))).collect(),
            ..Default::default()
        };

        let merged = merge_attachments(&uploading, &page, 10);
        assert_eq!(merged.len(), 10);
        assert!(merged[..3].iter().all(Attachment::is_local));
        assert!(merged[3..].iter().all(|a| !a.is_local()));
        assert_eq!(merged[3].id(), "p0");
    }

    #[test]
    fn test_dedup_ignored_keeps_first() {
        let mut first = IgnoredDoc::new("d1");
        first.title = Some("first".into());
        let mut dup = IgnoredDoc::new("d1");
        dup.title = Some("dup".into());

        let docs = dedup_ignored(vec![first, IgnoredDoc::new("d2"), dup]);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].title.as_deref(), Some("first"));
    }

    #[test]
    fn test_server_page_normalized() {
        let page = EmbeddingFilePage {
            total_count: 1,
            page_info: PageInfo {
                end_cursor: Some("c1".into()),
                has_next_page: true,
            },
            items: vec![EmbeddingFile {
                file_id: "f1".into(),
                file_name: "doc.md".into(),
                mime_type: "text/markdown".into(),
                size: 10,
                created_at: 5,
            }],
        };
        let page = AttachmentPage::from(page);
        assert_eq!(page.items[0].id, "f1");
        assert!(page.page_info.has_next_page);
    }
}
