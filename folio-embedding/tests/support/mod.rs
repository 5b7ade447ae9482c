//! In-memory `EmbeddingStore` with scripted failures and latency.

use async_trait::async_trait;
use folio_embedding::{
    EmbeddingError, EmbeddingFile, EmbeddingFilePage, EmbeddingProgress, EmbeddingStore,
    IgnoredDoc, PageInfo, Pagination, UploadFile,
};
use folio_reactive::CancellationToken;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::time::Duration;

#[derive(Default)]
pub struct FakeStore {
    enabled: Mutex<bool>,
    ignored: Mutex<Vec<IgnoredDoc>>,
    files: Mutex<Vec<EmbeddingFile>>,
    progress: Mutex<VecDeque<EmbeddingProgress>>,
    failures: Mutex<HashMap<&'static str, VecDeque<EmbeddingError>>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    latency: Mutex<Duration>,
    next_id: Mutex<u64>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call waits this long before answering.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn set_enabled(&self, enabled: bool) {
        *self.enabled.lock().unwrap() = enabled;
    }

    pub fn set_ignored(&self, docs: Vec<IgnoredDoc>) {
        *self.ignored.lock().unwrap() = docs;
    }

    pub fn add_file(&self, name: &str) -> String {
        let id = self.fresh_id();
        self.files.lock().unwrap().push(EmbeddingFile {
            file_id: id.clone(),
            file_name: name.to_string(),
            mime_type: "text/plain".into(),
            size: 1,
            created_at: 0,
        });
        id
    }

    pub fn file_ids(&self) -> Vec<String> {
        self.files.lock().unwrap().iter().map(|f| f.file_id.clone()).collect()
    }

    /// Progress answers, in order. The last one repeats.
    pub fn script_progress(&self, steps: &[(u64, u64)]) {
        *self.progress.lock().unwrap() = steps
            .iter()
            .map(|&(embedded, total)| EmbeddingProgress { embedded, total })
            .collect();
    }

    /// Make the next call to `op` fail with `err`.
    pub fn fail_next(&self, op: &'static str, err: EmbeddingError) {
        self.failures.lock().unwrap().entry(op).or_default().push_back(err);
    }

    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    fn fresh_id(&self) -> String {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        format!("file-{next}")
    }

    /// Count the call, wait out the latency, then apply any scripted failure.
    async fn enter(&self, op: &'static str, signal: &CancellationToken) -> Result<(), EmbeddingError> {
        *self.calls.lock().unwrap().entry(op).or_default() += 1;
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::select! {
                _ = signal.cancelled() => return Err(EmbeddingError::Network("aborted".into())),
                _ = tokio::time::sleep(latency) => {}
            }
        }
        match self.failures.lock().unwrap().get_mut(op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl EmbeddingStore for FakeStore {
    async fn get_enabled(&self, _: &str, signal: CancellationToken) -> Result<bool, EmbeddingError> {
        self.enter("get_enabled", &signal).await?;
        Ok(*self.enabled.lock().unwrap())
    }

    async fn update_enabled(
        &self,
        _: &str,
        enabled: bool,
        signal: CancellationToken,
    ) -> Result<(), EmbeddingError> {
        self.enter("update_enabled", &signal).await?;
        self.set_enabled(enabled);
        Ok(())
    }

    async fn get_ignored_docs(
        &self,
        _: &str,
        signal: CancellationToken,
    ) -> Result<Vec<IgnoredDoc>, EmbeddingError> {
        self.enter("get_ignored_docs", &signal).await?;
        Ok(self.ignored.lock().unwrap().clone())
    }

    async fn update_ignored_docs(
        &self,
        _: &str,
        add: &[String],
        remove: &[String],
        signal: CancellationToken,
    ) -> Result<(), EmbeddingError> {
        self.enter("update_ignored_docs", &signal).await?;
        let mut ignored = self.ignored.lock().unwrap();
        ignored.retain(|doc| !remove.contains(&doc.doc_id));
        for id in add {
            if !ignored.iter().any(|doc| &doc.doc_id == id) {
                ignored.push(IgnoredDoc::new(id.clone()));
            }
        }
        Ok(())
    }

    async fn get_embedding_files(
        &self,
        _: &str,
        pagination: &Pagination,
        signal: CancellationToken,
    ) -> Result<EmbeddingFilePage, EmbeddingError> {
        self.enter("get_embedding_files", &signal).await?;
        let files = self.files.lock().unwrap();
        let start = match &pagination.after {
            Some(cursor) => files.iter().position(|f| &f.file_id == cursor).map_or(0, |i| i + 1),
            None => 0,
        };
        let items: Vec<EmbeddingFile> = files
            .iter()
            .skip(start)
            .take(pagination.first as usize)
            .cloned()
            .collect();
        Ok(EmbeddingFilePage {
            total_count: files.len() as u64,
            page_info: PageInfo {
                end_cursor: items.last().map(|f| f.file_id.clone()),
                has_next_page: start + items.len() < files.len(),
            },
            items,
        })
    }

    async fn add_embedding_files(
        &self,
        _: &str,
        files: &[UploadFile],
        signal: CancellationToken,
    ) -> Result<Vec<EmbeddingFile>, EmbeddingError> {
        let outcome = self.enter("add_embedding_files", &signal).await;
        let failed: Vec<usize> = match &outcome {
            Err(EmbeddingError::PartialBatch { failed, .. }) => failed.clone(),
            Err(_) => return outcome.map(|_| Vec::new()),
            Ok(()) => Vec::new(),
        };

        let mut stored = Vec::new();
        for (i, file) in files.iter().enumerate() {
            if failed.contains(&i) {
                continue;
            }
            let record = EmbeddingFile {
                file_id: self.fresh_id(),
                file_name: file.file_name.clone(),
                mime_type: file.mime_type.clone(),
                size: file.size(),
                created_at: file.last_modified,
            };
            self.files.lock().unwrap().push(record.clone());
            stored.push(record);
        }
        outcome.map(|_| stored)
    }

    async fn remove_embedding_file(
        &self,
        _: &str,
        file_id: &str,
        signal: CancellationToken,
    ) -> Result<(), EmbeddingError> {
        self.enter("remove_embedding_file", &signal).await?;
        self.files.lock().unwrap().retain(|f| f.file_id != file_id);
        Ok(())
    }

    async fn get_embedding_progress(
        &self,
        _: &str,
        signal: CancellationToken,
    ) -> Result<EmbeddingProgress, EmbeddingError> {
        self.enter("get_embedding_progress", &signal).await?;
        let mut progress = self.progress.lock().unwrap();
        let next = if progress.len() > 1 {
            progress.pop_front()
        } else {
            progress.front().copied()
        };
        Ok(next.unwrap_or(EmbeddingProgress { embedded: 0, total: 0 }))
    }
}
