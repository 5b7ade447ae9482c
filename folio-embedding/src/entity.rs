//! The workspace embedding entity.
//!
//! ```text
//!  get_enabled ──┐                         ┌── enabled, is_enabled_loading
//!  set_enabled ──┼─► Effect pipelines ──► ─┼── attachments, uploading_attachments
//!  add / remove ─┤   (Exhaust / Merge)     ├── ignored_docs, embedding_progress
//!  polling ──────┘         │               └── error
//!                          ▼
//!                 resync pipelines (Concat)
//! ```
//!
//! Every write is followed by a fresh read on a Concat pipeline, so the
//! containers always reflect what the store reports after the write.

use folio_reactive::{
    Attempt, Computed, Concurrency, Dispatch, Effect, EffectContext, LiveData, RetryPolicy, Scope,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::{EmbeddingConfig, MAX_PAGE_SIZE};
use crate::confirm::{ConfirmRequest, Confirmation};
use crate::store::{EmbeddingError, EmbeddingStore};
use crate::types::{
    dedup_ignored, merge_attachments, Attachment, AttachmentPage, EmbeddingProgress, IgnoredDoc,
    IgnoredDocsUpdate, LocalAttachment, Pagination, UploadFile,
};

#[derive(Clone)]
struct State {
    enabled: LiveData<bool>,
    error: LiveData<Option<EmbeddingError>>,
    attachments: LiveData<AttachmentPage>,
    ignored_docs: LiveData<Vec<IgnoredDoc>>,
    is_enabled_loading: LiveData<bool>,
    is_attachments_loading: LiveData<bool>,
    is_ignored_docs_loading: LiveData<bool>,
    embedding_progress: LiveData<Option<EmbeddingProgress>>,
    is_embedding_progress_loading: LiveData<bool>,
    uploading_attachments: LiveData<Vec<LocalAttachment>>,
}

impl State {
    fn new() -> Self {
        Self {
            enabled: LiveData::new(false),
            error: LiveData::new(None),
            attachments: LiveData::new(AttachmentPage::default()),
            ignored_docs: LiveData::new(Vec::new()),
            is_enabled_loading: LiveData::new(false),
            is_attachments_loading: LiveData::new(false),
            is_ignored_docs_loading: LiveData::new(false),
            embedding_progress: LiveData::new(None),
            is_embedding_progress_loading: LiveData::new(false),
            uploading_attachments: LiveData::new(Vec::new()),
        }
    }
}

/// What every handler needs.
#[derive(Clone)]
struct Shared {
    workspace_id: Arc<str>,
    store: Arc<dyn EmbeddingStore>,
    state: State,
    page_size: u32,
}

/// Files of one upload and the ids of their published placeholders, in the
/// same order.
struct UploadBatch {
    files: Vec<UploadFile>,
    local_ids: Vec<String>,
}

struct Effects {
    get_enabled: Effect<()>,
    set_enabled: Effect<bool>,
    get_ignored_docs: Effect<()>,
    update_ignored_docs: Effect<IgnoredDocsUpdate>,
    get_attachments: Effect<Pagination>,
    add_attachments: Effect<UploadBatch>,
    remove_attachment: Effect<String>,
    progress: Effect<()>,
    resync_enabled: Effect<()>,
    resync_ignored_docs: Effect<()>,
    resync_attachments: Effect<Pagination>,
}

/// Embedding settings and attachments of one workspace.
///
/// Operations never fail at the call site: outcomes land in the state
/// containers, failures in [`error`](Self::error).
pub struct Embedding {
    workspace_id: Arc<str>,
    config: EmbeddingConfig,
    scope: Scope,
    state: State,
    merged: Computed<Vec<Attachment>>,
    effects: Effects,
}

impl Embedding {
    pub fn new(
        workspace_id: impl Into<String>,
        store: Arc<dyn EmbeddingStore>,
        config: EmbeddingConfig,
    ) -> Self {
        let workspace_id: Arc<str> = Arc::from(workspace_id.into());
        let scope = Scope::new("embedding");
        let state = State::new();
        let shared = Shared {
            workspace_id: workspace_id.clone(),
            store,
            state: state.clone(),
            page_size: config.page_size,
        };

        let limit = config.merged_limit;
        let merged = Computed::from2(
            &state.uploading_attachments,
            &state.attachments,
            move |uploading: &Vec<LocalAttachment>, page: &AttachmentPage| {
                merge_attachments(uploading, page, limit)
            },
        );

        let effects = Effects::new(&scope, &shared, &config);
        let embedding = Self {
            workspace_id,
            config,
            scope,
            state,
            merged,
            effects,
        };

        if embedding.config.load_on_open {
            embedding.get_enabled();
            embedding.get_attachments(Pagination::first_page(embedding.config.page_size));
            embedding.get_ignored_docs();
            embedding.get_embedding_progress();
        }
        embedding
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    // ─── State ───────────────────────────────────────────────────────

    pub fn enabled(&self) -> &LiveData<bool> {
        &self.state.enabled
    }

    /// Last failure of any pipeline.
    pub fn error(&self) -> &LiveData<Option<EmbeddingError>> {
        &self.state.error
    }

    /// The currently loaded page of server records.
    pub fn attachments(&self) -> &LiveData<AttachmentPage> {
        &self.state.attachments
    }

    pub fn ignored_docs(&self) -> &LiveData<Vec<IgnoredDoc>> {
        &self.state.ignored_docs
    }

    pub fn is_enabled_loading(&self) -> &LiveData<bool> {
        &self.state.is_enabled_loading
    }

    pub fn is_attachments_loading(&self) -> &LiveData<bool> {
        &self.state.is_attachments_loading
    }

    pub fn is_ignored_docs_loading(&self) -> &LiveData<bool> {
        &self.state.is_ignored_docs_loading
    }

    pub fn embedding_progress(&self) -> &LiveData<Option<EmbeddingProgress>> {
        &self.state.embedding_progress
    }

    pub fn is_embedding_progress_loading(&self) -> &LiveData<bool> {
        &self.state.is_embedding_progress_loading
    }

    /// Placeholders for uploads in flight or failed, newest first.
    pub fn uploading_attachments(&self) -> &LiveData<Vec<LocalAttachment>> {
        &self.state.uploading_attachments
    }

    /// Placeholders followed by server records, capped at
    /// [`EmbeddingConfig::merged_limit`].
    pub fn merged_attachments(&self) -> &LiveData<Vec<Attachment>> {
        self.merged.data()
    }

    // ─── Operations ──────────────────────────────────────────────────

    pub fn get_enabled(&self) -> Dispatch {
        self.effects.get_enabled.invoke(())
    }

    /// Write the flag, then read it back.
    pub fn set_enabled(&self, enabled: bool) -> Dispatch {
        self.effects.set_enabled.invoke(enabled)
    }

    pub fn get_ignored_docs(&self) -> Dispatch {
        self.effects.get_ignored_docs.invoke(())
    }

    /// Write the change, then read the list back.
    pub fn update_ignored_docs(&self, update: IgnoredDocsUpdate) -> Dispatch {
        self.effects.update_ignored_docs.invoke(update)
    }

    /// Replace the loaded page. `first` must be in `1..=100`.
    pub fn get_attachments(&self, pagination: Pagination) -> Dispatch {
        self.effects.get_attachments.invoke(pagination)
    }

    /// Upload a batch.
    ///
    /// Placeholders are published before this returns, newest batch first.
    /// Returns their ids in file order, or nothing when the batch is empty
    /// or the entity is disposed.
    pub fn add_attachments(&self, files: Vec<UploadFile>) -> Vec<String> {
        if files.is_empty() {
            return Vec::new();
        }
        let placeholders: Vec<LocalAttachment> =
            files.iter().map(LocalAttachment::placeholder).collect();
        let local_ids: Vec<String> = placeholders.iter().map(|a| a.local_id.clone()).collect();

        let uploading = &self.state.uploading_attachments;
        let published = self.scope.commit(|| {
            uploading.update(|current| placeholders.iter().chain(current.iter()).cloned().collect())
        });
        if published.is_none() {
            return Vec::new();
        }

        let batch = UploadBatch {
            files,
            local_ids: local_ids.clone(),
        };
        if self.effects.add_attachments.invoke(batch) == Dispatch::Closed {
            self.scope.commit(|| {
                uploading.update(|current| {
                    current.iter().filter(|a| !local_ids.contains(&a.local_id)).cloned().collect()
                })
            });
            return Vec::new();
        }
        local_ids
    }

    /// Remove by id.
    ///
    /// A placeholder id is dropped locally with no request. Any other id is
    /// deleted on the server and the listing refreshed.
    pub fn remove_attachment(&self, id: &str) -> Dispatch {
        let uploading = &self.state.uploading_attachments;
        if uploading.with(|list| list.iter().any(|a| a.local_id == id)) {
            let removed = self.scope.commit(|| {
                uploading.update(|list| list.iter().filter(|a| a.local_id != id).cloned().collect())
            });
            return match removed {
                Some(_) => Dispatch::Started,
                None => Dispatch::Closed,
            };
        }
        self.effects.remove_attachment.invoke(id.to_string())
    }

    /// Ask `confirm` first; declining is a no-op. Returns whether removal
    /// was requested.
    pub async fn remove_attachment_confirmed(&self, id: &str, confirm: &dyn Confirmation) -> bool {
        let file_name = self
            .merged
            .data()
            .with(|list| list.iter().find(|a| a.id() == id).map(|a| a.file_name().to_string()))
            .unwrap_or_else(|| id.to_string());

        if !confirm.confirm(&ConfirmRequest::remove_attachment(&file_name)).await {
            log::debug!("removal of attachment {id} declined");
            return false;
        }
        self.remove_attachment(id);
        true
    }

    /// Poll progress until every document is embedded. No-op while a poll
    /// is already running.
    pub fn get_embedding_progress(&self) -> Dispatch {
        self.effects.progress.invoke(())
    }

    /// Cancel any running poll and start a new one.
    pub fn start_embedding_progress_polling(&self) -> Dispatch {
        self.effects.progress.cancel();
        self.effects.progress.invoke(())
    }

    pub fn stop_embedding_progress_polling(&self) {
        self.effects.progress.cancel();
        let loading = &self.state.is_embedding_progress_loading;
        self.scope.commit(|| loading.set(false));
    }

    pub fn is_polling(&self) -> bool {
        self.effects.progress.is_running()
    }

    /// Wait until every pipeline except progress polling is idle,
    /// including the refreshes that writes trigger.
    pub async fn settled(&self) {
        let e = &self.effects;
        loop {
            e.set_enabled.settled().await;
            e.update_ignored_docs.settled().await;
            e.add_attachments.settled().await;
            e.remove_attachment.settled().await;
            e.get_enabled.settled().await;
            e.get_ignored_docs.settled().await;
            e.get_attachments.settled().await;
            e.resync_enabled.settled().await;
            e.resync_ignored_docs.settled().await;
            e.resync_attachments.settled().await;
            if !e.busy() {
                return;
            }
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.scope.is_disposed()
    }

    /// Cancel every pipeline and the poll. Once this returns no container
    /// is written again.
    pub fn dispose(&self) {
        if self.scope.is_disposed() {
            return;
        }
        log::debug!("disposing embedding for workspace {}", self.workspace_id);
        self.scope.dispose();
        self.merged.detach();
    }
}

impl Drop for Embedding {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Embedding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedding")
            .field("workspace_id", &self.workspace_id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Effects {
    fn new(scope: &Scope, shared: &Shared, config: &EmbeddingConfig) -> Self {
        let retry = config.retry.clone();
        let poll_interval = config.poll_interval;

        let resync_enabled = {
            let shared = shared.clone();
            Effect::new("resync_enabled", Concurrency::Concat, scope, retry.clone(), move |(), ctx| {
                fetch_enabled(shared.clone(), ctx)
            })
        };
        let resync_ignored_docs = {
            let shared = shared.clone();
            Effect::new("resync_ignored_docs", Concurrency::Concat, scope, retry.clone(), move |(), ctx| {
                fetch_ignored_docs(shared.clone(), ctx)
            })
        };
        let resync_attachments = {
            let shared = shared.clone();
            Effect::new(
                "resync_attachments",
                Concurrency::Concat,
                scope,
                retry.clone(),
                move |pagination, ctx| fetch_attachments(shared.clone(), pagination, ctx),
            )
        };

        let get_enabled = {
            let shared = shared.clone();
            Effect::new("get_enabled", Concurrency::Exhaust, scope, retry.clone(), move |(), ctx| {
                fetch_enabled(shared.clone(), ctx)
            })
        };
        let set_enabled = {
            let (shared, resync) = (shared.clone(), resync_enabled.clone());
            Effect::new("set_enabled", Concurrency::Exhaust, scope, retry.clone(), move |enabled, ctx| {
                write_enabled(shared.clone(), enabled, resync.clone(), ctx)
            })
        };
        let get_ignored_docs = {
            let shared = shared.clone();
            Effect::new("get_ignored_docs", Concurrency::Exhaust, scope, retry.clone(), move |(), ctx| {
                fetch_ignored_docs(shared.clone(), ctx)
            })
        };
        let update_ignored_docs = {
            let (shared, resync) = (shared.clone(), resync_ignored_docs.clone());
            Effect::new(
                "update_ignored_docs",
                Concurrency::Exhaust,
                scope,
                retry.clone(),
                move |update, ctx| write_ignored_docs(shared.clone(), update, resync.clone(), ctx),
            )
        };
        let get_attachments = {
            let shared = shared.clone();
            Effect::new(
                "get_attachments",
                Concurrency::Exhaust,
                scope,
                retry.clone(),
                move |pagination, ctx| fetch_attachments(shared.clone(), pagination, ctx),
            )
        };
        let add_attachments = {
            let (shared, resync) = (shared.clone(), resync_attachments.clone());
            Effect::new(
                "add_attachments",
                Concurrency::Merge,
                scope,
                RetryPolicy::none(),
                move |batch, ctx| upload(shared.clone(), batch, resync.clone(), ctx),
            )
        };
        let remove_attachment = {
            let (shared, resync) = (shared.clone(), resync_attachments.clone());
            Effect::new(
                "remove_attachment",
                Concurrency::Exhaust,
                scope,
                RetryPolicy::none(),
                move |id, ctx| remove_persisted(shared.clone(), id, resync.clone(), ctx),
            )
        };
        let progress = {
            let shared = shared.clone();
            Effect::new("embedding_progress", Concurrency::Exhaust, scope, retry, move |(), ctx| {
                poll_progress(shared.clone(), poll_interval, ctx)
            })
        };

        Self {
            get_enabled,
            set_enabled,
            get_ignored_docs,
            update_ignored_docs,
            get_attachments,
            add_attachments,
            remove_attachment,
            progress,
            resync_enabled,
            resync_ignored_docs,
            resync_attachments,
        }
    }

    fn busy(&self) -> bool {
        self.set_enabled.is_running()
            || self.update_ignored_docs.is_running()
            || self.add_attachments.is_running()
            || self.remove_attachment.is_running()
            || self.get_enabled.is_running()
            || self.get_ignored_docs.is_running()
            || self.get_attachments.is_running()
            || self.resync_enabled.is_running()
            || self.resync_ignored_docs.is_running()
            || self.resync_attachments.is_running()
    }
}

// ─── Handlers ────────────────────────────────────────────────────

async fn fetch_enabled(shared: Shared, ctx: EffectContext) {
    let state = &shared.state;
    let _loading = ctx.loading(&state.is_enabled_loading);
    let (store, ws) = (&*shared.store, &*shared.workspace_id);

    match ctx.attempt(move |signal| store.get_enabled(ws, signal)).await {
        Attempt::Done(enabled) => {
            ctx.commit(|| state.enabled.set(enabled));
        }
        Attempt::Failed(err) => {
            ctx.fail(&state.error, err, "Failed to fetch workspace doc embedding enabled")
        }
        Attempt::Cancelled => {}
    }
}

async fn write_enabled(shared: Shared, enabled: bool, resync: Effect<()>, ctx: EffectContext) {
    let state = &shared.state;
    let _loading = ctx.loading(&state.is_enabled_loading);
    let (store, ws) = (&*shared.store, &*shared.workspace_id);

    match ctx.attempt(move |signal| store.update_enabled(ws, enabled, signal)).await {
        Attempt::Done(()) => {
            ctx.commit(|| resync.invoke(()));
        }
        Attempt::Failed(err) => {
            ctx.fail(&state.error, err, "Failed to update workspace doc embedding enabled")
        }
        Attempt::Cancelled => {}
    }
}

async fn fetch_ignored_docs(shared: Shared, ctx: EffectContext) {
    let state = &shared.state;
    let _loading = ctx.loading(&state.is_ignored_docs_loading);
    let (store, ws) = (&*shared.store, &*shared.workspace_id);

    match ctx.attempt(move |signal| store.get_ignored_docs(ws, signal)).await {
        Attempt::Done(docs) => {
            ctx.commit(|| state.ignored_docs.set(dedup_ignored(docs)));
        }
        Attempt::Failed(err) => {
            ctx.fail(&state.error, err, "Failed to fetch workspace doc embedding ignored docs")
        }
        Attempt::Cancelled => {}
    }
}

async fn write_ignored_docs(
    shared: Shared,
    update: IgnoredDocsUpdate,
    resync: Effect<()>,
    ctx: EffectContext,
) {
    let (store, ws) = (&*shared.store, &*shared.workspace_id);
    let (add, remove) = (&update.add[..], &update.remove[..]);

    match ctx
        .attempt(move |signal| store.update_ignored_docs(ws, add, remove, signal))
        .await
    {
        Attempt::Done(()) => {
            ctx.commit(|| resync.invoke(()));
        }
        Attempt::Failed(err) => ctx.fail(
            &shared.state.error,
            err,
            "Failed to update workspace doc embedding ignored docs",
        ),
        Attempt::Cancelled => {}
    }
}

async fn fetch_attachments(shared: Shared, pagination: Pagination, ctx: EffectContext) {
    let state = &shared.state;
    if pagination.first == 0 || pagination.first > MAX_PAGE_SIZE {
        let err = EmbeddingError::Validation(format!(
            "page size must be between 1 and {MAX_PAGE_SIZE}, got {}",
            pagination.first
        ));
        ctx.fail(&state.error, err, "Failed to fetch workspace doc embedding attachments");
        return;
    }

    let _loading = ctx.loading(&state.is_attachments_loading);
    let (store, ws) = (&*shared.store, &*shared.workspace_id);
    let pagination = &pagination;

    match ctx
        .attempt(move |signal| store.get_embedding_files(ws, pagination, signal))
        .await
    {
        Attempt::Done(page) => {
            ctx.commit(|| state.attachments.set(AttachmentPage::from(page)));
        }
        Attempt::Failed(err) => {
            ctx.fail(&state.error, err, "Failed to fetch workspace doc embedding attachments")
        }
        Attempt::Cancelled => {}
    }
}

/// Send a batch whose placeholders are already published, then reconcile
/// them with the outcome.
async fn upload(shared: Shared, upload: UploadBatch, resync: Effect<Pagination>, ctx: EffectContext) {
    let state = &shared.state;
    let UploadBatch { files, local_ids: batch } = upload;

    let (store, ws) = (&*shared.store, &*shared.workspace_id);
    let files = &files[..];
    let first_page = Pagination::first_page(shared.page_size);

    match ctx
        .attempt(move |signal| store.add_embedding_files(ws, files, signal))
        .await
    {
        Attempt::Done(records) => {
            log::info!("Uploaded {} embedding attachment(s)", records.len());
            ctx.commit(|| {
                state.uploading_attachments.update(|current| {
                    current.iter().filter(|a| !batch.contains(&a.local_id)).cloned().collect()
                });
                resync.invoke(first_page);
            });
        }
        Attempt::Failed(err) => {
            let failed: HashSet<&str> = match &err {
                EmbeddingError::PartialBatch { failed, .. } => failed
                    .iter()
                    .filter_map(|&i| batch.get(i))
                    .map(String::as_str)
                    .collect(),
                _ => batch.iter().map(String::as_str).collect(),
            };
            let message = err.to_string();
            let partial = failed.len() < batch.len();

            ctx.commit(|| {
                state.uploading_attachments.update(|current| {
                    current
                        .iter()
                        .filter_map(|a| {
                            if failed.contains(a.local_id.as_str()) {
                                Some(a.clone().failed(&message))
                            } else if batch.contains(&a.local_id) {
                                None
                            } else {
                                Some(a.clone())
                            }
                        })
                        .collect()
                });
                if partial {
                    resync.invoke(first_page);
                }
            });
            ctx.fail(&state.error, err, "Failed to add workspace doc embedding attachments");
        }
        Attempt::Cancelled => {}
    }
}

async fn remove_persisted(
    shared: Shared,
    id: String,
    resync: Effect<Pagination>,
    ctx: EffectContext,
) {
    let (store, ws) = (&*shared.store, &*shared.workspace_id);
    let file_id = id.as_str();

    match ctx
        .attempt(move |signal| store.remove_embedding_file(ws, file_id, signal))
        .await
    {
        Attempt::Done(()) => {
            ctx.commit(|| resync.invoke(Pagination::first_page(shared.page_size)));
        }
        Attempt::Failed(err) => ctx.fail(
            &shared.state.error,
            err,
            "Failed to remove workspace doc embedding attachment",
        ),
        Attempt::Cancelled => {}
    }
}

/// Fetch progress every `period`, first after one period, until complete.
///
/// Ticks are sequential, so a tick that comes due while a fetch is
/// outstanding is skipped.
async fn poll_progress(shared: Shared, period: std::time::Duration, ctx: EffectContext) {
    let state = &shared.state;
    let (store, ws) = (&*shared.store, &*shared.workspace_id);
    let mut ticks = time::interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticks.tick().await;
        let fetched = {
            let _loading = ctx.loading(&state.is_embedding_progress_loading);
            ctx.attempt(move |signal| store.get_embedding_progress(ws, signal)).await
        };

        match fetched {
            Attempt::Done(progress) => {
                ctx.commit(|| state.embedding_progress.set(Some(progress)));
                if progress.is_complete() {
                    log::info!(
                        "Embedding complete for workspace {ws} ({}/{}), polling stopped",
                        progress.embedded,
                        progress.total
                    );
                    return;
                }
            }
            Attempt::Failed(err) => {
                ctx.fail(&state.error, err, "Failed to fetch workspace doc embedding progress")
            }
            Attempt::Cancelled => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EmbeddingFile, EmbeddingFilePage};
    use async_trait::async_trait;
    use folio_reactive::CancellationToken;
    use std::sync::Mutex;

    /// Store that answers everything immediately.
    #[derive(Default)]
    struct Echo {
        enabled: Mutex<bool>,
        removed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EmbeddingStore for Echo {
        async fn get_enabled(&self, _: &str, _: CancellationToken) -> Result<bool, EmbeddingError> {
            Ok(*self.enabled.lock().unwrap())
        }

        async fn update_enabled(
            &self,
            _: &str,
            enabled: bool,
            _: CancellationToken,
        ) -> Result<(), EmbeddingError> {
            *self.enabled.lock().unwrap() = enabled;
            Ok(())
        }

        async fn get_ignored_docs(
            &self,
            _: &str,
            _: CancellationToken,
        ) -> Result<Vec<IgnoredDoc>, EmbeddingError> {
            Ok(vec![IgnoredDoc::new("a"), IgnoredDoc::new("a"), IgnoredDoc::new("b")])
        }

        async fn update_ignored_docs(
            &self,
            _: &str,
            _: &[String],
            _: &[String],
            _: CancellationToken,
        ) -> Result<(), EmbeddingError> {
            Ok(())
        }

        async fn get_embedding_files(
            &self,
            _: &str,
            _: &Pagination,
            _: CancellationToken,
        ) -> Result<EmbeddingFilePage, EmbeddingError> {
            Ok(EmbeddingFilePage::default())
        }

        async fn add_embedding_files(
            &self,
            _: &str,
            files: &[UploadFile],
            _: CancellationToken,
        ) -> Result<Vec<EmbeddingFile>, EmbeddingError> {
            Err(EmbeddingError::PartialBatch {
                failed: vec![1],
                message: format!("{} rejected", files[1].file_name),
            })
        }

        async fn remove_embedding_file(
            &self,
            _: &str,
            id: &str,
            _: CancellationToken,
        ) -> Result<(), EmbeddingError> {
            self.removed.lock().unwrap().push(id.to_string());
            Ok(())
        }

        async fn get_embedding_progress(
            &self,
            _: &str,
            _: CancellationToken,
        ) -> Result<EmbeddingProgress, EmbeddingError> {
            Ok(EmbeddingProgress { embedded: 1, total: 1 })
        }
    }

    fn entity(store: Arc<Echo>) -> Embedding {
        Embedding::new("ws-1", store, EmbeddingConfig::for_testing())
    }

    #[tokio::test]
    async fn test_set_enabled_reads_back() {
        let store = Arc::new(Echo::default());
        let embedding = entity(store);

        assert_eq!(embedding.set_enabled(true), Dispatch::Started);
        embedding.settled().await;
        assert!(embedding.enabled().get());
        assert!(!embedding.is_enabled_loading().get());
    }

    #[tokio::test]
    async fn test_ignored_docs_deduplicated() {
        let embedding = entity(Arc::new(Echo::default()));
        embedding.get_ignored_docs();
        embedding.settled().await;

        let ids: Vec<_> = embedding.ignored_docs().get().into_iter().map(|d| d.doc_id).collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_page_size_is_validation_error() {
        let embedding = entity(Arc::new(Echo::default()));
        embedding.get_attachments(Pagination::first_page(0));
        embedding.settled().await;

        assert!(matches!(embedding.error().get(), Some(EmbeddingError::Validation(_))));
        assert!(!embedding.is_attachments_loading().get());
    }

    #[tokio::test]
    async fn test_partial_batch_marks_only_failed_file() {
        let embedding = entity(Arc::new(Echo::default()));
        embedding.add_attachments(vec![
            UploadFile::new("ok.md", "text/markdown", vec![1]),
            UploadFile::new("bad.exe", "application/octet-stream", vec![2]),
        ]);
        embedding.settled().await;

        let uploading = embedding.uploading_attachments().get();
        assert_eq!(uploading.len(), 1);
        assert_eq!(uploading[0].file_name, "bad.exe");
        assert_eq!(uploading[0].status, crate::types::UploadStatus::Error);
        assert!(matches!(
            embedding.error().get(),
            Some(EmbeddingError::PartialBatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_local_removal_skips_store() {
        let store = Arc::new(Echo::default());
        let embedding = entity(store.clone());
        embedding.add_attachments(vec![
            UploadFile::new("a.md", "text/markdown", vec![]),
            UploadFile::new("b.md", "text/markdown", vec![]),
        ]);
        embedding.settled().await;

        let failed = embedding.uploading_attachments().get()[0].local_id.clone();
        assert_eq!(embedding.remove_attachment(&failed), Dispatch::Started);
        assert!(embedding.uploading_attachments().get().is_empty());
        assert!(store.removed.lock().unwrap().is_empty());

        embedding.remove_attachment("server-id");
        embedding.settled().await;
        assert_eq!(*store.removed.lock().unwrap(), vec!["server-id".to_string()]);
    }

    #[tokio::test]
    async fn test_dispose_closes_operations() {
        let embedding = entity(Arc::new(Echo::default()));
        embedding.dispose();
        embedding.dispose();

        assert!(embedding.is_disposed());
        assert_eq!(embedding.get_enabled(), Dispatch::Closed);
        assert_eq!(embedding.start_embedding_progress_polling(), Dispatch::Closed);
        embedding.stop_embedding_progress_polling();
    }
}
