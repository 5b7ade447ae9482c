//! Document collection: the facade editors use to reach documents and blobs.
//!
//! The root document lists every document of the workspace in its `spaces`
//! map; each listed document is a separate Yrs doc whose guid is its id.
//! Loading a document hands it to the `on_load_doc` hook, which is how it
//! gets replicated.

use folio_reactive::{CancellationToken, LiveData};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;
use yrs::{Doc, Map, MapRef, Transact};

use crate::awareness::Awareness;
use crate::blob::{BlobEngine, BlobError, BlobRecord, BlobState};
use crate::lock;
use crate::workspace::WorkspaceError;

const SPACES: &str = "spaces";

/// Blob adapter handed to the collection.
///
/// `delete` is a no-op and `list` is always empty.
#[derive(Clone)]
pub struct BlobSource {
    engine: Arc<BlobEngine>,
}

impl BlobSource {
    pub fn new(engine: Arc<BlobEngine>) -> Self {
        Self { engine }
    }

    pub fn name(&self) -> &'static str {
        "blob"
    }

    pub fn readonly(&self) -> bool {
        false
    }

    pub async fn get(
        &self,
        key: &str,
        signal: &CancellationToken,
    ) -> Result<Option<Vec<u8>>, BlobError> {
        Ok(self.engine.get(key, signal).await?.map(|record| record.data))
    }

    /// Store `data` under `key`; returns the key.
    pub async fn set(
        &self,
        key: &str,
        data: Vec<u8>,
        mime: &str,
        signal: &CancellationToken,
    ) -> Result<String, BlobError> {
        self.engine.set(BlobRecord::new(key, data, mime), signal).await
    }

    pub async fn delete(&self, _key: &str) -> Result<(), BlobError> {
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<String>, BlobError> {
        Ok(Vec::new())
    }

    pub fn blob_state(&self, key: &str) -> LiveData<BlobState> {
        self.engine.state(key)
    }
}

/// Callbacks wiring a collection into the sync engine.
pub struct CollectionHooks {
    pub on_load_doc: Box<dyn Fn(&Doc) + Send + Sync>,
    pub on_load_awareness: Box<dyn Fn(Arc<Mutex<Awareness>>) + Send + Sync>,
    pub on_unload_doc: Box<dyn Fn(&str) + Send + Sync>,
}

/// Facade over a workspace's root document.
pub struct DocCollection {
    id: String,
    root: Doc,
    spaces: MapRef,
    docs: Mutex<HashMap<String, Doc>>,
    blob_source: BlobSource,
    awareness: Arc<Mutex<Awareness>>,
    hooks: CollectionHooks,
    disposed: AtomicBool,
}

impl DocCollection {
    /// Build the facade. Calls `on_load_doc(root)` and `on_load_awareness`
    /// once each.
    pub fn new(
        id: impl Into<String>,
        root: Doc,
        blob_source: BlobSource,
        awareness: Arc<Mutex<Awareness>>,
        hooks: CollectionHooks,
    ) -> Self {
        let spaces = root.get_or_insert_map(SPACES);
        (hooks.on_load_doc)(&root);
        (hooks.on_load_awareness)(awareness.clone());
        Self {
            id: id.into(),
            root,
            spaces,
            docs: Mutex::new(HashMap::new()),
            blob_source,
            awareness,
            hooks,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root_doc(&self) -> &Doc {
        &self.root
    }

    pub fn blob_source(&self) -> &BlobSource {
        &self.blob_source
    }

    pub fn awareness(&self) -> &Arc<Mutex<Awareness>> {
        &self.awareness
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> Result<(), WorkspaceError> {
        if self.is_disposed() {
            return Err(WorkspaceError::Disposed);
        }
        Ok(())
    }

    /// Create a document (a fresh id when `id` is `None`), list it in the
    /// root and load it. Creating an existing id returns that document.
    pub fn create_doc(&self, id: Option<&str>) -> Result<Doc, WorkspaceError> {
        self.ensure_live()?;
        let id = id.map(str::to_string).unwrap_or_else(|| Uuid::new_v4().to_string());
        {
            let mut txn = self.root.transact_mut();
            if self.spaces.get(&txn, &id).is_none() {
                self.spaces.insert(&mut txn, id.as_str(), true);
            }
        }
        Ok(self.load(&id))
    }

    /// A listed document, loading it on first access.
    pub fn get_doc(&self, id: &str) -> Result<Option<Doc>, WorkspaceError> {
        self.ensure_live()?;
        let listed = self.spaces.get(&self.root.transact(), id).is_some();
        if !listed {
            return Ok(None);
        }
        Ok(Some(self.load(id)))
    }

    fn load(&self, id: &str) -> Doc {
        let mut docs = lock(&self.docs);
        if let Some(doc) = docs.get(id) {
            return doc.clone();
        }
        let doc = Doc::with_options(yrs::Options {
            guid: id.into(),
            ..Default::default()
        });
        docs.insert(id.to_string(), doc.clone());
        drop(docs);

        (self.hooks.on_load_doc)(&doc);
        doc
    }

    /// Unlist a document and stop replicating it.
    pub fn remove_doc(&self, id: &str) -> Result<bool, WorkspaceError> {
        self.ensure_live()?;
        let removed = {
            let mut txn = self.root.transact_mut();
            self.spaces.remove(&mut txn, id).is_some()
        };
        if lock(&self.docs).remove(id).is_some() {
            (self.hooks.on_unload_doc)(id);
        }
        Ok(removed)
    }

    /// Ids listed in the root, sorted.
    pub fn doc_ids(&self) -> Vec<String> {
        let txn = self.root.transact();
        let mut ids: Vec<String> = self.spaces.keys(&txn).map(str::to_string).collect();
        ids.sort();
        ids
    }

    /// Ids of documents loaded in this session.
    pub fn loaded_doc_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.docs).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Unload every document. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let docs: Vec<String> = lock(&self.docs).drain().map(|(id, _)| id).collect();
        for id in &docs {
            (self.hooks.on_unload_doc)(id);
        }
        log::debug!("Disposed doc collection {} ({} docs)", self.id, docs.len());
    }
}
