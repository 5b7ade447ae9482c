//! Workspace entity: one root document, its collection facade and metadata.
//!
//! ```text
//! Workspace ── root Doc (guid = workspace id)
//!     │             └── map "meta" { name, avatar } ──observer──► MetaProjection
//!     │                                                       │ after the txn is released
//!     │                                                       ▼
//!     │                                               name / avatar LiveData
//!     │
//!     ├── doc_collection() ── DocCollection (built once)
//!     │                          ├── BlobSource ──► BlobEngine
//!     │                          ├── on_load_doc ──► DocEngine::connect_doc
//!     │                          └── on_load_awareness ──► AwarenessEngine
//!     └── WorkspaceEngine
//! ```

use folio_reactive::LiveData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use yrs::{Any, Doc, Map, MapRef, Observable, Out, ReadTxn, Transact};

use crate::awareness::Awareness;
use crate::blob::BlobError;
use crate::collection::{BlobSource, CollectionHooks, DocCollection};
use crate::engine::WorkspaceEngine;
use crate::lock;

const META: &str = "meta";
const NAME: &str = "name";
const AVATAR: &str = "avatar";

/// Transaction origin of metadata edits made through the entity.
pub const LOCAL_ORIGIN: &str = "folio-local";

/// Where a workspace lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flavour {
    #[default]
    Local,
    Cloud,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceMetadata {
    pub id: String,
    pub flavour: Flavour,
}

impl WorkspaceMetadata {
    pub fn new(id: impl Into<String>, flavour: Flavour) -> Self {
        Self {
            id: id.into(),
            flavour,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkspaceError {
    #[error("Workspace is disposed")]
    Disposed,
    #[error("CRDT error: {0}")]
    Crdt(String),
    #[error("Unknown document: {0}")]
    UnknownDoc(String),
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error("Sync error: {0}")]
    Sync(String),
}

/// `meta` values staged by the observer and published once the transaction
/// that produced them has released the document.
///
/// Subscribers may read or write the root doc. A publish started from inside
/// a subscriber only stages; the outer publish drains it.
struct MetaProjection {
    pending: Mutex<Option<(Option<String>, Option<String>)>>,
    draining: AtomicBool,
    name: LiveData<Option<String>>,
    avatar: LiveData<Option<String>>,
}

impl MetaProjection {
    fn stage(&self, name: Option<String>, avatar: Option<String>) {
        *lock(&self.pending) = Some((name, avatar));
    }

    fn publish(&self) {
        loop {
            if self.draining.swap(true, Ordering::SeqCst) {
                return;
            }
            loop {
                let next = lock(&self.pending).take();
                let Some((name, avatar)) = next else { break };
                self.name.set(name);
                self.avatar.set(avatar);
            }
            self.draining.store(false, Ordering::SeqCst);
            if lock(&self.pending).is_none() {
                return;
            }
        }
    }
}

/// A workspace session.
///
/// After [`dispose`](Self::dispose), writes and facade access fail with
/// [`WorkspaceError::Disposed`].
pub struct Workspace {
    metadata: WorkspaceMetadata,
    root: Doc,
    meta: MapRef,
    engine: Arc<WorkspaceEngine>,
    collection: Mutex<Option<Arc<DocCollection>>>,
    projection: Arc<MetaProjection>,
    meta_observer: Mutex<Option<yrs::Subscription>>,
    disposed: AtomicBool,
}

fn read_string<T: ReadTxn>(map: &MapRef, txn: &T, key: &str) -> Option<String> {
    match map.get(txn, key) {
        Some(Out::Any(Any::String(s))) => Some(s.to_string()),
        _ => None,
    }
}

impl Workspace {
    pub fn new(metadata: WorkspaceMetadata, engine: Arc<WorkspaceEngine>) -> Self {
        let root = Doc::with_options(yrs::Options {
            guid: metadata.id.as_str().into(),
            ..Default::default()
        });
        let meta = root.get_or_insert_map(META);

        let projection = {
            let txn = root.transact();
            Arc::new(MetaProjection {
                pending: Mutex::new(None),
                draining: AtomicBool::new(false),
                name: LiveData::new(read_string(&meta, &txn, NAME)),
                avatar: LiveData::new(read_string(&meta, &txn, AVATAR)),
            })
        };

        // Runs with the store locked: stage only.
        let observer = {
            let (projection, map) = (projection.clone(), meta.clone());
            meta.observe(move |txn, _event| {
                projection.stage(read_string(&map, txn, NAME), read_string(&map, txn, AVATAR));
            })
        };
        let hook = projection.clone();
        engine.doc().on_remote_applied(&metadata.id, move || hook.publish());

        Self {
            metadata,
            root,
            meta,
            engine,
            collection: Mutex::new(None),
            projection,
            meta_observer: Mutex::new(Some(observer)),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn flavour(&self) -> Flavour {
        self.metadata.flavour
    }

    pub fn metadata(&self) -> &WorkspaceMetadata {
        &self.metadata
    }

    /// The root document. Exactly one per workspace.
    pub fn root_doc(&self) -> &Doc {
        &self.root
    }

    pub fn engine(&self) -> &Arc<WorkspaceEngine> {
        &self.engine
    }

    /// `meta.name`, kept current by a CRDT observer.
    ///
    /// Writes through the entity and remote updates are published as soon as
    /// their transaction commits. Edits made directly on [`root_doc`](Self::root_doc)
    /// are published on the next call here or to [`avatar`](Self::avatar).
    pub fn name(&self) -> &LiveData<Option<String>> {
        self.projection.publish();
        &self.projection.name
    }

    /// `meta.avatar`, kept current by a CRDT observer.
    pub fn avatar(&self) -> &LiveData<Option<String>> {
        self.projection.publish();
        &self.projection.avatar
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

    /// The collection facade, built on first access.
    pub fn doc_collection(&self) -> Result<Arc<DocCollection>, WorkspaceError> {
        self.ensure_live()?;
        let mut slot = lock(&self.collection);
        if let Some(collection) = slot.as_ref() {
            return Ok(collection.clone());
        }

        let peer = self.engine.peer();
        let awareness = Arc::new(Mutex::new(Awareness::new(peer.client_id, peer.user_name.clone())));
        let (load_engine, unload_engine) = (self.engine.doc().clone(), self.engine.doc().clone());
        let awareness_engine = self.engine.awareness().clone();
        let hooks = CollectionHooks {
            on_load_doc: Box::new(move |doc: &Doc| {
                if let Err(e) = load_engine.connect_doc(doc) {
                    log::error!("Failed to connect doc {}: {e}", doc.guid());
                }
            }),
            on_load_awareness: Box::new(move |awareness: Arc<Mutex<Awareness>>| {
                awareness_engine.connect_awareness(awareness)
            }),
            on_unload_doc: Box::new(move |id: &str| {
                unload_engine.disconnect_doc(id);
            }),
        };

        let collection = Arc::new(DocCollection::new(
            self.metadata.id.clone(),
            self.root.clone(),
            BlobSource::new(self.engine.blob().clone()),
            awareness,
            hooks,
        ));
        log::debug!("Created doc collection for workspace {}", self.metadata.id);
        *slot = Some(collection.clone());
        Ok(collection)
    }

    pub fn set_name(&self, name: &str) -> Result<(), WorkspaceError> {
        self.write_meta(NAME, name)
    }

    pub fn set_avatar(&self, avatar: &str) -> Result<(), WorkspaceError> {
        self.write_meta(AVATAR, avatar)
    }

    /// One transaction. Projections are published after it commits.
    fn write_meta(&self, key: &'static str, value: &str) -> Result<(), WorkspaceError> {
        self.ensure_live()?;
        {
            let mut txn = self.root.transact_mut_with(LOCAL_ORIGIN);
            self.meta.insert(&mut txn, key, value.to_string());
        }
        self.projection.publish();
        Ok(())
    }

    /// Release the facade, observers and engine. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(collection) = lock(&self.collection).take() {
            collection.dispose();
        }
        self.engine.doc().disconnect_doc(&self.metadata.id);
        lock(&self.meta_observer).take();
        lock(&self.projection.pending).take();
        self.engine.doc().clear_remote_applied(&self.metadata.id);
        self.engine.dispose();
        log::debug!("Disposed workspace {}", self.metadata.id);
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("id", &self.metadata.id)
            .field("flavour", &self.metadata.flavour)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
