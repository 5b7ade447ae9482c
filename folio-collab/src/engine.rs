//! Sync engine: replicates documents and awareness for one workspace.
//!
//! ```text
//!  local edit ──► Yrs observer ──► DocEngine ──► DocTransport::push_update
//!                                                       │
//!                                                       ▼
//!                                                  SyncClient ◄──► server
//!                                                       │
//!  Doc ◄── apply (remote origin) ◄── pump ◄── SyncEvent ┘
//! ```
//!
//! Updates applied with [`REMOTE_ORIGIN`] are not sent back out.

use folio_reactive::{CancellationToken, Scope};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, Origin, ReadTxn, StateVector, Transact, Update};

use crate::awareness::{Awareness, AwarenessMessage, DocCursor, LocalPeer};
use crate::blob::BlobEngine;
use crate::client::{SyncClient, SyncEvent};
use crate::lock;
use crate::protocol::ProtocolError;
use crate::workspace::WorkspaceError;

/// Transaction origin of updates received from peers.
pub const REMOTE_ORIGIN: &str = "folio-remote";

/// Outbound side of replication. Calls must not block.
pub trait DocTransport: Send + Sync {
    fn push_update(&self, doc_id: &str, update: Vec<u8>) -> Result<(), ProtocolError>;
    fn push_awareness(&self, msg: &AwarenessMessage) -> Result<(), ProtocolError>;
    fn request_sync(&self, doc_id: &str, state_vector: Vec<u8>) -> Result<(), ProtocolError>;
    fn respond_sync(&self, doc_id: &str, diff: Vec<u8>) -> Result<(), ProtocolError>;
}

type SharedTransport = Arc<Mutex<Option<Arc<dyn DocTransport>>>>;

fn current(transport: &SharedTransport) -> Option<Arc<dyn DocTransport>> {
    lock(transport).clone()
}

struct ConnectedDoc {
    doc: Doc,
    _updates: yrs::Subscription,
}

type AppliedHook = Arc<dyn Fn() + Send + Sync>;

/// Document replication.
pub struct DocEngine {
    transport: SharedTransport,
    docs: Mutex<HashMap<String, ConnectedDoc>>,
    applied: Mutex<HashMap<String, AppliedHook>>,
}

impl DocEngine {
    fn new(transport: SharedTransport) -> Self {
        Self {
            transport,
            docs: Mutex::new(HashMap::new()),
            applied: Mutex::new(HashMap::new()),
        }
    }

    /// Run `hook` after each remote update to `doc_id` commits, with the
    /// document unlocked. Replaces any earlier hook for that doc.
    pub fn on_remote_applied(&self, doc_id: &str, hook: impl Fn() + Send + Sync + 'static) {
        lock(&self.applied).insert(doc_id.to_string(), Arc::new(hook));
    }

    pub fn clear_remote_applied(&self, doc_id: &str) {
        lock(&self.applied).remove(doc_id);
    }

    /// Start replicating `doc`, keyed by its guid. Idempotent.
    pub fn connect_doc(&self, doc: &Doc) -> Result<(), WorkspaceError> {
        let doc_id = doc.guid().to_string();
        let mut docs = lock(&self.docs);
        if docs.contains_key(&doc_id) {
            return Ok(());
        }

        let transport = self.transport.clone();
        let id = doc_id.clone();
        let remote = Origin::from(REMOTE_ORIGIN);
        let subscription = doc
            .observe_update_v1(move |txn, event| {
                if txn.origin() == Some(&remote) {
                    return;
                }
                let Some(transport) = current(&transport) else {
                    return;
                };
                if let Err(e) = transport.push_update(&id, event.update.clone()) {
                    log::warn!("Failed to send update for {id}: {e}");
                }
            })
            .map_err(|e| WorkspaceError::Crdt(e.to_string()))?;

        docs.insert(
            doc_id.clone(),
            ConnectedDoc {
                doc: doc.clone(),
                _updates: subscription,
            },
        );
        drop(docs);
        log::debug!("Connected doc {doc_id}");

        self.request_sync(&doc_id);
        Ok(())
    }

    /// Stop replicating `doc_id`.
    pub fn disconnect_doc(&self, doc_id: &str) -> bool {
        lock(&self.docs).remove(doc_id).is_some()
    }

    pub fn is_connected(&self, doc_id: &str) -> bool {
        lock(&self.docs).contains_key(doc_id)
    }

    pub fn doc_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.docs).keys().cloned().collect();
        ids.sort();
        ids
    }

    fn doc(&self, doc_id: &str) -> Result<Doc, WorkspaceError> {
        lock(&self.docs)
            .get(doc_id)
            .map(|c| c.doc.clone())
            .ok_or_else(|| WorkspaceError::UnknownDoc(doc_id.to_string()))
    }

    /// Apply an update received from a peer.
    pub fn apply_remote_update(&self, doc_id: &str, update: &[u8]) -> Result<(), WorkspaceError> {
        let doc = self.doc(doc_id)?;
        let update = Update::decode_v1(update).map_err(|e| WorkspaceError::Crdt(e.to_string()))?;
        {
            let mut txn = doc.transact_mut_with(REMOTE_ORIGIN);
            txn.apply_update(update)
                .map_err(|e| WorkspaceError::Crdt(e.to_string()))?;
        }
        let hook = lock(&self.applied).get(doc_id).cloned();
        if let Some(hook) = hook {
            hook();
        }
        Ok(())
    }

    /// Encoded state vector of `doc_id`.
    pub fn state_vector(&self, doc_id: &str) -> Result<Vec<u8>, WorkspaceError> {
        let doc = self.doc(doc_id)?;
        let txn = doc.transact();
        Ok(txn.state_vector().encode_v1())
    }

    /// Everything `doc_id` holds that a peer with `state_vector` lacks.
    pub fn diff_since(&self, doc_id: &str, state_vector: &[u8]) -> Result<Vec<u8>, WorkspaceError> {
        let doc = self.doc(doc_id)?;
        let sv = StateVector::decode_v1(state_vector).map_err(|e| WorkspaceError::Crdt(e.to_string()))?;
        let txn = doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    fn request_sync(&self, doc_id: &str) {
        let Some(transport) = current(&self.transport) else {
            return;
        };
        match self.state_vector(doc_id) {
            Ok(sv) => {
                if let Err(e) = transport.request_sync(doc_id, sv) {
                    log::debug!("Sync request for {doc_id} deferred: {e}");
                }
            }
            Err(e) => log::warn!("Failed to read state of {doc_id}: {e}"),
        }
    }

    /// Ask peers for every connected doc, e.g. after reconnecting.
    pub fn resync_all(&self) {
        for doc_id in self.doc_ids() {
            self.request_sync(&doc_id);
        }
    }

    fn answer_sync(&self, doc_id: &str, state_vector: &[u8]) -> Result<(), WorkspaceError> {
        let diff = self.diff_since(doc_id, state_vector)?;
        if let Some(transport) = current(&self.transport) {
            transport
                .respond_sync(doc_id, diff)
                .map_err(|e| WorkspaceError::Sync(e.to_string()))?;
        }
        Ok(())
    }
}

/// Presence replication.
pub struct AwarenessEngine {
    transport: SharedTransport,
    awareness: Mutex<Option<Arc<Mutex<Awareness>>>>,
}

impl AwarenessEngine {
    fn new(transport: SharedTransport) -> Self {
        Self {
            transport,
            awareness: Mutex::new(None),
        }
    }

    /// Register the workspace's awareness state and announce ourselves.
    pub fn connect_awareness(&self, awareness: Arc<Mutex<Awareness>>) {
        let join = lock(&awareness).join_message();
        *lock(&self.awareness) = Some(awareness);
        self.broadcast(&join);
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.awareness).is_some()
    }

    fn with_awareness<R>(&self, f: impl FnOnce(&mut Awareness) -> R) -> Option<R> {
        let awareness = lock(&self.awareness).clone()?;
        let mut guard = lock(&awareness);
        Some(f(&mut guard))
    }

    fn broadcast(&self, msg: &AwarenessMessage) {
        if let Some(transport) = current(&self.transport) {
            if let Err(e) = transport.push_awareness(msg) {
                log::debug!("Awareness update dropped: {e}");
            }
        }
    }

    /// Move the local caret; broadcasts unless rate-limited.
    pub fn set_local_cursor(&self, cursor: Option<DocCursor>) {
        if let Some(Some(msg)) = self.with_awareness(|a| a.set_local_cursor(cursor)) {
            self.broadcast(&msg);
        }
    }

    pub fn set_local_selection(&self, block_ids: Vec<String>) {
        if let Some(msg) = self.with_awareness(|a| a.set_local_selection(block_ids)) {
            self.broadcast(&msg);
        }
    }

    pub fn apply_remote(&self, msg: &AwarenessMessage) {
        self.with_awareness(|a| a.handle_message(msg));
    }

    /// Re-announce join and caret, e.g. after reconnecting.
    pub fn rebroadcast(&self) {
        let messages = self.with_awareness(|a| [a.join_message(), a.cursor_message()]);
        for msg in messages.into_iter().flatten() {
            self.broadcast(&msg);
        }
    }

    fn clear_peers(&self) {
        self.with_awareness(|a| a.clear_peers());
    }

    /// Say goodbye and forget the awareness state.
    pub fn disconnect(&self) {
        if let Some(leave) = self.with_awareness(|a| a.leave_message()) {
            self.broadcast(&leave);
        }
        *lock(&self.awareness) = None;
    }
}

/// Replication engine for one workspace: docs, awareness and blobs.
pub struct WorkspaceEngine {
    peer: LocalPeer,
    transport: SharedTransport,
    doc: Arc<DocEngine>,
    awareness: Arc<AwarenessEngine>,
    blob: Arc<BlobEngine>,
    scope: Scope,
}

impl WorkspaceEngine {
    pub fn new(peer: LocalPeer, blob: BlobEngine) -> Self {
        let transport: SharedTransport = Arc::new(Mutex::new(None));
        Self {
            peer,
            doc: Arc::new(DocEngine::new(transport.clone())),
            awareness: Arc::new(AwarenessEngine::new(transport.clone())),
            transport,
            blob: Arc::new(blob),
            scope: Scope::new("workspace-engine"),
        }
    }

    pub fn peer(&self) -> &LocalPeer {
        &self.peer
    }

    pub fn doc(&self) -> &Arc<DocEngine> {
        &self.doc
    }

    pub fn awareness(&self) -> &Arc<AwarenessEngine> {
        &self.awareness
    }

    pub fn blob(&self) -> &Arc<BlobEngine> {
        &self.blob
    }

    /// Route outbound replication through `transport`.
    pub fn set_transport(&self, transport: Arc<dyn DocTransport>) {
        *lock(&self.transport) = Some(transport);
        self.doc.resync_all();
        self.awareness.rebroadcast();
    }

    /// Use `client` as transport and apply its events until disposed.
    pub fn attach(&self, client: Arc<SyncClient>) -> Result<(), WorkspaceError> {
        let events = client
            .take_event_rx()
            .ok_or_else(|| WorkspaceError::Sync("client events already taken".into()))?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| WorkspaceError::Sync(e.to_string()))?;

        self.set_transport(client);
        runtime.spawn(pump(
            events,
            self.doc.clone(),
            self.awareness.clone(),
            self.scope.token().clone(),
        ));
        Ok(())
    }

    /// Apply one inbound event.
    pub fn handle_event(&self, event: SyncEvent) {
        handle_event(&self.doc, &self.awareness, event);
    }

    pub fn is_disposed(&self) -> bool {
        self.scope.is_disposed()
    }

    /// Stop the pump, leave awareness and detach the transport. Idempotent.
    pub fn dispose(&self) {
        if self.scope.is_disposed() {
            return;
        }
        self.awareness.disconnect();
        self.scope.dispose();
        *lock(&self.transport) = None;
        for doc_id in self.doc.doc_ids() {
            self.doc.disconnect_doc(&doc_id);
        }
        lock(&self.doc.applied).clear();
    }
}

async fn pump(
    mut events: mpsc::Receiver<SyncEvent>,
    doc: Arc<DocEngine>,
    awareness: Arc<AwarenessEngine>,
    stop: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = stop.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        handle_event(&doc, &awareness, event);
    }
    log::debug!("Sync pump stopped");
}

fn handle_event(doc: &DocEngine, awareness: &AwarenessEngine, event: SyncEvent) {
    match event {
        SyncEvent::Connected => {
            log::info!("Sync connected, resyncing {} docs", doc.doc_ids().len());
            doc.resync_all();
            awareness.rebroadcast();
        }
        SyncEvent::Disconnected => {
            log::info!("Sync disconnected");
            awareness.clear_peers();
        }
        SyncEvent::RemoteUpdate { doc_id, update, .. } | SyncEvent::StateSynced { doc_id, update } => {
            if let Err(e) = doc.apply_remote_update(&doc_id, &update) {
                log::warn!("Failed to apply remote update to {doc_id}: {e}");
            }
        }
        SyncEvent::SyncRequested { doc_id, state_vector, .. } => {
            if let Err(e) = doc.answer_sync(&doc_id, &state_vector) {
                log::warn!("Failed to answer sync for {doc_id}: {e}");
            }
        }
        SyncEvent::RemoteAwareness(msg) => awareness.apply_remote(&msg),
    }
}
