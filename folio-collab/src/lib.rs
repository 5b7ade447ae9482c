//! # folio-collab: Workspace and replication layer for Folio
//!
//! Owns each workspace's CRDT root document and keeps it, its documents,
//! presence and blobs replicated through a WebSocket sync client.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  doc_collection()  ┌───────────────┐
//! │ Workspace   │ ─────────────────► │ DocCollection │
//! │ (root Doc)  │                    │ (facade)      │
//! └──────┬──────┘                    └───────┬───────┘
//!        │                                   │ on_load_doc / on_load_awareness
//!        ▼                                   ▼
//! ┌─────────────────────────────────────────────────┐
//! │ WorkspaceEngine: DocEngine, AwarenessEngine,    │
//! │                  BlobEngine                     │
//! └──────┬──────────────────────────────────┬───────┘
//!        │ DocTransport                      │ BlobStorage
//!        ▼                                   ▼
//! ┌─────────────┐   Binary Proto     ┌──────────────────┐
//! │ SyncClient  │ ◄────────────────► │ RocksBlobStorage │
//! │ (WebSocket) │                    │ + remote storage │
//! └─────────────┘                    └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`workspace`]: Workspace entity, metadata projections
//! - [`collection`]: Document collection facade and blob adapter
//! - [`engine`]: Doc, awareness and blob replication
//! - [`blob`]: Blob storage trait, RocksDB cache, blob engine
//! - [`awareness`]: Presence state (cursors, selections)
//! - [`client`]: WebSocket sync client with offline queue
//! - [`protocol`]: Binary wire protocol (bincode-encoded SyncMessage)

use std::sync::{Mutex, MutexGuard};

pub mod awareness;
pub mod blob;
pub mod client;
pub mod collection;
pub mod engine;
pub mod protocol;
pub mod workspace;

// Re-exports for convenience
pub use awareness::{Awareness, AwarenessMessage, DocCursor, LocalPeer, PeerColor, PeerPresence};
pub use blob::{
    BlobEngine, BlobError, BlobRecord, BlobState, BlobStatus, BlobStorage, BlobStoreConfig,
    RocksBlobStorage,
};
pub use client::{ConnectionState, OfflineQueue, SyncClient, SyncClientConfig, SyncEvent};
pub use collection::{BlobSource, CollectionHooks, DocCollection};
pub use engine::{AwarenessEngine, DocEngine, DocTransport, WorkspaceEngine, REMOTE_ORIGIN};
pub use protocol::{MessageType, ProtocolError, SyncMessage};
pub use workspace::{Flavour, Workspace, WorkspaceError, WorkspaceMetadata, LOCAL_ORIGIN};

/// Lock a mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
