//! Blob engine: local cache in front of optional remote storage.

use folio_reactive::{CancellationToken, LiveData};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{BlobError, BlobRecord, BlobState, BlobStatus, BlobStorage};
use crate::lock;

/// Funnels every blob read and write.
///
/// Reads hit the local store first and fall back to remote, caching what
/// they download. Writes land locally, then upload. Progress of each key is
/// published through [`state`](Self::state).
pub struct BlobEngine {
    local: Arc<dyn BlobStorage>,
    remote: Option<Arc<dyn BlobStorage>>,
    states: Mutex<HashMap<String, LiveData<BlobState>>>,
}

impl BlobEngine {
    pub fn new(local: Arc<dyn BlobStorage>, remote: Option<Arc<dyn BlobStorage>>) -> Self {
        Self {
            local,
            remote,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn local_only(local: Arc<dyn BlobStorage>) -> Self {
        Self::new(local, None)
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Observable sync state of `key`.
    pub fn state(&self, key: &str) -> LiveData<BlobState> {
        lock(&self.states)
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    fn publish(&self, key: &str, state: BlobState) {
        self.state(key).set(state);
    }

    pub async fn get(
        &self,
        key: &str,
        signal: &CancellationToken,
    ) -> Result<Option<BlobRecord>, BlobError> {
        if let Some(record) = self.local.get(key).await? {
            return Ok(Some(record));
        }
        let Some(remote) = &self.remote else {
            return Ok(None);
        };

        self.publish(key, BlobState::with_status(BlobStatus::Downloading));
        let fetched = tokio::select! {
            biased;
            _ = signal.cancelled() => {
                self.publish(key, BlobState::default());
                return Err(BlobError::Cancelled);
            }
            fetched = remote.get(key) => fetched,
        };

        match fetched {
            Ok(Some(record)) => {
                self.local.set(record.clone()).await?;
                self.publish(key, BlobState::with_status(BlobStatus::Synced));
                Ok(Some(record))
            }
            Ok(None) => {
                self.publish(key, BlobState::default());
                Ok(None)
            }
            Err(e) => {
                log::error!("Failed to download blob {key}: {e}");
                self.publish(key, BlobState::failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Store `record` and return its key.
    ///
    /// An upload failure is reported through the key's state; the blob stays
    /// readable from the local store.
    pub async fn set(
        &self,
        record: BlobRecord,
        signal: &CancellationToken,
    ) -> Result<String, BlobError> {
        let key = record.key.clone();
        self.local.set(record.clone()).await?;

        let Some(remote) = &self.remote else {
            self.publish(&key, BlobState::with_status(BlobStatus::Synced));
            return Ok(key);
        };

        self.publish(&key, BlobState::with_status(BlobStatus::Uploading));
        let uploaded = tokio::select! {
            biased;
            _ = signal.cancelled() => {
                self.publish(&key, BlobState::default());
                return Err(BlobError::Cancelled);
            }
            uploaded = remote.set(record) => uploaded,
        };

        match uploaded {
            Ok(()) => self.publish(&key, BlobState::with_status(BlobStatus::Synced)),
            Err(e) => {
                log::error!("Failed to upload blob {key}: {e}");
                self.publish(&key, BlobState::failed(e.to_string()));
            }
        }
        Ok(key)
    }

    pub async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.local.delete(key).await?;
        if let Some(remote) = &self.remote {
            remote.delete(key).await?;
        }
        lock(&self.states).remove(key);
        Ok(())
    }

    /// Keys held locally.
    pub async fn list(&self) -> Result<Vec<String>, BlobError> {
        self.local.list().await
    }
}
