//! RocksDB-backed local blob cache.
//!
//! Column families:
//! - `blobs`    : Blob payloads (LZ4 compressed, keyed by blob key)
//! - `blob_meta`: Per-blob metadata (bincode: mime, sizes, created_at)
//!
//! Payload and metadata are always written in one batch, so a key present in
//! `blob_meta` always has a payload.

use async_trait::async_trait;
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use super::{BlobError, BlobRecord, BlobStorage};

const CF_BLOBS: &str = "blobs";
const CF_BLOB_META: &str = "blob_meta";

const COLUMN_FAMILIES: &[&str] = &[CF_BLOBS, CF_BLOB_META];

/// Local blob store configuration.
#[derive(Debug, Clone)]
pub struct BlobStoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 32MB)
    pub write_buffer_size: usize,
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("folio_blobs"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
            write_buffer_size: 32 * 1024 * 1024,
        }
    }
}

impl BlobStoreConfig {
    /// Create config for testing (small caches, temp directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 2 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BlobMeta {
    mime: String,
    size: u64,
    compressed_size: u64,
    created_at: u64,
}

impl BlobMeta {
    fn encode(&self) -> Result<Vec<u8>, BlobError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| BlobError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, BlobError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| BlobError::Serialization(e.to_string()))?;
        Ok(meta)
    }
}

/// Disk usage summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlobStoreStats {
    pub blob_count: u64,
    pub total_size: u64,
    pub compressed_size: u64,
}

/// RocksDB-backed blob store.
///
/// The inherent methods block on disk I/O. The [`BlobStorage`] impl runs them
/// on tokio's blocking pool. Clones share one database.
#[derive(Clone)]
pub struct RocksBlobStorage {
    db: Arc<DBWithThreadMode<SingleThreaded>>,
    config: Arc<BlobStoreConfig>,
}

impl RocksBlobStorage {
    /// Open the store, creating the database and column families if missing.
    pub fn open(config: BlobStoreConfig) -> Result<Self, BlobError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;
        log::debug!("Opened blob store at {}", config.path.display());

        Ok(Self {
            db: Arc::new(db),
            config: Arc::new(config),
        })
    }

    fn cf_options(name: &str, config: &BlobStoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_BLOBS => {
                // Payloads are already LZ4 framed
                opts.set_compression_type(DBCompressionType::None);
                opts.set_max_write_buffer_number(2);
            }
            CF_BLOB_META => {
                opts.set_compression_type(DBCompressionType::Lz4);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            _ => {}
        }

        opts
    }

    pub fn config(&self) -> &BlobStoreConfig {
        &self.config
    }

    /// Store a blob (payload + metadata in one batch).
    pub fn put(&self, record: &BlobRecord) -> Result<(), BlobError> {
        let cf_blobs = self.cf(CF_BLOBS)?;
        let cf_meta = self.cf(CF_BLOB_META)?;

        let compressed = lz4_flex::compress_prepend_size(&record.data);
        let meta = BlobMeta {
            mime: record.mime.clone(),
            size: record.data.len() as u64,
            compressed_size: compressed.len() as u64,
            created_at: record.created_at,
        };

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_blobs, record.key.as_bytes(), &compressed);
        batch.put_cf(&cf_meta, record.key.as_bytes(), meta.encode()?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    /// Load a blob, or `None` if absent.
    pub fn load(&self, key: &str) -> Result<Option<BlobRecord>, BlobError> {
        let cf_blobs = self.cf(CF_BLOBS)?;
        let cf_meta = self.cf(CF_BLOB_META)?;

        let meta = match self.db.get_cf(&cf_meta, key.as_bytes())? {
            Some(bytes) => BlobMeta::decode(&bytes)?,
            None => return Ok(None),
        };
        let compressed = self
            .db
            .get_cf(&cf_blobs, key.as_bytes())?
            .ok_or_else(|| BlobError::NotFound(key.to_string()))?;
        let data = lz4_flex::decompress_size_prepended(&compressed)
            .map_err(|e| BlobError::Compression(e.to_string()))?;

        Ok(Some(BlobRecord {
            key: key.to_string(),
            data,
            mime: meta.mime,
            created_at: meta.created_at,
        }))
    }

    pub fn contains(&self, key: &str) -> Result<bool, BlobError> {
        let cf = self.cf(CF_BLOB_META)?;
        Ok(self.db.get_cf(&cf, key.as_bytes())?.is_some())
    }

    pub fn remove(&self, key: &str) -> Result<(), BlobError> {
        let cf_blobs = self.cf(CF_BLOBS)?;
        let cf_meta = self.cf(CF_BLOB_META)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_blobs, key.as_bytes());
        batch.delete_cf(&cf_meta, key.as_bytes());
        self.db.write(batch)?;
        Ok(())
    }

    /// All keys, in byte order.
    pub fn keys(&self) -> Result<Vec<String>, BlobError> {
        let cf = self.cf(CF_BLOB_META)?;
        let mut keys = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item?;
            keys.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(keys)
    }

    pub fn stats(&self) -> Result<BlobStoreStats, BlobError> {
        let cf = self.cf(CF_BLOB_META)?;
        let mut stats = BlobStoreStats::default();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            let meta = BlobMeta::decode(&value)?;
            stats.blob_count += 1;
            stats.total_size += meta.size;
            stats.compressed_size += meta.compressed_size;
        }
        Ok(stats)
    }

    /// Flush memtables to disk.
    pub fn flush(&self) -> Result<(), BlobError> {
        for name in COLUMN_FAMILIES {
            let cf = self.cf(name)?;
            self.db.flush_cf(&cf)?;
        }
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, BlobError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| BlobError::Database(format!("Column family '{name}' not found")))
    }
}

/// Run a store call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, BlobError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, BlobError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BlobError::Database(format!("Blob store task failed: {e}")))?
}

#[async_trait]
impl BlobStorage for RocksBlobStorage {
    async fn get(&self, key: &str) -> Result<Option<BlobRecord>, BlobError> {
        let (store, key) = (self.clone(), key.to_string());
        blocking(move || store.load(&key)).await
    }

    async fn set(&self, record: BlobRecord) -> Result<(), BlobError> {
        let store = self.clone();
        blocking(move || store.put(&record)).await
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let (store, key) = (self.clone(), key.to_string());
        blocking(move || store.remove(&key)).await
    }

    async fn list(&self) -> Result<Vec<String>, BlobError> {
        let store = self.clone();
        blocking(move || store.keys()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, RocksBlobStorage) {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksBlobStorage::open(BlobStoreConfig::for_testing(dir.path())).unwrap();
        (dir, store)
    }

    #[test]
    fn test_put_load() {
        let (_dir, store) = open_temp();
        let record = BlobRecord::new("avatar.png", vec![7u8; 4096], "image/png");
        store.put(&record).unwrap();

        let loaded = store.load("avatar.png").unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(store.contains("avatar.png").unwrap());
    }

    #[test]
    fn test_load_missing() {
        let (_dir, store) = open_temp();
        assert!(store.load("nope").unwrap().is_none());
    }

    #[test]
    fn test_remove_and_keys() {
        let (_dir, store) = open_temp();
        for key in ["b", "a", "c"] {
            store.put(&BlobRecord::new(key, vec![1, 2, 3], "application/octet-stream")).unwrap();
        }
        assert_eq!(store.keys().unwrap(), vec!["a", "b", "c"]);

        store.remove("b").unwrap();
        assert_eq!(store.keys().unwrap(), vec!["a", "c"]);
        assert!(!store.contains("b").unwrap());
    }

    #[test]
    fn test_compression_stats() {
        let (_dir, store) = open_temp();
        store.put(&BlobRecord::new("zeros", vec![0u8; 64 * 1024], "text/plain")).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.blob_count, 1);
        assert_eq!(stats.total_size, 64 * 1024);
        assert!(stats.compressed_size < stats.total_size / 10);
    }

    #[test]
    fn test_reopen_persists() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = RocksBlobStorage::open(BlobStoreConfig::for_testing(dir.path())).unwrap();
            store.put(&BlobRecord::new("k", vec![9; 10], "image/jpeg")).unwrap();
            store.flush().unwrap();
        }
        let store = RocksBlobStorage::open(BlobStoreConfig::for_testing(dir.path())).unwrap();
        assert_eq!(store.load("k").unwrap().unwrap().mime, "image/jpeg");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_storage_trait_round_trip() {
        let (_dir, store) = open_temp();
        let storage: Arc<dyn BlobStorage> = Arc::new(store);

        let writes = (0..32).map(|i| {
            let storage = storage.clone();
            async move {
                let key = format!("blob-{i:02}");
                storage.set(BlobRecord::new(&key, vec![i as u8; 16 * 1024], "image/png")).await
            }
        });
        for result in futures_util::future::join_all(writes).await {
            result.unwrap();
        }

        assert_eq!(storage.list().await.unwrap().len(), 32);
        assert_eq!(storage.get("blob-07").await.unwrap().unwrap().data, vec![7u8; 16 * 1024]);
        storage.delete("blob-07").await.unwrap();
        assert!(storage.get("blob-07").await.unwrap().is_none());
    }
}
