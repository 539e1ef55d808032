//! RocksDB-backed object store.
//!
//! The permanent store of a node: locally authored blocks land here, keyed
//! by the binary content id. The store is append-only from the core's point
//! of view; nothing deletes blocks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, DB, Options};
use tokio::io::AsyncRead;
use tracing::{debug, error, info, instrument, warn};

use super::cid::ContentId;
use super::error::StoreError;
use super::store::{ObjectStore, drain};

const CF_OBJECTS: &str = "objects";

/// Configuration for the RocksDB object store.
#[derive(Debug, Clone)]
pub struct RocksStoreConfig {
    /// Path to the database directory.
    pub db_path: PathBuf,
    /// Enable LZ4 compression (default: true).
    pub enable_compression: bool,
    /// Maximum open files for RocksDB (default: 512).
    pub max_open_files: i32,
}

impl Default for RocksStoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("/tmp/blockgrid/objects"),
            enable_compression: true,
            max_open_files: 512,
        }
    }
}

impl RocksStoreConfig {
    /// Load configuration from environment variables.
    ///
    /// - `OBJECT_STORE_PATH`: database path
    /// - `OBJECT_STORE_COMPRESSION`: enable compression (true/false)
    /// - `OBJECT_STORE_MAX_OPEN_FILES`: max open files
    pub fn from_env() -> Self {
        use std::env;

        let defaults = Self::default();

        Self {
            db_path: env::var("OBJECT_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            enable_compression: env::var("OBJECT_STORE_COMPRESSION")
                .map(|s| s != "false" && s != "0")
                .unwrap_or(defaults.enable_compression),
            max_open_files: env::var("OBJECT_STORE_MAX_OPEN_FILES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_open_files),
        }
    }
}

/// RocksDB-backed content-addressed object store.
pub struct RocksStore {
    db: Arc<DB>,
    config: RocksStoreConfig,
}

impl RocksStore {
    /// Create or open a store at the configured path.
    #[instrument(skip(config), fields(path = %config.db_path.display()))]
    pub fn open(config: RocksStoreConfig) -> Result<Self, StoreError> {
        info!(
            path = %config.db_path.display(),
            compression = config.enable_compression,
            "Opening object store"
        );

        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                error!(error = %e, "Failed to create object store directory");
                StoreError::WriteFailed(format!("failed to create directory: {}", e))
            })?;
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(config.max_open_files);
        opts.set_keep_log_file_num(5);

        if config.enable_compression {
            opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        }

        let cf_objects = ColumnFamilyDescriptor::new(CF_OBJECTS, Options::default());

        let db = DB::open_cf_descriptors(&opts, &config.db_path, vec![cf_objects]).map_err(
            |e| {
                error!(error = %e, "Failed to open object store database");
                StoreError::WriteFailed(e.to_string())
            },
        )?;

        Ok(Self {
            db: Arc::new(db),
            config,
        })
    }

    /// The database path.
    pub fn path(&self) -> &Path {
        &self.config.db_path
    }

    fn cf(&self) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(CF_OBJECTS)
            .ok_or_else(|| StoreError::ReadFailed("objects column family not found".to_string()))
    }
}

impl Drop for RocksStore {
    fn drop(&mut self) {
        if let Ok(cf) = self.cf() {
            if let Err(e) = self.db.flush_cf(cf) {
                error!(error = %e, "Failed to flush object store on drop");
            }
        }
        info!(path = %self.config.db_path.display(), "Object store closed");
    }
}

#[async_trait]
impl ObjectStore for RocksStore {
    async fn has(&self, id: &ContentId) -> bool {
        let cf = match self.cf() {
            Ok(cf) => cf,
            Err(e) => {
                warn!(error = %e, "Existence check failed");
                return false;
            }
        };

        match self.db.get_pinned_cf(cf, id.to_bytes()) {
            Ok(value) => value.is_some(),
            Err(e) => {
                warn!(cid = %id, error = %e, "Existence check failed");
                false
            }
        }
    }

    #[instrument(skip(self), fields(cid = %id))]
    async fn read(&self, id: &ContentId) -> Result<Vec<u8>, StoreError> {
        let cf = self.cf()?;

        match self
            .db
            .get_cf(cf, id.to_bytes())
            .map_err(|e| StoreError::ReadFailed(e.to_string()))?
        {
            Some(bytes) => {
                debug!(size = bytes.len(), "Object read");
                Ok(bytes)
            }
            None => {
                debug!("Object not found");
                Err(StoreError::NotFound(id.clone()))
            }
        }
    }

    #[instrument(skip(self, reader))]
    async fn create(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<ContentId, StoreError> {
        let data = drain(reader).await?;
        let id = ContentId::digest(&data);

        let cf = self
            .db
            .cf_handle(CF_OBJECTS)
            .ok_or_else(|| StoreError::WriteFailed("objects column family not found".to_string()))?;

        // Identical bytes are already stored under this key.
        if self
            .db
            .get_pinned_cf(cf, id.to_bytes())
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?
            .is_some()
        {
            debug!(cid = %id, "Object already exists, skipping write");
            return Ok(id);
        }

        self.db
            .put_cf(cf, id.to_bytes(), &data)
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;

        debug!(cid = %id, size = data.len(), "Object stored");
        Ok(id)
    }
}
