//! Content-addressed block storage: identifiers, wire records, object
//! stores, the DAG builder, the resolver chain, and the service facade.

mod chunker;
mod cid;
mod dag;
mod error;
mod record;
mod resolver;
mod rocks_store;
mod service;
mod store;

pub use chunker::{ChunkerConfig, DEFAULT_CHUNK_SIZE};
pub use cid::ContentId;
pub use dag::DagBuilder;
pub use error::{ConfigError, StorageError, StoreError};
pub use record::{Block, Link};
pub use resolver::BlockResolver;
pub use rocks_store::{RocksStore, RocksStoreConfig};
pub use service::{BlockStorage, BlockStorageBuilder};
pub use store::{MemoryStore, ObjectStore};
