// Re-export the storage trait
pub use crate::storage_traits::{LedgerSnapshot, LedgerStore, ReceiptIterator};

// Export implementations
mod memory;
pub use memory::MemoryStore;

#[cfg(feature = "sqlite")]
mod sqlite;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

#[cfg(feature = "rocksdb")]
mod rocksdb;
#[cfg(feature = "rocksdb")]
pub use self::rocksdb::RocksDbStore;
