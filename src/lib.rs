pub mod batch;
pub mod clock;
pub mod config;
pub mod error;
pub mod id;
pub mod ledger;
pub mod registry;
pub mod roles;
pub mod storage;
pub mod storage_traits;
pub mod supply_chain;
pub mod transaction;

// Re-export the main types for convenience
pub use batch::{Amount, BatchId, BatchState, PriceStage, SoybeanBatch, Timestamp, STAGE_COUNT};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{GenesisBalance, GenesisParticipant, LedgerConfig, StorageConfig};
pub use error::{AuthFailure, LedgerError, StorageError};
pub use id::{ParseIdError, ParticipantId};
pub use ledger::BatchLedger;
pub use registry::IdentityRegistry;
pub use roles::{ParseRoleError, Participant, Role};
pub use storage_traits::{LedgerSnapshot, LedgerStore, ReceiptIterator};
pub use supply_chain::{SupplyChain, TraceStep};
pub use transaction::{
    ChangeSet,
    Operation,
    StateChange,
    Transaction,
    TransactionHash,
    TransactionReceipt
};

// Re-export the storage implementations
pub use storage::MemoryStore;

#[cfg(feature = "sqlite")]
pub use storage::SqliteStore;

#[cfg(feature = "rocksdb")]
pub use storage::RocksDbStore;
