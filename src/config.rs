use crate::batch::Amount;
use crate::error::StorageError;
use crate::id::ParticipantId;
use crate::roles::{Participant, Role};
use crate::storage::{LedgerStore, MemoryStore};
use crate::transaction::{ChangeSet, StateChange};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A role assignment applied at genesis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisParticipant {
    pub id: ParticipantId,
    pub role: Role,
    #[serde(default)]
    pub name: String,
}

/// An initial balance credited at genesis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisBalance {
    pub id: ParticipantId,
    pub amount: Amount,
}

/// Where the ledger keeps its entity store
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    #[default]
    Memory,
    #[cfg(feature = "sqlite")]
    Sqlite { path: PathBuf },
    #[cfg(feature = "rocksdb")]
    Rocksdb { path: PathBuf },
}

impl StorageConfig {
    /// Open the configured backend
    pub fn open(&self) -> Result<Box<dyn LedgerStore>, StorageError> {
        match self {
            StorageConfig::Memory => Ok(Box::new(MemoryStore::new())),
            #[cfg(feature = "sqlite")]
            StorageConfig::Sqlite { path } => Ok(Box::new(crate::storage::SqliteStore::new(path)?)),
            #[cfg(feature = "rocksdb")]
            StorageConfig::Rocksdb { path } => {
                Ok(Box::new(crate::storage::RocksDbStore::new(path)?))
            }
        }
    }
}

/// Ledger configuration
///
/// ```json
/// {
///   "owner": "0x…",
///   "participants": [{ "id": "0x…", "role": "Farmer", "name": "John" }],
///   "balances": [{ "id": "0x…", "amount": 100000 }],
///   "storage": { "backend": "sqlite", "path": "ledger.db" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// The deploying identity; bootstrap admin until an explicit admin exists
    pub owner: ParticipantId,

    #[serde(default)]
    pub participants: Vec<GenesisParticipant>,

    #[serde(default)]
    pub balances: Vec<GenesisBalance>,

    #[serde(default)]
    pub storage: StorageConfig,
}

impl LedgerConfig {
    /// In-memory ledger with no genesis state besides its owner
    pub fn new(owner: ParticipantId) -> Self {
        Self {
            owner,
            participants: Vec::new(),
            balances: Vec::new(),
            storage: StorageConfig::Memory,
        }
    }

    pub fn with_participant(mut self, id: ParticipantId, role: Role, name: &str) -> Self {
        self.participants.push(GenesisParticipant {
            id,
            role,
            name: name.to_string(),
        });
        self
    }

    pub fn with_balance(mut self, id: ParticipantId, amount: Amount) -> Self {
        self.balances.push(GenesisBalance { id, amount });
        self
    }

    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("Failed to parse ledger configuration")
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Writes seeding an empty store: the owner record, genesis roles (each
    /// also appended to the address list), then genesis balances
    pub fn genesis_changes(&self) -> ChangeSet {
        let mut changes = ChangeSet::new();
        changes.push(StateChange::SetOwner(self.owner));
        for p in &self.participants {
            changes.push(StateChange::PutParticipant(Participant::new(
                p.id,
                p.role,
                p.name.as_str(),
            )));
            changes.push(StateChange::AppendAddress(p.id));
        }
        for b in &self.balances {
            changes.push(StateChange::SetBalance {
                id: b.id,
                balance: b.amount,
            });
        }
        changes
    }
}
