use crate::{
    batch::{Amount, SoybeanBatch},
    error::StorageError,
    id::ParticipantId,
    roles::Participant,
    storage_traits::{BufferedReceiptIterator, LedgerSnapshot, LedgerStore, ReceiptIterator},
    transaction::{ChangeSet, StateChange, TransactionHash, TransactionReceipt},
};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use std::{
    fmt::Debug,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

// Column family names used to organize different types of data
const CF_PARTICIPANTS: &str = "participants";
const CF_ADDRESSES: &str = "addresses";
const CF_BATCHES: &str = "batches";
const CF_BALANCES: &str = "balances";
const CF_RECEIPTS: &str = "receipts";
const CF_RECEIPT_INDEX: &str = "receipt_index";

const COLUMN_FAMILIES: [&str; 6] = [
    CF_PARTICIPANTS,
    CF_ADDRESSES,
    CF_BATCHES,
    CF_BALANCES,
    CF_RECEIPTS,
    CF_RECEIPT_INDEX,
];

// Counters and the owner record live in the default column family
const KEY_ADDRESS_COUNT: &[u8] = b"address_count";
const KEY_RECEIPT_COUNT: &[u8] = b"receipt_count";
const KEY_OWNER: &[u8] = b"owner";

/// RocksDB implementation of LedgerStore.
///
/// Sequence-keyed tables (addresses, batches, receipts) use big-endian u64
/// keys so iteration follows insertion order. Each commit is a single
/// `WriteBatch`.
pub struct RocksDbStore {
    db: Arc<DB>,
    db_path: PathBuf,
    /// Serializes commits so counter reads and writes cannot interleave
    commit_lock: Mutex<()>,
}

impl RocksDbStore {
    /// Opens (creating if missing) a RocksDB store at the specified path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db_path = path.as_ref().to_path_buf();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, &db_path, descriptors)?;
        log::debug!("Opened RocksDB ledger store at {}", db_path.display());

        Ok(Self {
            db: Arc::new(db),
            db_path,
            commit_lock: Mutex::new(()),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::Database(format!("Missing column family {}", name)))
    }

    fn read_counter(&self, key: &[u8]) -> Result<u64, StorageError> {
        match self.db.get(key)? {
            Some(bytes) => Ok(u64::from_be_bytes(Self::fixed(&bytes, "counter")?)),
            None => Ok(0),
        }
    }

    fn fixed<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N], StorageError> {
        bytes.try_into().map_err(|_| {
            StorageError::Serialization(format!("{} of {} bytes, expected {}", what, bytes.len(), N))
        })
    }

    /// All values of a column family in key order
    fn values(&self, name: &str) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, StorageError> {
        let cf = self.cf(name)?;
        self.db
            .iterator_cf(cf, IteratorMode::Start)
            .map(|item| item.map_err(StorageError::from))
            .collect()
    }
}

impl LedgerStore for RocksDbStore {
    fn load(&self) -> Result<LedgerSnapshot, StorageError> {
        let mut snapshot = LedgerSnapshot::default();

        if let Some(owner) = self.db.get(KEY_OWNER)? {
            snapshot.owner = Some(ParticipantId::new(Self::fixed::<32>(&owner, "owner")?));
        }

        for (_, value) in self.values(CF_PARTICIPANTS)? {
            snapshot
                .participants
                .push(bincode::deserialize::<Participant>(&value)?);
        }

        for (_, value) in self.values(CF_ADDRESSES)? {
            let bytes = Self::fixed::<32>(&value, "participant id")?;
            snapshot.addresses.push(ParticipantId::new(bytes));
        }

        for (_, value) in self.values(CF_BATCHES)? {
            snapshot
                .batches
                .push(bincode::deserialize::<SoybeanBatch>(&value)?);
        }

        for (key, value) in self.values(CF_BALANCES)? {
            let id = ParticipantId::new(Self::fixed::<32>(&key, "participant id")?);
            let amount = Amount::from_be_bytes(Self::fixed::<16>(&value, "amount")?);
            snapshot.balances.push((id, amount));
        }

        snapshot.receipt_count = self.read_counter(KEY_RECEIPT_COUNT)?;
        Ok(snapshot)
    }

    fn commit(
        &self,
        changes: &ChangeSet,
        receipt: Option<&TransactionReceipt>,
    ) -> Result<(), StorageError> {
        let _guard = self
            .commit_lock
            .lock()
            .map_err(|e| StorageError::Other(format!("Failed to acquire lock: {}", e)))?;

        let mut batch = WriteBatch::default();
        let mut address_count = self.read_counter(KEY_ADDRESS_COUNT)?;

        for change in changes {
            match change {
                StateChange::PutParticipant(participant) => {
                    batch.put_cf(
                        self.cf(CF_PARTICIPANTS)?,
                        participant.id.bytes(),
                        bincode::serialize(participant)?,
                    );
                }
                StateChange::AppendAddress(id) => {
                    batch.put_cf(
                        self.cf(CF_ADDRESSES)?,
                        address_count.to_be_bytes(),
                        id.bytes(),
                    );
                    address_count += 1;
                }
                StateChange::PutBatch(record) => {
                    batch.put_cf(
                        self.cf(CF_BATCHES)?,
                        record.id.to_be_bytes(),
                        bincode::serialize(record)?,
                    );
                }
                StateChange::SetBalance { id, balance } => {
                    batch.put_cf(self.cf(CF_BALANCES)?, id.bytes(), balance.to_be_bytes());
                }
                StateChange::SetOwner(owner) => batch.put(KEY_OWNER, owner.bytes()),
            }
        }
        batch.put(KEY_ADDRESS_COUNT, address_count.to_be_bytes());

        if let Some(receipt) = receipt {
            let sequence = receipt.sequence.to_be_bytes();
            batch.put_cf(
                self.cf(CF_RECEIPTS)?,
                sequence,
                bincode::serialize(receipt)?,
            );
            batch.put_cf(
                self.cf(CF_RECEIPT_INDEX)?,
                receipt.transaction_hash,
                sequence,
            );
            let receipt_count = self.read_counter(KEY_RECEIPT_COUNT)?;
            batch.put(KEY_RECEIPT_COUNT, (receipt_count + 1).to_be_bytes());
        }

        self.db.write(batch)?;
        Ok(())
    }

    fn receipt(&self, hash: &TransactionHash) -> Result<Option<TransactionReceipt>, StorageError> {
        let Some(sequence) = self.db.get_cf(self.cf(CF_RECEIPT_INDEX)?, hash)? else {
            return Ok(None);
        };
        match self.db.get_cf(self.cf(CF_RECEIPTS)?, sequence)? {
            Some(encoded) => Ok(Some(bincode::deserialize(&encoded)?)),
            None => Err(StorageError::NotFound(format!(
                "receipt {} is indexed but missing",
                hex::encode(hash)
            ))),
        }
    }

    fn receipts(&self) -> Box<dyn ReceiptIterator + '_> {
        let loaded = self.values(CF_RECEIPTS).and_then(|entries| {
            entries
                .iter()
                .map(|(_, value)| {
                    bincode::deserialize::<TransactionReceipt>(value).map_err(StorageError::from)
                })
                .collect::<Result<Vec<_>, _>>()
        });

        match loaded {
            Ok(receipts) => Box::new(BufferedReceiptIterator::new(receipts)),
            Err(e) => Box::new(BufferedReceiptIterator::failed(e)),
        }
    }
}

impl Debug for RocksDbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDbStore")
            .field("db_path", &self.db_path)
            .finish()
    }
}
