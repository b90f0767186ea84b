use crate::{
    batch::{Amount, SoybeanBatch},
    error::StorageError,
    id::ParticipantId,
    roles::{Participant, Role},
    storage_traits::{BufferedReceiptIterator, LedgerSnapshot, LedgerStore, ReceiptIterator},
    transaction::{ChangeSet, StateChange, TransactionHash, TransactionReceipt},
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Row,
};
use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio::runtime::Runtime;

/// A SQLite-based implementation of the LedgerStore interface using sqlx.
pub struct SqliteStore {
    pool: SqlitePool,
    rt: Arc<Runtime>,
    db_path: PathBuf,
}

impl SqliteStore {
    /// Opens (creating if missing) a SQLite store at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db_path = path.as_ref().to_path_buf();
        let db_url = format!("sqlite:{}", db_path.to_string_lossy());

        // Create a runtime for async operations
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map(Arc::new)
            .map_err(|e| StorageError::Other(format!("Failed to create runtime: {}", e)))?;

        let options = SqliteConnectOptions::from_str(&db_url)
            .map_err(|e| StorageError::Database(format!("Invalid database URL: {}", e)))?
            .create_if_missing(true);

        let pool = rt.block_on(async {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await
        })?;

        rt.block_on(Self::initialize_schema(&pool))?;
        log::debug!("Opened SQLite ledger store at {}", db_path.display());

        Ok(Self { pool, rt, db_path })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Creates the necessary tables in the database
    async fn initialize_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        // Single-row facts about the ledger itself, keyed by name
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS ledger_meta (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS participants (
                id BLOB PRIMARY KEY,
                role INTEGER NOT NULL,
                name TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        // Enumeration list; duplicates are expected
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS addresses (
                position INTEGER PRIMARY KEY AUTOINCREMENT,
                id BLOB NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS batches (
                id INTEGER PRIMARY KEY,
                state INTEGER NOT NULL,
                record BLOB NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        // Amounts are u128, stored as 16 big-endian bytes
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS balances (
                id BLOB PRIMARY KEY,
                amount BLOB NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS receipts (
                sequence INTEGER PRIMARY KEY,
                hash BLOB NOT NULL UNIQUE,
                receipt BLOB NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    fn id_from_blob(blob: &[u8]) -> Result<ParticipantId, StorageError> {
        let bytes: [u8; 32] = blob.try_into().map_err(|_| {
            StorageError::Serialization(format!("participant id of {} bytes", blob.len()))
        })?;
        Ok(ParticipantId::new(bytes))
    }

    fn amount_from_blob(blob: &[u8]) -> Result<Amount, StorageError> {
        let bytes: [u8; 16] = blob.try_into().map_err(|_| {
            StorageError::Serialization(format!("amount of {} bytes", blob.len()))
        })?;
        Ok(Amount::from_be_bytes(bytes))
    }

    fn to_i64(value: u64) -> Result<i64, StorageError> {
        i64::try_from(value)
            .map_err(|_| StorageError::Other(format!("{} does not fit in an INTEGER", value)))
    }

    async fn load_all(&self) -> Result<LedgerSnapshot, StorageError> {
        let mut snapshot = LedgerSnapshot::default();

        if let Some(row) = sqlx::query("SELECT value FROM ledger_meta WHERE key = 'owner'")
            .fetch_optional(&self.pool)
            .await?
        {
            let owner: Vec<u8> = row.try_get(0)?;
            snapshot.owner = Some(Self::id_from_blob(&owner)?);
        }

        for row in sqlx::query("SELECT id, role, name FROM participants ORDER BY id")
            .fetch_all(&self.pool)
            .await?
        {
            let id: Vec<u8> = row.try_get(0)?;
            let code: i64 = row.try_get(1)?;
            let name: String = row.try_get(2)?;
            let role = Role::from_code(code)
                .ok_or_else(|| StorageError::Serialization(format!("role code {}", code)))?;
            snapshot
                .participants
                .push(Participant::new(Self::id_from_blob(&id)?, role, name));
        }

        for row in sqlx::query("SELECT id FROM addresses ORDER BY position")
            .fetch_all(&self.pool)
            .await?
        {
            let id: Vec<u8> = row.try_get(0)?;
            snapshot.addresses.push(Self::id_from_blob(&id)?);
        }

        for row in sqlx::query("SELECT record FROM batches ORDER BY id")
            .fetch_all(&self.pool)
            .await?
        {
            let record: Vec<u8> = row.try_get(0)?;
            snapshot
                .batches
                .push(bincode::deserialize::<SoybeanBatch>(&record)?);
        }

        for row in sqlx::query("SELECT id, amount FROM balances")
            .fetch_all(&self.pool)
            .await?
        {
            let id: Vec<u8> = row.try_get(0)?;
            let amount: Vec<u8> = row.try_get(1)?;
            snapshot
                .balances
                .push((Self::id_from_blob(&id)?, Self::amount_from_blob(&amount)?));
        }

        let count: i64 = sqlx::query("SELECT COUNT(*) FROM receipts")
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;
        snapshot.receipt_count = u64::try_from(count).unwrap_or(0);

        Ok(snapshot)
    }

    async fn commit_all(
        &self,
        changes: &ChangeSet,
        receipt: Option<&TransactionReceipt>,
    ) -> Result<(), StorageError> {
        // Use a transaction to ensure atomicity
        let mut tx = self.pool.begin().await?;

        for change in changes {
            match change {
                StateChange::PutParticipant(participant) => {
                    sqlx::query(
                        "INSERT OR REPLACE INTO participants (id, role, name) VALUES (?, ?, ?)",
                    )
                    .bind(participant.id.bytes())
                    .bind(participant.role.code())
                    .bind(participant.name.as_str())
                    .execute(&mut *tx)
                    .await?;
                }
                StateChange::AppendAddress(id) => {
                    sqlx::query("INSERT INTO addresses (id) VALUES (?)")
                        .bind(id.bytes())
                        .execute(&mut *tx)
                        .await?;
                }
                StateChange::PutBatch(batch) => {
                    let record = bincode::serialize(batch)?;
                    sqlx::query(
                        "INSERT OR REPLACE INTO batches (id, state, record) VALUES (?, ?, ?)",
                    )
                    .bind(Self::to_i64(batch.id)?)
                    .bind(batch.state.ordinal() as i64)
                    .bind(record)
                    .execute(&mut *tx)
                    .await?;
                }
                StateChange::SetBalance { id, balance } => {
                    sqlx::query("INSERT OR REPLACE INTO balances (id, amount) VALUES (?, ?)")
                        .bind(id.bytes())
                        .bind(balance.to_be_bytes().to_vec())
                        .execute(&mut *tx)
                        .await?;
                }
                StateChange::SetOwner(owner) => {
                    sqlx::query(
                        "INSERT OR REPLACE INTO ledger_meta (key, value) VALUES ('owner', ?)",
                    )
                    .bind(owner.bytes())
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        if let Some(receipt) = receipt {
            let encoded = bincode::serialize(receipt)?;
            sqlx::query("INSERT INTO receipts (sequence, hash, receipt) VALUES (?, ?, ?)")
                .bind(Self::to_i64(receipt.sequence)?)
                .bind(receipt.transaction_hash.to_vec())
                .bind(encoded)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn fetch_receipt(
        &self,
        hash: &TransactionHash,
    ) -> Result<Option<TransactionReceipt>, StorageError> {
        let row = sqlx::query("SELECT receipt FROM receipts WHERE hash = ?")
            .bind(hash.to_vec())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let encoded: Vec<u8> = row.try_get(0)?;
                Ok(Some(bincode::deserialize(&encoded)?))
            }
            None => Ok(None),
        }
    }

    async fn fetch_receipts(&self) -> Result<Vec<TransactionReceipt>, StorageError> {
        let rows = sqlx::query("SELECT receipt FROM receipts ORDER BY sequence")
            .fetch_all(&self.pool)
            .await?;

        let mut receipts = Vec::with_capacity(rows.len());
        for row in rows {
            let encoded: Vec<u8> = row.try_get(0)?;
            receipts.push(bincode::deserialize(&encoded)?);
        }
        Ok(receipts)
    }
}

impl LedgerStore for SqliteStore {
    fn load(&self) -> Result<LedgerSnapshot, StorageError> {
        self.rt.block_on(self.load_all())
    }

    fn commit(
        &self,
        changes: &ChangeSet,
        receipt: Option<&TransactionReceipt>,
    ) -> Result<(), StorageError> {
        self.rt.block_on(self.commit_all(changes, receipt))
    }

    fn receipt(&self, hash: &TransactionHash) -> Result<Option<TransactionReceipt>, StorageError> {
        self.rt.block_on(self.fetch_receipt(hash))
    }

    fn receipts(&self) -> Box<dyn ReceiptIterator + '_> {
        match self.rt.block_on(self.fetch_receipts()) {
            Ok(receipts) => Box::new(BufferedReceiptIterator::new(receipts)),
            Err(e) => Box::new(BufferedReceiptIterator::failed(e)),
        }
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("db_path", &self.db_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::tests::participant;
    use crate::transaction::{Operation, Transaction};
    use tempfile::tempdir;

    #[test]
    fn test_commit_and_reopen() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("ledger.db");
        let farmer = participant("farmer");
        let batch = SoybeanBatch::planted(1, 100, farmer, 10);

        let receipt = {
            let store = SqliteStore::new(&db_path).unwrap();
            assert!(store.load().unwrap().is_empty());

            let changes: ChangeSet = vec![
                StateChange::SetOwner(farmer),
                StateChange::PutParticipant(Participant::new(farmer, Role::Farmer, "John")),
                StateChange::AppendAddress(farmer),
                StateChange::AppendAddress(farmer),
                StateChange::PutBatch(batch.clone()),
                StateChange::SetBalance {
                    id: farmer,
                    balance: u128::MAX,
                },
            ]
            .into();
            let tx = Transaction::new(farmer, Operation::Plant { quantity: 100 });
            let receipt = TransactionReceipt::new(&tx, 0, 10, changes);
            store.commit_receipt(&receipt).unwrap();
            receipt
        };

        let store = SqliteStore::new(&db_path).unwrap();
        let snapshot = store.load().unwrap();
        assert_eq!(snapshot.owner, Some(farmer));
        assert_eq!(
            snapshot.participants,
            vec![Participant::new(farmer, Role::Farmer, "John")]
        );
        assert_eq!(snapshot.addresses, vec![farmer, farmer]);
        assert_eq!(snapshot.batches, vec![batch]);
        assert_eq!(snapshot.balances, vec![(farmer, u128::MAX)]);
        assert_eq!(snapshot.receipt_count, 1);

        let found = store.receipt(&receipt.transaction_hash).unwrap();
        assert_eq!(found, Some(receipt.clone()));

        let all: Vec<_> = store.receipts().collect::<Result<_, _>>().unwrap();
        assert_eq!(all, vec![receipt]);
    }

    #[test]
    fn test_duplicate_receipt_rolls_back_changes() {
        let temp_dir = tempdir().unwrap();
        let store = SqliteStore::new(temp_dir.path().join("ledger.db")).unwrap();
        let farmer = participant("farmer");

        let tx = Transaction::new(farmer, Operation::Plant { quantity: 1 });
        let first = TransactionReceipt::new(&tx, 0, 1, ChangeSet::new());
        store.commit_receipt(&first).unwrap();

        // Same sequence again violates the primary key; the balance write
        // that precedes it must not survive
        let changes: ChangeSet = vec![StateChange::SetBalance {
            id: farmer,
            balance: 5,
        }]
        .into();
        assert!(store.commit(&changes, Some(&first)).is_err());

        let snapshot = store.load().unwrap();
        assert!(snapshot.balances.is_empty());
        assert_eq!(snapshot.receipt_count, 1);
    }
}
