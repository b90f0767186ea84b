use crate::batch::{Amount, BatchId, SoybeanBatch};
use crate::error::StorageError;
use crate::id::ParticipantId;
use crate::roles::Participant;
use crate::storage_traits::{BufferedReceiptIterator, LedgerSnapshot, LedgerStore, ReceiptIterator};
use crate::transaction::{ChangeSet, StateChange, TransactionHash, TransactionReceipt};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryTables {
    owner: Option<ParticipantId>,
    participants: HashMap<ParticipantId, Participant>,
    addresses: Vec<ParticipantId>,
    batches: BTreeMap<BatchId, SoybeanBatch>,
    balances: HashMap<ParticipantId, Amount>,
    receipts: Vec<TransactionReceipt>,
    receipt_index: HashMap<TransactionHash, usize>,
}

/// Process-local store; state lives as long as the value does
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<MemoryTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, MemoryTables>, StorageError> {
        self.tables
            .lock()
            .map_err(|e| StorageError::Other(format!("Failed to acquire lock: {}", e)))
    }
}

impl LedgerStore for MemoryStore {
    fn load(&self) -> Result<LedgerSnapshot, StorageError> {
        let tables = self.tables()?;
        let mut participants: Vec<_> = tables.participants.values().cloned().collect();
        participants.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(LedgerSnapshot {
            owner: tables.owner,
            participants,
            addresses: tables.addresses.clone(),
            batches: tables.batches.values().cloned().collect(),
            balances: tables.balances.iter().map(|(k, v)| (*k, *v)).collect(),
            receipt_count: tables.receipts.len() as u64,
        })
    }

    fn commit(
        &self,
        changes: &ChangeSet,
        receipt: Option<&TransactionReceipt>,
    ) -> Result<(), StorageError> {
        // Holding the lock for the whole write set keeps the commit atomic
        let mut tables = self.tables()?;

        for change in changes {
            match change {
                StateChange::PutParticipant(participant) => {
                    tables
                        .participants
                        .insert(participant.id, participant.clone());
                }
                StateChange::AppendAddress(id) => tables.addresses.push(*id),
                StateChange::PutBatch(batch) => {
                    tables.batches.insert(batch.id, batch.clone());
                }
                StateChange::SetBalance { id, balance } => {
                    tables.balances.insert(*id, *balance);
                }
                StateChange::SetOwner(owner) => tables.owner = Some(*owner),
            }
        }

        if let Some(receipt) = receipt {
            let position = tables.receipts.len();
            tables
                .receipt_index
                .insert(receipt.transaction_hash, position);
            tables.receipts.push(receipt.clone());
        }

        Ok(())
    }

    fn receipt(&self, hash: &TransactionHash) -> Result<Option<TransactionReceipt>, StorageError> {
        let tables = self.tables()?;
        Ok(tables
            .receipt_index
            .get(hash)
            .and_then(|&position| tables.receipts.get(position))
            .cloned())
    }

    fn receipts(&self) -> Box<dyn ReceiptIterator + '_> {
        match self.tables() {
            Ok(tables) => Box::new(BufferedReceiptIterator::new(tables.receipts.clone())),
            Err(e) => Box::new(BufferedReceiptIterator::failed(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::tests::participant;
    use crate::roles::Role;
    use crate::transaction::{Operation, Transaction};

    #[test]
    fn test_new_store_is_empty() {
        let store = MemoryStore::new();
        assert!(store.load().unwrap().is_empty());
        assert!(store.receipts().next().is_none());
    }

    #[test]
    fn test_commit_and_load() {
        let store = MemoryStore::new();
        let farmer = participant("farmer");
        let batch = SoybeanBatch::planted(1, 100, farmer, 10);

        let changes: ChangeSet = vec![
            StateChange::SetOwner(farmer),
            StateChange::PutParticipant(Participant::new(farmer, Role::Farmer, "John")),
            StateChange::AppendAddress(farmer),
            StateChange::AppendAddress(farmer),
            StateChange::PutBatch(batch.clone()),
            StateChange::SetBalance {
                id: farmer,
                balance: 42,
            },
        ]
        .into();
        let tx = Transaction::new(farmer, Operation::Plant { quantity: 100 });
        let receipt = TransactionReceipt::new(&tx, 0, 10, changes);
        store.commit_receipt(&receipt).unwrap();

        let snapshot = store.load().unwrap();
        assert_eq!(snapshot.owner, Some(farmer));
        assert_eq!(snapshot.participants.len(), 1);
        assert_eq!(snapshot.addresses, vec![farmer, farmer]);
        assert_eq!(snapshot.batches, vec![batch]);
        assert_eq!(snapshot.balances, vec![(farmer, 42)]);
        assert_eq!(snapshot.receipt_count, 1);

        let found = store.receipt(&receipt.transaction_hash).unwrap();
        assert_eq!(found, Some(receipt));
        assert_eq!(store.receipt(&[9u8; 32]).unwrap(), None);
    }
}
