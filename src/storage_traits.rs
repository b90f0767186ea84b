use crate::batch::{Amount, SoybeanBatch};
use crate::error::StorageError;
use crate::id::ParticipantId;
use crate::roles::Participant;
use crate::transaction::{ChangeSet, TransactionHash, TransactionReceipt};
use std::iter::Iterator;

/// Iterator for traversing transaction receipts in log order
pub trait ReceiptIterator: Iterator<Item = Result<TransactionReceipt, StorageError>> {}

/// Everything a store holds, as read back when a ledger is opened
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    /// Deploying identity recorded at genesis
    pub owner: Option<ParticipantId>,

    pub participants: Vec<Participant>,

    /// Address enumeration list in append order
    pub addresses: Vec<ParticipantId>,

    /// Batches ordered by id
    pub batches: Vec<SoybeanBatch>,

    pub balances: Vec<(ParticipantId, Amount)>,

    /// Number of receipts in the log
    pub receipt_count: u64,
}

impl LedgerSnapshot {
    /// True for a store that has never been written to
    pub fn is_empty(&self) -> bool {
        self.owner.is_none()
            && self.participants.is_empty()
            && self.addresses.is_empty()
            && self.batches.is_empty()
            && self.balances.is_empty()
            && self.receipt_count == 0
    }
}

/// Entity store behind a ledger: registry table, batch table, balances and the
/// ordered receipt log
pub trait LedgerStore {
    /// Read the complete stored state
    ///
    /// # Returns
    /// A snapshot of every participant, address, batch, balance and the
    /// number of receipts
    fn load(&self) -> Result<LedgerSnapshot, StorageError>;

    /// Write a change set and, optionally, its receipt
    ///
    /// # Parameters
    /// * `changes` - The writes to apply, in order
    /// * `receipt` - The log entry recording the operation; `None` for genesis
    ///
    /// # Returns
    /// Ok(()) if every write was applied; on Err none of them were
    fn commit(
        &self,
        changes: &ChangeSet,
        receipt: Option<&TransactionReceipt>,
    ) -> Result<(), StorageError>;

    /// Get a receipt by transaction hash
    ///
    /// # Parameters
    /// * `hash` - The transaction hash to look up
    ///
    /// # Returns
    /// Some(receipt) if found, None otherwise
    fn receipt(&self, hash: &TransactionHash) -> Result<Option<TransactionReceipt>, StorageError>;

    /// Iterate over the receipt log, oldest first
    fn receipts(&self) -> Box<dyn ReceiptIterator + '_>;

    /// Commit the effects of a receipt together with the receipt itself
    fn commit_receipt(&self, receipt: &TransactionReceipt) -> Result<(), StorageError> {
        self.commit(&receipt.effects, Some(receipt))
    }
}

impl<S: LedgerStore + ?Sized> LedgerStore for Box<S> {
    fn load(&self) -> Result<LedgerSnapshot, StorageError> {
        (**self).load()
    }

    fn commit(
        &self,
        changes: &ChangeSet,
        receipt: Option<&TransactionReceipt>,
    ) -> Result<(), StorageError> {
        (**self).commit(changes, receipt)
    }

    fn receipt(&self, hash: &TransactionHash) -> Result<Option<TransactionReceipt>, StorageError> {
        (**self).receipt(hash)
    }

    fn receipts(&self) -> Box<dyn ReceiptIterator + '_> {
        (**self).receipts()
    }
}

/// Receipt iterator over an already materialized list
pub struct BufferedReceiptIterator {
    receipts: std::vec::IntoIter<Result<TransactionReceipt, StorageError>>,
}

impl BufferedReceiptIterator {
    pub fn new(receipts: Vec<TransactionReceipt>) -> Self {
        Self {
            receipts: receipts.into_iter().map(Ok).collect::<Vec<_>>().into_iter(),
        }
    }

    /// An iterator that yields a single error, for backends that fail before
    /// producing anything
    pub fn failed(err: StorageError) -> Self {
        Self {
            receipts: vec![Err(err)].into_iter(),
        }
    }
}

impl Iterator for BufferedReceiptIterator {
    type Item = Result<TransactionReceipt, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.receipts.next()
    }
}

impl ReceiptIterator for BufferedReceiptIterator {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let snapshot = LedgerSnapshot::default();
        assert!(snapshot.is_empty());

        let funded = LedgerSnapshot {
            balances: vec![(ParticipantId::derive(&[b"a"]), 1)],
            ..Default::default()
        };
        assert!(!funded.is_empty());

        let deployed = LedgerSnapshot {
            owner: Some(ParticipantId::derive(&[b"owner"])),
            ..Default::default()
        };
        assert!(!deployed.is_empty());
    }

    #[test]
    fn test_failed_iterator_yields_error_once() {
        let mut iter = BufferedReceiptIterator::failed(StorageError::Other("boom".into()));
        assert!(matches!(iter.next(), Some(Err(StorageError::Other(_)))));
        assert!(iter.next().is_none());
    }
}
