use crate::batch::{Amount, BatchId, SoybeanBatch, Timestamp};
use crate::id::ParticipantId;
use crate::roles::{Participant, Role};
use serde::{Deserialize, Serialize};

/// A transaction hash uniquely identifies a committed operation in the log
pub type TransactionHash = [u8; 32];

/// A mutating call on the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    AssignRole {
        identity: ParticipantId,
        role: Role,
        name: String,
    },
    AddAddress {
        identity: ParticipantId,
    },
    Plant {
        quantity: u64,
    },
    Harvest {
        batch_id: BatchId,
        price: Amount,
    },
    Process {
        batch_id: BatchId,
        product: String,
    },
    Pack {
        batch_id: BatchId,
        price: Amount,
    },
    Sell {
        batch_id: BatchId,
        price: Amount,
    },
    Buy {
        batch_id: BatchId,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::AssignRole { .. } => "assign_role",
            Operation::AddAddress { .. } => "add_address",
            Operation::Plant { .. } => "plant",
            Operation::Harvest { .. } => "harvest",
            Operation::Process { .. } => "process",
            Operation::Pack { .. } => "pack",
            Operation::Sell { .. } => "sell",
            Operation::Buy { .. } => "buy",
        }
    }

    /// Whether the operation settles a stage price
    pub fn is_payable(&self) -> bool {
        matches!(
            self,
            Operation::Process { .. } | Operation::Sell { .. } | Operation::Buy { .. }
        )
    }

    /// The batch the operation targets, if it targets an existing one
    pub fn batch_id(&self) -> Option<BatchId> {
        match self {
            Operation::Harvest { batch_id, .. }
            | Operation::Process { batch_id, .. }
            | Operation::Pack { batch_id, .. }
            | Operation::Sell { batch_id, .. }
            | Operation::Buy { batch_id } => Some(*batch_id),
            _ => None,
        }
    }

    fn hash_into(&self, hasher: &mut blake3::Hasher) {
        hasher.update(self.name().as_bytes());
        match self {
            Operation::AssignRole {
                identity,
                role,
                name,
            } => {
                hasher.update(identity.bytes());
                hasher.update(&role.code().to_le_bytes());
                hasher.update(&(name.len() as u64).to_le_bytes());
                hasher.update(name.as_bytes());
            }
            Operation::AddAddress { identity } => {
                hasher.update(identity.bytes());
            }
            Operation::Plant { quantity } => {
                hasher.update(&quantity.to_le_bytes());
            }
            Operation::Harvest { batch_id, price }
            | Operation::Pack { batch_id, price }
            | Operation::Sell { batch_id, price } => {
                hasher.update(&batch_id.to_le_bytes());
                hasher.update(&price.to_le_bytes());
            }
            Operation::Process { batch_id, product } => {
                hasher.update(&batch_id.to_le_bytes());
                hasher.update(&(product.len() as u64).to_le_bytes());
                hasher.update(product.as_bytes());
            }
            Operation::Buy { batch_id } => {
                hasher.update(&batch_id.to_le_bytes());
            }
        }
    }
}

/// An operation submitted by an identified caller, with the value it attaches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Identity of the submitter, supplied by the session layer
    pub caller: ParticipantId,

    pub operation: Operation,

    /// Value attached to the call; must match the stage price for payable
    /// operations and be zero otherwise
    pub value: Amount,
}

impl Transaction {
    pub fn new(caller: ParticipantId, operation: Operation) -> Self {
        Self {
            caller,
            operation,
            value: 0,
        }
    }

    pub fn with_value(mut self, value: Amount) -> Self {
        self.value = value;
        self
    }

    /// Hash of this transaction at a given position in the log
    pub fn hash(&self, sequence: u64) -> TransactionHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"SOY_Transaction");
        hasher.update(&sequence.to_le_bytes());
        hasher.update(self.caller.bytes());
        hasher.update(&self.value.to_le_bytes());
        self.operation.hash_into(&mut hasher);
        *hasher.finalize().as_bytes()
    }
}

/// One write against the ledger's entity store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateChange {
    /// Insert or overwrite a registry entry
    PutParticipant(Participant),

    /// Append to the address enumeration list
    AppendAddress(ParticipantId),

    /// Insert or overwrite a batch record
    PutBatch(SoybeanBatch),

    /// Overwrite a participant balance
    SetBalance { id: ParticipantId, balance: Amount },

    /// Record the deploying identity; written once, at genesis
    SetOwner(ParticipantId),
}

/// The complete write set of one operation, applied all-or-nothing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    changes: Vec<StateChange>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: StateChange) {
        self.changes.push(change);
    }

    pub fn iter(&self) -> impl Iterator<Item = &StateChange> {
        self.changes.iter()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Balance written for `id` by this change set, if any (last write wins)
    pub fn balance_of(&self, id: &ParticipantId) -> Option<Amount> {
        self.changes.iter().rev().find_map(|change| match change {
            StateChange::SetBalance { id: target, balance } if target == id => Some(*balance),
            _ => None,
        })
    }
}

impl From<Vec<StateChange>> for ChangeSet {
    fn from(changes: Vec<StateChange>) -> Self {
        Self { changes }
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a StateChange;
    type IntoIter = std::slice::Iter<'a, StateChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

/// Record of a committed operation in the global ordered log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    /// The hash of the transaction that was executed
    pub transaction_hash: TransactionHash,

    /// Position in the log, starting at 0
    pub sequence: u64,

    pub caller: ParticipantId,

    pub operation: Operation,

    pub value: Amount,

    /// Timestamp when the operation was applied
    pub timestamp: Timestamp,

    /// The batch created or advanced by the operation
    pub batch_id: Option<BatchId>,

    /// Writes performed by the operation
    pub effects: ChangeSet,
}

impl TransactionReceipt {
    pub fn new(
        transaction: &Transaction,
        sequence: u64,
        timestamp: Timestamp,
        effects: ChangeSet,
    ) -> Self {
        let batch_id = transaction.operation.batch_id().or_else(|| {
            // Plant creates the batch, so its id only shows up in the effects
            effects.iter().find_map(|change| match change {
                StateChange::PutBatch(batch) => Some(batch.id),
                _ => None,
            })
        });

        Self {
            transaction_hash: transaction.hash(sequence),
            sequence,
            caller: transaction.caller,
            operation: transaction.operation.clone(),
            value: transaction.value,
            timestamp,
            batch_id,
            effects,
        }
    }

    /// Hex form of the transaction hash
    pub fn hash_hex(&self) -> String {
        hex::encode(self.transaction_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::tests::participant;

    #[test]
    fn test_hash_depends_on_sequence_and_fields() {
        let tx = Transaction::new(participant("farmer"), Operation::Plant { quantity: 100 });

        assert_eq!(tx.hash(0), tx.hash(0));
        assert_ne!(tx.hash(0), tx.hash(1));

        let other = Transaction::new(participant("farmer"), Operation::Plant { quantity: 101 });
        assert_ne!(tx.hash(0), other.hash(0));

        let paid = tx.clone().with_value(1);
        assert_ne!(tx.hash(0), paid.hash(0));
    }

    #[test]
    fn test_payable_operations() {
        assert!(Operation::Process {
            batch_id: 1,
            product: "Soy Milk".into()
        }
        .is_payable());
        assert!(Operation::Sell {
            batch_id: 1,
            price: 5
        }
        .is_payable());
        assert!(Operation::Buy { batch_id: 1 }.is_payable());
        assert!(!Operation::Harvest {
            batch_id: 1,
            price: 5
        }
        .is_payable());
        assert!(!Operation::Plant { quantity: 1 }.is_payable());
    }

    #[test]
    fn test_receipt_picks_up_planted_batch_id() {
        let farmer = participant("farmer");
        let tx = Transaction::new(farmer, Operation::Plant { quantity: 5 });
        let effects: ChangeSet =
            vec![StateChange::PutBatch(SoybeanBatch::planted(3, 5, farmer, 10))].into();

        let receipt = TransactionReceipt::new(&tx, 7, 10, effects);
        assert_eq!(receipt.batch_id, Some(3));
        assert_eq!(receipt.sequence, 7);
        assert_eq!(receipt.transaction_hash, tx.hash(7));
        assert_eq!(receipt.hash_hex().len(), 64);
    }

    #[test]
    fn test_change_set_balance_last_write_wins() {
        let id = participant("processor");
        let changes: ChangeSet = vec![
            StateChange::SetBalance { id, balance: 10 },
            StateChange::SetBalance { id, balance: 4 },
        ]
        .into();
        assert_eq!(changes.balance_of(&id), Some(4));
        assert_eq!(changes.balance_of(&participant("nobody")), None);
    }
}
