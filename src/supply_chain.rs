use crate::batch::{Amount, BatchId, BatchState, SoybeanBatch, Timestamp};
use crate::clock::{Clock, SystemClock};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, StorageError};
use crate::id::ParticipantId;
use crate::ledger::BatchLedger;
use crate::registry::IdentityRegistry;
use crate::roles::{Participant, Role};
use crate::storage::LedgerStore;
use crate::transaction::{ChangeSet, Operation, Transaction, TransactionHash, TransactionReceipt};
use anyhow::Context;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// One reached stage in a batch's provenance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStep {
    pub state: BatchState,
    pub party: ParticipantId,
    pub party_name: String,
    pub timestamp: Timestamp,
}

/// The supply-chain ledger: identity registry plus batch ledger over an
/// entity store.
///
/// Mutating calls take `&mut self`, so operations are applied one at a time
/// in a single order. Each is planned against the current state, committed to
/// the store, and only then applied in memory; a failure at any point leaves
/// both untouched.
pub struct SupplyChain<S: LedgerStore> {
    registry: IdentityRegistry,
    ledger: BatchLedger,
    store: S,
    clock: Box<dyn Clock>,
    /// Position of the next receipt in the log
    sequence: u64,
}

impl<S: LedgerStore> SupplyChain<S> {
    /// Open a ledger on `store` using the system clock.
    ///
    /// An empty store is seeded with the configuration's genesis state; a
    /// store that already holds data is hydrated as-is. The owner recorded at
    /// genesis stays the owner: reopening with a configuration that names a
    /// different one fails with `InvalidInput`.
    pub fn open(config: &LedgerConfig, store: S) -> Result<Self, LedgerError> {
        Self::open_with_clock(config, store, Box::new(SystemClock))
    }

    pub fn open_with_clock(
        config: &LedgerConfig,
        store: S,
        clock: Box<dyn Clock>,
    ) -> Result<Self, LedgerError> {
        let mut snapshot = store.load()?;

        if snapshot.is_empty() {
            store.commit(&config.genesis_changes(), None)?;
            info!(
                "Seeded genesis state for {}: {} participants, {} balances",
                config.owner.short(),
                config.participants.len(),
                config.balances.len()
            );
            snapshot = store.load()?;
        } else {
            debug!(
                "Hydrated ledger: {} batches, {} addresses, {} receipts",
                snapshot.batches.len(),
                snapshot.addresses.len(),
                snapshot.receipt_count
            );
        }

        let owner = snapshot.owner.unwrap_or(config.owner);
        if owner != config.owner {
            warn!(
                "Store belongs to {}, configuration names {}",
                owner.short(),
                config.owner.short()
            );
            return Err(LedgerError::InvalidInput(format!(
                "store was deployed by {}, not {}",
                owner, config.owner
            )));
        }

        Ok(Self {
            registry: IdentityRegistry::from_parts(
                owner,
                snapshot.participants,
                snapshot.addresses,
            ),
            ledger: BatchLedger::from_parts(snapshot.batches, snapshot.balances),
            store,
            clock,
            sequence: snapshot.receipt_count,
        })
    }

    /// Validate, commit and apply one transaction
    pub fn execute(&mut self, tx: Transaction) -> Result<TransactionReceipt, LedgerError> {
        let now = self.clock.now();

        let changes = match self.plan(&tx, now) {
            Ok(changes) => changes,
            Err(e) => {
                debug!(
                    "Rejected {} from {}: {}",
                    tx.operation.name(),
                    tx.caller.short(),
                    e
                );
                return Err(e);
            }
        };

        let receipt = TransactionReceipt::new(&tx, self.sequence, now, changes);
        if let Err(e) = self.store.commit_receipt(&receipt) {
            warn!("Failed to commit {}: {}", tx.operation.name(), e);
            return Err(e.into());
        }

        for change in &receipt.effects {
            self.registry.apply(change);
            self.ledger.apply(change);
        }
        self.sequence += 1;

        info!(
            "Committed #{} {} by {}{}",
            receipt.sequence,
            tx.operation.name(),
            tx.caller.short(),
            receipt
                .batch_id
                .map(|id| format!(" on batch {}", id))
                .unwrap_or_default()
        );
        Ok(receipt)
    }

    fn plan(&self, tx: &Transaction, now: Timestamp) -> Result<ChangeSet, LedgerError> {
        let caller = &tx.caller;
        let value = tx.value;
        let registry = &self.registry;

        let changes = match &tx.operation {
            Operation::AssignRole {
                identity,
                role,
                name,
            } => registry.plan_assign_role(caller, *identity, *role, name),
            Operation::AddAddress { identity } => registry.plan_add_address(caller, *identity),
            Operation::Plant { quantity } => {
                self.ledger.plan_plant(registry, caller, *quantity, now)
            }
            Operation::Harvest { batch_id, price } => {
                self.ledger
                    .plan_harvest(registry, caller, *batch_id, *price, now)
            }
            Operation::Process { batch_id, product } => {
                self.ledger
                    .plan_process(registry, caller, *batch_id, product, value, now)
            }
            Operation::Pack { batch_id, price } => {
                self.ledger
                    .plan_pack(registry, caller, *batch_id, *price, now)
            }
            Operation::Sell { batch_id, price } => {
                self.ledger
                    .plan_sell(registry, caller, *batch_id, *price, value, now)
            }
            Operation::Buy { batch_id } => {
                self.ledger.plan_buy(registry, caller, *batch_id, value, now)
            }
        }?;

        // Payable operations settle `value` themselves; the rest take none
        if !tx.operation.is_payable() && value != 0 {
            return Err(LedgerError::PaymentMismatch {
                expected: 0,
                attached: value,
            });
        }
        Ok(changes)
    }

    // ---- Registry operations ----

    pub fn assign_role(
        &mut self,
        caller: &ParticipantId,
        identity: ParticipantId,
        role: Role,
        name: &str,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.execute(Transaction::new(
            *caller,
            Operation::AssignRole {
                identity,
                role,
                name: name.to_string(),
            },
        ))
    }

    pub fn add_address(
        &mut self,
        caller: &ParticipantId,
        identity: ParticipantId,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.execute(Transaction::new(*caller, Operation::AddAddress { identity }))
    }

    pub fn get_role(&self, id: &ParticipantId) -> Role {
        self.registry.role(id)
    }

    pub fn get_name(&self, id: &ParticipantId) -> &str {
        self.registry.name(id)
    }

    pub fn participant(&self, id: &ParticipantId) -> Participant {
        self.registry.participant(id)
    }

    /// Every registered identity with role and name
    pub fn participants(&self) -> Vec<Participant> {
        self.registry.participants()
    }

    pub fn get_all_addresses(&self) -> &[ParticipantId] {
        self.registry.addresses()
    }

    pub fn address_at(&self, index: usize) -> Result<ParticipantId, LedgerError> {
        self.registry.address_at(index)
    }

    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    // ---- Stage transitions ----

    pub fn plant(
        &mut self,
        caller: &ParticipantId,
        quantity: u64,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.execute(Transaction::new(*caller, Operation::Plant { quantity }))
    }

    pub fn harvest(
        &mut self,
        caller: &ParticipantId,
        batch_id: BatchId,
        price: Amount,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.execute(Transaction::new(
            *caller,
            Operation::Harvest { batch_id, price },
        ))
    }

    pub fn process(
        &mut self,
        caller: &ParticipantId,
        batch_id: BatchId,
        product: &str,
        payment: Amount,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.execute(
            Transaction::new(
                *caller,
                Operation::Process {
                    batch_id,
                    product: product.to_string(),
                },
            )
            .with_value(payment),
        )
    }

    pub fn pack(
        &mut self,
        caller: &ParticipantId,
        batch_id: BatchId,
        price: Amount,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.execute(Transaction::new(*caller, Operation::Pack { batch_id, price }))
    }

    pub fn sell(
        &mut self,
        caller: &ParticipantId,
        batch_id: BatchId,
        price: Amount,
        payment: Amount,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.execute(
            Transaction::new(*caller, Operation::Sell { batch_id, price }).with_value(payment),
        )
    }

    pub fn buy(
        &mut self,
        caller: &ParticipantId,
        batch_id: BatchId,
        payment: Amount,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.execute(Transaction::new(*caller, Operation::Buy { batch_id }).with_value(payment))
    }

    // ---- Reads ----

    /// Every batch ever planted, in id order
    pub fn get_all_soybeans(&self) -> &[SoybeanBatch] {
        self.ledger.batches()
    }

    /// Batch by id; unknown ids read as the zero-value record
    pub fn soybean(&self, id: BatchId) -> SoybeanBatch {
        self.ledger.batch(id)
    }

    pub fn batches_in_state(&self, state: BatchState) -> Vec<&SoybeanBatch> {
        self.ledger.in_state(state)
    }

    pub fn batches_involving(&self, id: &ParticipantId) -> Vec<&SoybeanBatch> {
        self.ledger.involving(id)
    }

    pub fn balance(&self, id: &ParticipantId) -> Amount {
        self.ledger.balance(id)
    }

    /// Provenance of a batch: one step per stage it has reached, with the
    /// responsible party's name. Empty for unknown ids.
    pub fn trace(&self, id: BatchId) -> Vec<TraceStep> {
        let Some(batch) = self.ledger.get(id) else {
            return Vec::new();
        };

        BatchState::ALL
            .iter()
            .filter_map(|state| {
                let timestamp = batch.reached_at(*state)?;
                let party = batch.party_at(*state);
                Some(TraceStep {
                    state: *state,
                    party,
                    party_name: self.registry.name(&party).to_string(),
                    timestamp,
                })
            })
            .collect()
    }

    /// Digest over the registry and batch table.
    ///
    /// Two ledgers with the same participants, address list, batches and
    /// balances produce the same digest regardless of backend.
    pub fn state_digest(&self) -> Result<[u8; 32], LedgerError> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"SOY_State");
        hasher.update(self.registry.owner().bytes());

        for participant in self.registry.participants() {
            hasher.update(&bincode::serialize(&participant).map_err(StorageError::from)?);
        }
        for id in self.registry.addresses() {
            hasher.update(id.bytes());
        }
        for batch in self.ledger.batches() {
            hasher.update(&bincode::serialize(batch).map_err(StorageError::from)?);
        }

        let mut balances: Vec<_> = self.ledger.balances().iter().collect();
        balances.sort();
        for (id, amount) in balances {
            hasher.update(id.bytes());
            hasher.update(&amount.to_le_bytes());
        }

        Ok(*hasher.finalize().as_bytes())
    }

    // ---- Log ----

    /// Number of committed operations
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn receipt(&self, hash: &TransactionHash) -> Result<Option<TransactionReceipt>, LedgerError> {
        Ok(self.store.receipt(hash)?)
    }

    /// The full log, oldest first
    pub fn receipts(&self) -> Result<Vec<TransactionReceipt>, LedgerError> {
        Ok(self.store.receipts().collect::<Result<Vec<_>, _>>()?)
    }

    /// Log entries that created or advanced batch `id`
    pub fn batch_history(&self, id: BatchId) -> Result<Vec<TransactionReceipt>, LedgerError> {
        Ok(self
            .receipts()?
            .into_iter()
            .filter(|r| r.batch_id == Some(id))
            .collect())
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl SupplyChain<Box<dyn LedgerStore>> {
    /// Open the store named by the configuration and the ledger on top of it
    pub fn from_config(config: &LedgerConfig) -> anyhow::Result<Self> {
        let store = config
            .storage
            .open()
            .context("Failed to open ledger store")?;
        Self::open(config, store).context("Failed to open ledger")
    }
}
