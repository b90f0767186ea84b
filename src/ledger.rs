// Batch ledger and stage state machine.
// Every transition is planned against the current state into a ChangeSet; nothing
// here mutates until `apply` is called with changes that were already committed.

use crate::batch::{Amount, BatchId, BatchState, PriceStage, SoybeanBatch, Timestamp};
use crate::error::{AuthFailure, LedgerError};
use crate::id::ParticipantId;
use crate::registry::IdentityRegistry;
use crate::roles::Role;
use crate::transaction::{ChangeSet, StateChange};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct BatchLedger {
    /// Batch `n` lives at index `n - 1`
    batches: Vec<SoybeanBatch>,
    balances: HashMap<ParticipantId, Amount>,
}

impl BatchLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from stored batches and balances
    pub fn from_parts(
        mut batches: Vec<SoybeanBatch>,
        balances: impl IntoIterator<Item = (ParticipantId, Amount)>,
    ) -> Self {
        batches.sort_by_key(|b| b.id);
        Self {
            batches,
            balances: balances.into_iter().collect(),
        }
    }

    pub fn next_id(&self) -> BatchId {
        self.batches.len() as BatchId + 1
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn get(&self, id: BatchId) -> Option<&SoybeanBatch> {
        let index = usize::try_from(id.checked_sub(1)?).ok()?;
        self.batches.get(index)
    }

    /// Batch by id; unknown ids read as the zero-value record
    pub fn batch(&self, id: BatchId) -> SoybeanBatch {
        self.get(id).cloned().unwrap_or_default()
    }

    pub fn batches(&self) -> &[SoybeanBatch] {
        &self.batches
    }

    pub fn balance(&self, id: &ParticipantId) -> Amount {
        self.balances.get(id).copied().unwrap_or(0)
    }

    pub fn balances(&self) -> &HashMap<ParticipantId, Amount> {
        &self.balances
    }

    fn existing(&self, id: BatchId) -> Result<&SoybeanBatch, LedgerError> {
        self.get(id)
            .ok_or_else(|| LedgerError::NotFound(format!("batch {}", id)))
    }

    fn require_state(batch: &SoybeanBatch, expected: BatchState) -> Result<(), LedgerError> {
        if batch.state == expected {
            Ok(())
        } else {
            Err(LedgerError::InvalidState {
                batch_id: batch.id,
                expected,
                actual: batch.state,
            })
        }
    }

    fn require_stage_owner(
        caller: &ParticipantId,
        owner: &ParticipantId,
    ) -> Result<(), LedgerError> {
        if caller == owner {
            Ok(())
        } else {
            Err(LedgerError::unauthorized(
                caller,
                AuthFailure::NotStageOwner { owner: *owner },
            ))
        }
    }

    /// Move `price` from `payer` to `payee`, appending both balance writes.
    ///
    /// The attached value must equal the price exactly and the payer must hold
    /// it.
    fn settle(
        &self,
        changes: &mut ChangeSet,
        payer: &ParticipantId,
        payee: &ParticipantId,
        price: Amount,
        attached: Amount,
    ) -> Result<(), LedgerError> {
        if attached != price {
            return Err(LedgerError::PaymentMismatch {
                expected: price,
                attached,
            });
        }

        let available = self.balance(payer);
        let debited = available
            .checked_sub(price)
            .ok_or(LedgerError::InsufficientFunds {
                payer: *payer,
                required: price,
                available,
            })?;
        changes.push(StateChange::SetBalance {
            id: *payer,
            balance: debited,
        });

        // Read the payee through the change set so a self-payment nets out
        let payee_before = changes
            .balance_of(payee)
            .unwrap_or_else(|| self.balance(payee));
        let credited = payee_before.checked_add(price).ok_or_else(|| {
            LedgerError::InvalidInput(format!("balance overflow for {}", payee.short()))
        })?;
        changes.push(StateChange::SetBalance {
            id: *payee,
            balance: credited,
        });

        Ok(())
    }

    /// Farmer creates a new batch in `Planted`
    pub fn plan_plant(
        &self,
        registry: &IdentityRegistry,
        caller: &ParticipantId,
        quantity: u64,
        now: Timestamp,
    ) -> Result<ChangeSet, LedgerError> {
        registry.require_role(caller, Role::Farmer)?;
        if quantity == 0 {
            return Err(LedgerError::InvalidInput(
                "quantity must be positive".to_string(),
            ));
        }

        let batch = SoybeanBatch::planted(self.next_id(), quantity, *caller, now);
        Ok(vec![StateChange::PutBatch(batch)].into())
    }

    /// The batch's own farmer harvests it and names the farmer→processor price
    pub fn plan_harvest(
        &self,
        registry: &IdentityRegistry,
        caller: &ParticipantId,
        batch_id: BatchId,
        price: Amount,
        now: Timestamp,
    ) -> Result<ChangeSet, LedgerError> {
        registry.require_role(caller, Role::Farmer)?;
        let current = self.existing(batch_id)?;
        Self::require_state(current, BatchState::Planted)?;
        Self::require_stage_owner(caller, &current.farmer)?;

        let mut batch = current.clone();
        batch.prices[PriceStage::FarmerToProcessor.index()] = price;
        batch.advance(BatchState::Harvested, now);
        Ok(vec![StateChange::PutBatch(batch)].into())
    }

    /// A processor takes the harvested batch, paying the farmer
    pub fn plan_process(
        &self,
        registry: &IdentityRegistry,
        caller: &ParticipantId,
        batch_id: BatchId,
        product: &str,
        value: Amount,
        now: Timestamp,
    ) -> Result<ChangeSet, LedgerError> {
        registry.require_role(caller, Role::Processor)?;
        let current = self.existing(batch_id)?;
        Self::require_state(current, BatchState::Harvested)?;

        let mut changes = ChangeSet::new();
        let price = current.price(PriceStage::FarmerToProcessor);
        self.settle(&mut changes, caller, &current.farmer, price, value)?;

        let mut batch = current.clone();
        batch.processor = *caller;
        batch.product = product.to_string();
        batch.advance(BatchState::Processed, now);
        changes.push(StateChange::PutBatch(batch));
        Ok(changes)
    }

    /// The batch's own processor packs it and names the processor→distributor price
    pub fn plan_pack(
        &self,
        registry: &IdentityRegistry,
        caller: &ParticipantId,
        batch_id: BatchId,
        price: Amount,
        now: Timestamp,
    ) -> Result<ChangeSet, LedgerError> {
        registry.require_role(caller, Role::Processor)?;
        let current = self.existing(batch_id)?;
        Self::require_state(current, BatchState::Processed)?;
        Self::require_stage_owner(caller, &current.processor)?;

        let mut batch = current.clone();
        batch.prices[PriceStage::ProcessorToDistributor.index()] = price;
        batch.advance(BatchState::Packed, now);
        Ok(vec![StateChange::PutBatch(batch)].into())
    }

    /// A distributor buys the packed batch from the processor and lists it
    /// for sale at `price`
    pub fn plan_sell(
        &self,
        registry: &IdentityRegistry,
        caller: &ParticipantId,
        batch_id: BatchId,
        price: Amount,
        value: Amount,
        now: Timestamp,
    ) -> Result<ChangeSet, LedgerError> {
        registry.require_role(caller, Role::Distributor)?;
        let current = self.existing(batch_id)?;
        Self::require_state(current, BatchState::Packed)?;

        let mut changes = ChangeSet::new();
        let owed = current.price(PriceStage::ProcessorToDistributor);
        self.settle(&mut changes, caller, &current.processor, owed, value)?;

        let mut batch = current.clone();
        batch.distributor = *caller;
        batch.prices[PriceStage::DistributorToRetailer.index()] = price;
        batch.advance(BatchState::ForSale, now);
        changes.push(StateChange::PutBatch(batch));
        Ok(changes)
    }

    /// A retailer buys the listed batch, paying the distributor
    pub fn plan_buy(
        &self,
        registry: &IdentityRegistry,
        caller: &ParticipantId,
        batch_id: BatchId,
        value: Amount,
        now: Timestamp,
    ) -> Result<ChangeSet, LedgerError> {
        registry.require_role(caller, Role::Retailer)?;
        let current = self.existing(batch_id)?;
        Self::require_state(current, BatchState::ForSale)?;

        let mut changes = ChangeSet::new();
        let price = current.price(PriceStage::DistributorToRetailer);
        self.settle(&mut changes, caller, &current.distributor, price, value)?;

        let mut batch = current.clone();
        batch.retailer = *caller;
        batch.advance(BatchState::Sold, now);
        changes.push(StateChange::PutBatch(batch));
        Ok(changes)
    }

    /// Apply a committed change; registry changes are ignored
    pub fn apply(&mut self, change: &StateChange) {
        match change {
            StateChange::PutBatch(batch) => match usize::try_from(batch.id) {
                Ok(id) if id >= 1 && id <= self.batches.len() => {
                    self.batches[id - 1] = batch.clone();
                }
                _ => self.batches.push(batch.clone()),
            },
            StateChange::SetBalance { id, balance } => {
                self.balances.insert(*id, *balance);
            }
            StateChange::PutParticipant(_)
            | StateChange::AppendAddress(_)
            | StateChange::SetOwner(_) => {}
        }
    }

    /// Batches currently in `state`
    pub fn in_state(&self, state: BatchState) -> Vec<&SoybeanBatch> {
        self.batches.iter().filter(|b| b.state == state).collect()
    }

    /// Batches `id` took part in at any stage
    pub fn involving(&self, id: &ParticipantId) -> Vec<&SoybeanBatch> {
        self.batches.iter().filter(|b| b.involves(id)).collect()
    }
}
