use crate::id::ParticipantId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Batch identifier, assigned from 1 upwards
pub type BatchId = u64;

/// Value moved between participant balances
pub type Amount = u128;

/// Wall-clock seconds since the Unix epoch, 0 when not yet recorded
pub type Timestamp = u64;

/// Number of recorded transitions (Planted through Sold)
pub const STAGE_COUNT: usize = 6;

/// Lifecycle state of a batch.
///
/// Transitions only move forward, one step at a time, from `Planted` to
/// `Sold`. `Received` is kept as a terminal marker; no transition reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum BatchState {
    #[default]
    Planted,
    Harvested,
    Processed,
    Packed,
    ForSale,
    Sold,
    Received,
}

impl BatchState {
    pub const ALL: [BatchState; 7] = [
        BatchState::Planted,
        BatchState::Harvested,
        BatchState::Processed,
        BatchState::Packed,
        BatchState::ForSale,
        BatchState::Sold,
        BatchState::Received,
    ];

    /// Position in the lifecycle; also the index into `SoybeanBatch::timestamps`
    pub fn ordinal(&self) -> usize {
        *self as usize
    }

    pub fn from_ordinal(ordinal: usize) -> Option<BatchState> {
        BatchState::ALL.get(ordinal).copied()
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchState::Planted => "Planted",
            BatchState::Harvested => "Harvested",
            BatchState::Processed => "Processed",
            BatchState::Packed => "Packed",
            BatchState::ForSale => "ForSale",
            BatchState::Sold => "Sold",
            BatchState::Received => "Received",
        };
        f.write_str(name)
    }
}

/// The three priced hand-overs of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceStage {
    /// Set at harvest, paid by the processor to the farmer
    FarmerToProcessor,
    /// Set at packing, paid by the distributor to the processor
    ProcessorToDistributor,
    /// Set when listed for sale, paid by the retailer to the distributor
    DistributorToRetailer,
}

impl PriceStage {
    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// A tracked unit of soybeans moving through the supply chain
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SoybeanBatch {
    pub id: BatchId,
    pub quantity: u64,
    pub product: String,
    pub state: BatchState,
    pub farmer: ParticipantId,
    pub processor: ParticipantId,
    pub distributor: ParticipantId,
    pub retailer: ParticipantId,
    pub prices: [Amount; 3],
    pub timestamps: [Timestamp; STAGE_COUNT],
}

impl SoybeanBatch {
    /// A freshly planted batch
    pub fn planted(id: BatchId, quantity: u64, farmer: ParticipantId, now: Timestamp) -> Self {
        let mut batch = Self {
            id,
            quantity,
            farmer,
            ..Default::default()
        };
        batch.timestamps[BatchState::Planted.ordinal()] = now;
        batch
    }

    pub fn price(&self, stage: PriceStage) -> Amount {
        self.prices[stage.index()]
    }

    /// When the batch entered `state`, if it has
    pub fn reached_at(&self, state: BatchState) -> Option<Timestamp> {
        match self.timestamps.get(state.ordinal()) {
            Some(&ts) if state <= self.state => Some(ts),
            _ => None,
        }
    }

    /// Move to `state` and stamp the transition
    pub(crate) fn advance(&mut self, state: BatchState, now: Timestamp) {
        self.state = state;
        if let Some(slot) = self.timestamps.get_mut(state.ordinal()) {
            *slot = now;
        }
    }

    /// The party responsible for the batch at `state`
    pub fn party_at(&self, state: BatchState) -> ParticipantId {
        match state {
            BatchState::Planted | BatchState::Harvested => self.farmer,
            BatchState::Processed | BatchState::Packed => self.processor,
            BatchState::ForSale => self.distributor,
            BatchState::Sold | BatchState::Received => self.retailer,
        }
    }

    /// Whether `id` took part in any recorded stage
    pub fn involves(&self, id: &ParticipantId) -> bool {
        !id.is_zero()
            && [self.farmer, self.processor, self.distributor, self.retailer].contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_states_are_ordered() {
        for pair in BatchState::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(BatchState::default(), BatchState::Planted);
        assert_eq!(BatchState::Sold.ordinal(), STAGE_COUNT - 1);
    }

    #[test]
    fn test_ordinals() {
        for (i, state) in BatchState::ALL.iter().enumerate() {
            assert_eq!(state.ordinal(), i);
            assert_eq!(BatchState::from_ordinal(i), Some(*state));
        }
        assert_eq!(BatchState::from_ordinal(7), None);
    }

    #[test]
    fn test_planted_batch() {
        let farmer = ParticipantId::derive(&[b"farmer"]);
        let batch = SoybeanBatch::planted(1, 100, farmer, 1_700_000_000);

        assert_eq!(batch.state, BatchState::Planted);
        assert_eq!(batch.quantity, 100);
        assert_eq!(batch.timestamps[0], 1_700_000_000);
        assert_eq!(batch.timestamps[1..], [0; 5]);
        assert!(batch.processor.is_zero());
        assert!(batch.product.is_empty());
        assert_eq!(batch.party_at(batch.state), farmer);
    }

    #[test]
    fn test_reached_at_ignores_future_stages() {
        let farmer = ParticipantId::derive(&[b"farmer"]);
        let mut batch = SoybeanBatch::planted(1, 10, farmer, 100);
        batch.advance(BatchState::Harvested, 200);

        assert_eq!(batch.reached_at(BatchState::Planted), Some(100));
        assert_eq!(batch.reached_at(BatchState::Harvested), Some(200));
        assert_eq!(batch.reached_at(BatchState::Processed), None);
        assert_eq!(batch.reached_at(BatchState::Received), None);
    }

    #[test]
    fn test_involves() {
        let farmer = ParticipantId::derive(&[b"farmer"]);
        let other = ParticipantId::derive(&[b"other"]);
        let batch = SoybeanBatch::planted(1, 10, farmer, 0);

        assert!(batch.involves(&farmer));
        assert!(!batch.involves(&other));
        assert!(!batch.involves(&ParticipantId::ZERO));
    }
}
