//! In-memory record of the current position.
//!
//! Nothing here is persisted. Per-bin amounts are not tracked; they are
//! read from the chain whenever they matter.

use chrono::{DateTime, NaiveDate, Utc};
use lbkeeper_chain::BinId;
use smallvec::SmallVec;
use std::time::Instant;

use crate::safety::SafetyCounters;
use crate::types::RebalanceReason;

/// The range the keeper currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    /// Ascending, contiguous.
    pub bins: SmallVec<[BinId; 3]>,
    pub center: BinId,
    pub last_reason: RebalanceReason,
}

/// Where the current run of standard rebalances started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoint {
    pub bin: BinId,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Ledger {
    position: Option<Position>,
    /// Bins with holdings found at startup that this run did not create.
    orphan_bins: Vec<BinId>,
    entry: Option<EntryPoint>,
    counters: SafetyCounters,
    total_rebalances: u64,
}

impl Ledger {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            position: None,
            orphan_bins: Vec::new(),
            entry: None,
            counters: SafetyCounters::new(today),
            total_rebalances: 0,
        }
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn entry(&self) -> Option<EntryPoint> {
        self.entry
    }

    pub fn counters(&self) -> &SafetyCounters {
        &self.counters
    }

    pub fn counters_mut(&mut self) -> &mut SafetyCounters {
        &mut self.counters
    }

    pub fn total_rebalances(&self) -> u64 {
        self.total_rebalances
    }

    pub fn orphan_bins(&self) -> &[BinId] {
        &self.orphan_bins
    }

    pub fn set_orphan_bins(&mut self, bins: Vec<BinId>) {
        self.orphan_bins = bins;
    }

    /// Every bin that may hold our liquidity, ascending and deduplicated.
    pub fn held_bins(&self) -> Vec<BinId> {
        let mut bins: Vec<BinId> = self
            .position
            .iter()
            .flat_map(|p| p.bins.iter().copied())
            .chain(self.orphan_bins.iter().copied())
            .collect();
        bins.sort_unstable();
        bins.dedup();
        bins
    }

    /// Liquidity was withdrawn; nothing is held until the next add lands.
    pub fn clear_position(&mut self) {
        self.position = None;
        self.orphan_bins.clear();
    }

    /// A deposit confirmed. Standard rebalances also move the entry point.
    pub fn record_rebalance(
        &mut self,
        center: BinId,
        bins: &[BinId],
        reason: RebalanceReason,
        at: DateTime<Utc>,
        now: Instant,
    ) {
        self.position = Some(Position {
            bins: bins.iter().copied().collect(),
            center,
            last_reason: reason,
        });
        if reason.is_standard() || self.entry.is_none() {
            self.entry = Some(EntryPoint { bin: center, at });
        }
        self.counters.record_success(now);
        self.total_rebalances += 1;
    }
}
