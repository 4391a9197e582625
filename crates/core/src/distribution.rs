//! Splits capital across the bins of a range.
//!
//! Bins below the center take one token, bins above take the other, and
//! the center takes both. Each funded token's shares sum to exactly
//! [`UNIT`]; the rounding remainder goes to the highest bin taking it.

use alloy::primitives::U256;
use lbkeeper_chain::BinId;
use smallvec::SmallVec;

use crate::config::Orientation;
use crate::error::DistributionError;

/// Fixed-point 1.0 used by the router for distributions.
pub const UNIT: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// Largest valid bin id (`uint24`).
pub const MAX_BIN_ID: BinId = (1 << 24) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistributionEntry {
    /// Offset from the center bin.
    pub delta: i64,
    pub share_x: U256,
    pub share_y: U256,
}

/// Ordered (ascending bin id) per-bin shares around `center`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    pub center: BinId,
    pub entries: SmallVec<[DistributionEntry; 3]>,
}

impl Distribution {
    pub fn bins(&self) -> Vec<BinId> {
        self.entries
            .iter()
            .map(|e| (self.center as i64 + e.delta) as BinId)
            .collect()
    }

    pub fn delta_ids(&self) -> Vec<i64> {
        self.entries.iter().map(|e| e.delta).collect()
    }

    pub fn distribution_x(&self) -> Vec<U256> {
        self.entries.iter().map(|e| e.share_x).collect()
    }

    pub fn distribution_y(&self) -> Vec<U256> {
        self.entries.iter().map(|e| e.share_y).collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DistributionCalculator {
    half_width: u32,
    orientation: Orientation,
}

impl DistributionCalculator {
    pub fn new(half_width: u32, orientation: Orientation) -> Self {
        Self {
            half_width,
            orientation,
        }
    }

    /// Which tokens a bin at `delta` from the center accepts, as `(x, y)`.
    fn accepts(&self, delta: i64) -> (bool, bool) {
        match (delta.signum(), self.orientation) {
            (0, _) => (true, true),
            (1, Orientation::XAbove) | (-1, Orientation::YAbove) => (true, false),
            _ => (false, true),
        }
    }

    pub fn compute(
        &self,
        center: BinId,
        amount_x: U256,
        amount_y: U256,
    ) -> Result<Distribution, DistributionError> {
        let hw = self.half_width as i64;
        let has_x = !amount_x.is_zero();
        let has_y = !amount_y.is_zero();

        // (delta, takes_x, takes_y) for every funded bin inside the id space
        let active: SmallVec<[(i64, bool, bool); 3]> = (-hw..=hw)
            .filter(|delta| {
                let id = center as i64 + delta;
                (0..=MAX_BIN_ID as i64).contains(&id)
            })
            .filter_map(|delta| {
                let (x, y) = self.accepts(delta);
                let takes_x = x && has_x;
                let takes_y = y && has_y;
                (takes_x || takes_y).then_some((delta, takes_x, takes_y))
            })
            .collect();

        if active.is_empty() {
            return Err(DistributionError::NoActiveBins);
        }
        if !active.iter().any(|(delta, _, _)| *delta == 0) {
            return Err(DistributionError::CenterExcluded { center });
        }

        let shares_x = split_unit(active.iter().filter(|(_, x, _)| *x).count());
        let shares_y = split_unit(active.iter().filter(|(_, _, y)| *y).count());
        let (mut next_x, mut next_y) = (0, 0);

        let entries = active
            .iter()
            .map(|&(delta, takes_x, takes_y)| {
                let share_x = if takes_x {
                    next_x += 1;
                    shares_x(next_x)
                } else {
                    U256::ZERO
                };
                let share_y = if takes_y {
                    next_y += 1;
                    shares_y(next_y)
                } else {
                    U256::ZERO
                };
                DistributionEntry {
                    delta,
                    share_x,
                    share_y,
                }
            })
            .collect();

        Ok(Distribution { center, entries })
    }
}

/// Share for the n-th (1-based) of `count` bins; the last takes the remainder.
fn split_unit(count: usize) -> impl Fn(usize) -> U256 {
    let count = count.max(1);
    let each = UNIT / U256::from(count);
    move |n| {
        if n == count {
            UNIT - each * U256::from(count - 1)
        } else {
            each
        }
    }
}
