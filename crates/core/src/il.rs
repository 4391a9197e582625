//! Impermanent-loss estimate from bin movement.

use lbkeeper_chain::BinId;

/// Bin id whose price is exactly 1.
pub const REFERENCE_BIN: BinId = 1 << 23;

/// Price (Y per X) of a bin: `(1 + bin_step / 10_000)^(id - 2^23)`.
pub fn bin_price(bin: BinId, bin_step: u16) -> f64 {
    let base = 1.0 + f64::from(bin_step) / 10_000.0;
    base.powi(bin as i32 - REFERENCE_BIN as i32)
}

/// Current price over entry price.
pub fn price_ratio(entry_bin: BinId, current_bin: BinId, bin_step: u16) -> f64 {
    if entry_bin == current_bin {
        return 1.0;
    }
    // Only the difference matters; avoids overflow far from the reference.
    let base = 1.0 + f64::from(bin_step) / 10_000.0;
    base.powi(current_bin as i32 - entry_bin as i32)
}

/// Tight-range approximation in percent (negative is a loss):
/// `-0.5 * (1 / sqrt(width)) * (ratio - 1)^2 * 100`.
pub fn impermanent_loss_pct(ratio: f64, range_width: u32) -> f64 {
    if ratio <= 0.0 {
        return -100.0;
    }
    let range_factor = 1.0 / f64::from(range_width.max(1)).sqrt();
    -0.5 * range_factor * (ratio - 1.0).powi(2) * 100.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IlEstimate {
    pub price_ratio: f64,
    pub loss_pct: f64,
}

pub fn estimate(entry_bin: BinId, current_bin: BinId, bin_step: u16, range_width: u32) -> IlEstimate {
    let ratio = price_ratio(entry_bin, current_bin, bin_step);
    IlEstimate {
        price_ratio: ratio,
        loss_pct: impermanent_loss_pct(ratio, range_width),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_bin_price() {
        assert_eq!(bin_price(REFERENCE_BIN, 25), 1.0);
        let up = bin_price(REFERENCE_BIN + 1, 25);
        assert!((up - 1.0025).abs() < 1e-12);
        assert!(bin_price(REFERENCE_BIN - 1, 25) < 1.0);
    }

    #[test]
    fn test_no_move_no_loss() {
        let est = estimate(REFERENCE_BIN, REFERENCE_BIN, 25, 3);
        assert_eq!(est.price_ratio, 1.0);
        assert_eq!(est.loss_pct, 0.0);
    }

    #[test]
    fn test_loss_grows_with_distance() {
        let near = estimate(100, 102, 25, 3);
        let far = estimate(100, 110, 25, 3);
        assert!(near.loss_pct < 0.0);
        assert!(far.loss_pct < near.loss_pct);
        // symmetric enough for small moves
        let down = estimate(100, 98, 25, 3);
        assert!((down.loss_pct - near.loss_pct).abs() < 1e-3);
        assert_eq!(impermanent_loss_pct(0.0, 3), -100.0);
    }
}
