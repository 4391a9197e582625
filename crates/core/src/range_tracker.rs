//! Range-tracking state machine over active-bin samples.
//!
//! ```text
//! UNINITIALIZED ──in range──▶ IN_RANGE ◀──────┐
//!       │                       │  ▲          │
//!       └──out of range──▶ OUT_OF_RANGE ──────┘
//! ```
//!
//! Entering IN_RANGE arms the maintenance timer; leaving it disarms it.
//! A successful rebalance re-centers the tracker and returns it to
//! UNINITIALIZED.

use arrayvec::ArrayVec;
use lbkeeper_chain::BinId;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::types::{RebalanceReason, RebalanceRequest};

const WINDOW: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeStatus {
    Uninitialized,
    InRange,
    OutOfRange,
}

/// One-shot maintenance deadline.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaintenanceTimer {
    deadline: Option<Instant>,
}

impl MaintenanceTimer {
    pub fn arm(&mut self, now: Instant, interval: Duration) {
        self.deadline = Some(now + interval);
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
    /// The active bin bounced out and straight back.
    Churn,
    /// The target range still shares `overlap` bins with the current one.
    PartialOverlap { overlap: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Idle,
    Request(RebalanceRequest),
    Suppressed(Suppression),
}

#[derive(Debug, Clone)]
pub struct RangeTracker {
    half_width: u32,
    overlap_threshold: u32,
    maintenance_interval: Duration,
    center: Option<BinId>,
    status: RangeStatus,
    in_range_since: Option<Instant>,
    out_of_range_since: Option<Instant>,
    window: ArrayVec<BinId, WINDOW>,
    last_jump: u32,
    timer: MaintenanceTimer,
}

impl RangeTracker {
    pub fn new(half_width: u32, overlap_threshold: u32, maintenance_interval: Duration) -> Self {
        Self {
            half_width,
            overlap_threshold,
            maintenance_interval,
            center: None,
            status: RangeStatus::Uninitialized,
            in_range_since: None,
            out_of_range_since: None,
            window: ArrayVec::new(),
            last_jump: 0,
            timer: MaintenanceTimer::default(),
        }
    }

    pub fn center(&self) -> Option<BinId> {
        self.center
    }

    pub fn status(&self) -> RangeStatus {
        self.status
    }

    pub fn in_range_since(&self) -> Option<Instant> {
        self.in_range_since
    }

    pub fn out_of_range_since(&self) -> Option<Instant> {
        self.out_of_range_since
    }

    /// Size of the most recent active-bin move.
    pub fn last_jump(&self) -> u32 {
        self.last_jump
    }

    pub fn maintenance_deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    /// Feed one active-bin sample.
    pub fn observe(&mut self, active: BinId, now: Instant) -> Observation {
        self.push_sample(active);

        let Some(center) = self.center else {
            return Observation::Request(RebalanceRequest::new(RebalanceReason::Initial, active));
        };

        if center.abs_diff(active) <= self.half_width {
            if self.status != RangeStatus::InRange {
                self.timer.arm(now, self.maintenance_interval);
                self.in_range_since = Some(now);
                self.out_of_range_since = None;
                info!(
                    active,
                    center,
                    from = ?self.status,
                    maintenance_in_secs = self.maintenance_interval.as_secs(),
                    "Entered range"
                );
                self.status = RangeStatus::InRange;
            }
            return Observation::Idle;
        }

        if self.status != RangeStatus::OutOfRange {
            self.timer.disarm();
            self.out_of_range_since = Some(now);
            self.in_range_since = None;
            info!(active, center, from = ?self.status, "Left range");
            self.status = RangeStatus::OutOfRange;
        }

        if self.is_churn() {
            debug!(window = ?self.window.as_slice(), "Churn, holding position");
            return Observation::Suppressed(Suppression::Churn);
        }

        let overlap = range_overlap(center, active, self.half_width);
        if overlap >= self.overlap_threshold {
            debug!(overlap, threshold = self.overlap_threshold, "Partial overlap, holding position");
            return Observation::Suppressed(Suppression::PartialOverlap { overlap });
        }

        Observation::Request(RebalanceRequest::new(RebalanceReason::OutOfRange, active))
    }

    /// Emit the maintenance request once the timer expires while in range.
    pub fn poll_maintenance(&mut self, now: Instant) -> Option<RebalanceRequest> {
        if self.status != RangeStatus::InRange || !self.timer.is_expired(now) {
            return None;
        }
        self.timer.disarm();
        let center = self.center?;
        info!(center, "Maintenance interval elapsed");
        Some(RebalanceRequest::new(RebalanceReason::Maintenance, center))
    }

    /// Re-arm after a denied maintenance request.
    pub fn defer_maintenance(&mut self, now: Instant) {
        if self.status == RangeStatus::InRange {
            self.timer.arm(now, self.maintenance_interval);
        }
    }

    pub fn cancel_timers(&mut self) {
        self.timer.disarm();
    }

    /// Adopt a new center after a successful rebalance.
    pub fn recenter(&mut self, center: BinId) {
        self.center = Some(center);
        self.status = RangeStatus::Uninitialized;
        self.in_range_since = None;
        self.out_of_range_since = None;
        self.timer.disarm();
    }

    /// Forget the center (position withdrawn, nothing redeposited).
    pub fn reset(&mut self) {
        self.center = None;
        self.status = RangeStatus::Uninitialized;
        self.in_range_since = None;
        self.out_of_range_since = None;
        self.timer.disarm();
    }

    pub fn is_churn(&self) -> bool {
        is_churn(&self.window)
    }

    fn push_sample(&mut self, active: BinId) {
        if let Some(&previous) = self.window.last() {
            self.last_jump = previous.abs_diff(active);
        }
        if self.window.is_full() {
            self.window.remove(0);
        }
        self.window.push(active);
    }
}

/// `[a, b, a]` with `a != b`.
pub fn is_churn(window: &[BinId]) -> bool {
    matches!(window, [a, b, c] if a == c && a != b)
}

/// Bins shared by the ranges centered on `a` and `b`.
pub fn range_overlap(a: BinId, b: BinId, half_width: u32) -> u32 {
    (2 * half_width + 1).saturating_sub(a.abs_diff(b))
}
