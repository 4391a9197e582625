//! Liquidity Book keeper core.
//!
//! This crate holds the rebalancing decision engine:
//! - Pool observation and native-side classification
//! - Range tracking with churn and partial-overlap suppression
//! - Safety gating (daily cap, cooldown, grace, gas ceiling, balance)
//! - Bin distribution across the target range
//! - Execution with bounded retry, and the agent loop that drives it
//!
//! Chain access goes through [`lbkeeper_chain::ChainClient`].

mod agent;
pub mod config;
mod coordinator;
mod distribution;
mod error;
pub mod il;
mod ledger;
mod observer;
mod range_tracker;
mod retry;
mod safety;
mod types;

#[cfg(test)]
mod testing;

pub use agent::{Agent, TickOutcome, Trigger};
pub use config::{DeploymentConfig, EntryMode, Orientation, StrategyConfig};
pub use coordinator::{ExecutionCoordinator, RebalanceOutcome};
pub use distribution::{Distribution, DistributionCalculator, DistributionEntry, UNIT};
pub use error::{DistributionError, FatalReason, RebalanceError, RebalanceResult};
pub use ledger::{EntryPoint, Ledger, Position};
pub use observer::{classify_native, PoolObserver};
pub use range_tracker::{
    is_churn, range_overlap, MaintenanceTimer, Observation, RangeStatus, RangeTracker, Suppression,
};
pub use retry::{exponential_delay, RetryPolicy, Retryable};
pub use safety::{DenyReason, GateContext, SafetyCounters, SafetyGovernor, Verdict};
pub use types::{PoolState, RebalanceReason, RebalanceRequest, TokenSide};
