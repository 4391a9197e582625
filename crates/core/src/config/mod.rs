//! Configuration for the keeper.
//!
//! - [`StrategyConfig`]: decision-engine constants, with named profiles
//! - [`DeploymentConfig`]: endpoints, signing key and contract addresses

mod deployment;
mod strategy;

pub use deployment::{
    expand_env, ContractsConfig, DeploymentConfig, DeploymentFile, PrivateKey, RpcConfig,
    DEFAULT_CHAIN_ID,
};
pub use strategy::{
    native_to_wei, EntryMode, ExecutionConfig, Orientation, RangeConfig, SafetyConfig,
    StrategyConfig, TimingConfig,
};
