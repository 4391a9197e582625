//! Deployment configuration: endpoints, keys and contract addresses.
//!
//! Loaded either from environment variables (`.env` is read by the binary)
//! or from a TOML file whose string values may reference `${VAR}`.

use alloy::primitives::Address;
use anyhow::{Context, Result};
use lbkeeper_chain::GasSettings;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::info;

/// Monad mainnet.
pub const DEFAULT_CHAIN_ID: u64 = 143;
const DEFAULT_RPC_HTTP: &str = "https://rpc.monad.xyz";
const DEFAULT_RPC_WS: &str = "wss://rpc.monad.xyz";

/// Deployment file as written on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentFile {
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default)]
    pub rpc: RpcConfig,
    pub contracts: ContractsConfig,
    /// Usually `${PRIVATE_KEY}`
    pub private_key: String,
    #[serde(default)]
    pub gas: GasSettings,
}

fn default_chain_id() -> u64 {
    DEFAULT_CHAIN_ID
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_http")]
    pub http: String,
    #[serde(default = "default_rpc_ws")]
    pub ws: String,
}

fn default_rpc_http() -> String {
    DEFAULT_RPC_HTTP.to_string()
}
fn default_rpc_ws() -> String {
    DEFAULT_RPC_WS.to_string()
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            http: default_rpc_http(),
            ws: default_rpc_ws(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsConfig {
    pub pool: String,
    pub router: String,
}

/// Signing key that never prints.
#[derive(Clone)]
pub struct PrivateKey(String);

impl PrivateKey {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(***)")
    }
}

/// Resolved deployment.
#[derive(Debug, Clone)]
pub struct DeploymentConfig {
    pub chain_id: u64,
    pub rpc_http: String,
    pub rpc_ws: String,
    pub pool: Address,
    pub router: Address,
    pub private_key: PrivateKey,
    pub gas: GasSettings,
}

impl DeploymentConfig {
    /// Resolve from environment variables.
    ///
    /// `PRIVATE_KEY`, `POOL_ADDRESS` and `ROUTER_ADDRESS` are required;
    /// everything else has a default.
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        let mut gas = GasSettings::default();
        if let Some(pricing) = var("GAS_PRICING") {
            gas.pricing = toml::Value::String(pricing.to_lowercase())
                .try_into()
                .context("GAS_PRICING must be `legacy` or `eip1559`")?;
        }
        if let Some(max_fee) = var("MAX_FEE_GWEI") {
            gas.max_fee_gwei = max_fee.parse().context("MAX_FEE_GWEI")?;
        }
        if let Some(tip) = var("PRIORITY_FEE_GWEI") {
            gas.priority_fee_gwei = tip.parse().context("PRIORITY_FEE_GWEI")?;
        }
        if let Some(limit) = var("GAS_LIMIT") {
            gas.gas_limit = limit.parse().context("GAS_LIMIT")?;
        }

        let file = DeploymentFile {
            chain_id: match var("CHAIN_ID") {
                Some(id) => id.parse().context("CHAIN_ID")?,
                None => DEFAULT_CHAIN_ID,
            },
            rpc: RpcConfig {
                http: var("RPC_URL").unwrap_or_else(default_rpc_http),
                ws: var("WS_URL").unwrap_or_else(default_rpc_ws),
            },
            contracts: ContractsConfig {
                pool: var("POOL_ADDRESS").context("POOL_ADDRESS not set")?,
                router: var("ROUTER_ADDRESS").context("ROUTER_ADDRESS not set")?,
            },
            private_key: var("PRIVATE_KEY").context("PRIVATE_KEY not set")?,
            gas,
        };

        Self::resolve(file)
    }

    /// Load a TOML deployment file, expanding `${VAR}` references.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading deployment file {}", path.display()))?;
        let file: DeploymentFile = toml::from_str(&content)
            .with_context(|| format!("parsing deployment file {}", path.display()))?;
        Self::resolve(file)
    }

    /// `DEPLOYMENT_FILE` if set, otherwise the environment.
    pub fn load() -> Result<Self> {
        match std::env::var("DEPLOYMENT_FILE") {
            Ok(path) => Self::from_file(path),
            Err(_) => Self::from_env(),
        }
    }

    fn resolve(file: DeploymentFile) -> Result<Self> {
        let parse_address = |label: &str, raw: &str| -> Result<Address> {
            expand_env(raw)
                .trim()
                .parse::<Address>()
                .with_context(|| format!("invalid {label} address `{raw}`"))
        };

        let private_key = expand_env(&file.private_key);
        anyhow::ensure!(
            !private_key.contains("${"),
            "private key references an unset environment variable"
        );

        Ok(Self {
            chain_id: file.chain_id,
            rpc_http: expand_env(&file.rpc.http),
            rpc_ws: expand_env(&file.rpc.ws),
            pool: parse_address("pool", &file.contracts.pool)?,
            router: parse_address("router", &file.contracts.router)?,
            private_key: PrivateKey(private_key),
            gas: file.gas,
        })
    }

    pub fn log_config(&self) {
        info!(
            chain_id = self.chain_id,
            rpc_http = %self.rpc_http,
            rpc_ws = %self.rpc_ws,
            pool = %self.pool,
            router = %self.router,
            gas_pricing = ?self.gas.pricing,
            max_fee_gwei = self.gas.max_fee_gwei,
            "Deployment configuration loaded"
        );
    }
}

/// Expand `${VAR_NAME}` patterns with environment variable values.
/// Unset variables are left as written.
pub fn expand_env(s: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}").expect("static pattern");
    re.replace_all(s, |caps: &regex_lite::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const POOL: &str = "0x0594c7505A667933c7d8CB1064BcA58A2211a3be";
    const ROUTER: &str = "0x18556DA13313f3532c54711497A8FedAC273220E";

    #[test]
    fn test_expand_env() {
        // Unique names: tests run in parallel within the process.
        std::env::set_var("LBK_DEPLOY_TEST_VAR", "test_value");
        assert_eq!(expand_env("${LBK_DEPLOY_TEST_VAR}"), "test_value");
        assert_eq!(
            expand_env("prefix_${LBK_DEPLOY_TEST_VAR}_suffix"),
            "prefix_test_value_suffix"
        );
        assert_eq!(expand_env("no_vars"), "no_vars");
        assert_eq!(expand_env("${LBK_DEPLOY_UNSET_VAR}"), "${LBK_DEPLOY_UNSET_VAR}");
        std::env::remove_var("LBK_DEPLOY_TEST_VAR");
    }

    #[test]
    fn test_resolve_file() {
        std::env::set_var("LBK_DEPLOY_TEST_KEY", "0xabc");
        let file: DeploymentFile = toml::from_str(&format!(
            r#"
            private_key = "${{LBK_DEPLOY_TEST_KEY}}"

            [contracts]
            pool = "{POOL}"
            router = "{ROUTER}"

            [gas]
            max_fee_gwei = 100.0
            "#
        ))
        .unwrap();

        let config = DeploymentConfig::resolve(file).unwrap();
        assert_eq!(config.chain_id, DEFAULT_CHAIN_ID);
        assert_eq!(config.rpc_http, DEFAULT_RPC_HTTP);
        assert_eq!(config.pool, POOL.parse::<Address>().unwrap());
        assert_eq!(config.private_key.expose(), "0xabc");
        assert_eq!(config.gas.max_fee_gwei, 100.0);
        assert_eq!(config.gas.priority_fee_gwei, 2.0);
        assert!(!format!("{config:?}").contains("0xabc"));
        std::env::remove_var("LBK_DEPLOY_TEST_KEY");
    }

    #[test]
    fn test_resolve_rejects_unset_key_and_bad_address() {
        let file = DeploymentFile {
            chain_id: DEFAULT_CHAIN_ID,
            rpc: RpcConfig::default(),
            contracts: ContractsConfig {
                pool: POOL.to_string(),
                router: ROUTER.to_string(),
            },
            private_key: "${LBK_DEPLOY_MISSING_KEY}".to_string(),
            gas: GasSettings::default(),
        };
        assert!(DeploymentConfig::resolve(file.clone()).is_err());

        let bad_pool = DeploymentFile {
            private_key: "0x01".to_string(),
            contracts: ContractsConfig {
                pool: "not-an-address".to_string(),
                router: ROUTER.to_string(),
            },
            ..file
        };
        assert!(DeploymentConfig::resolve(bad_pool).is_err());
    }
}
