//! Pool metadata and active-bin reads.

use alloy::primitives::Address;
use lbkeeper_chain::{BinId, ChainClient, ChainResult, TokenInfo};
use std::sync::Arc;
use tracing::{info, warn};

use crate::types::{PoolState, TokenSide};

/// Reads pool state through the [`ChainClient`]. Does not retry; callers
/// wrap calls in a [`crate::RetryPolicy`].
#[derive(Debug, Clone)]
pub struct PoolObserver {
    client: Arc<dyn ChainClient>,
    pool: Address,
    native_symbols: Vec<String>,
}

impl PoolObserver {
    pub fn new(client: Arc<dyn ChainClient>, pool: Address, native_symbols: Vec<String>) -> Self {
        Self {
            client,
            pool,
            native_symbols,
        }
    }

    pub fn pool(&self) -> Address {
        self.pool
    }

    /// Full pool state: pair metadata and active bin, then token metadata.
    pub async fn load(&self) -> ChainResult<PoolState> {
        let (metadata, active_bin) = tokio::try_join!(
            self.client.pool_metadata(self.pool),
            self.client.active_bin(self.pool)
        )?;

        let (token_x, token_y) = tokio::try_join!(
            self.client.token_info(metadata.token_x),
            self.client.token_info(metadata.token_y)
        )?;

        let native_side = classify_native(&token_x, &token_y, &self.native_symbols);

        info!(
            pool = %self.pool,
            token_x = %token_x.symbol,
            token_y = %token_y.symbol,
            bin_step = metadata.bin_step,
            active_bin,
            native = ?native_side,
            "Pool loaded"
        );

        Ok(PoolState {
            pool: self.pool,
            token_x,
            token_y,
            bin_step: metadata.bin_step,
            active_bin,
            native_side,
        })
    }

    pub async fn active_bin(&self) -> ChainResult<BinId> {
        self.client.active_bin(self.pool).await
    }
}

/// Pick the wrapped-native side by symbol. X wins ties and the no-match case.
pub fn classify_native(token_x: &TokenInfo, token_y: &TokenInfo, aliases: &[String]) -> TokenSide {
    let is_native = |token: &TokenInfo| {
        aliases
            .iter()
            .any(|alias| alias.eq_ignore_ascii_case(&token.symbol))
    };

    match (is_native(token_x), is_native(token_y)) {
        (true, _) => TokenSide::X,
        (false, true) => TokenSide::Y,
        (false, false) => {
            warn!(
                token_x = %token_x.symbol,
                token_y = %token_y.symbol,
                "Neither token matches a native alias, treating X as native"
            );
            TokenSide::X
        }
    }
}
