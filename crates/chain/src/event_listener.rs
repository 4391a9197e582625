//! New-head subscription used as the keeper's primary trigger.

use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::fmt::Debug;
use std::pin::Pin;
use tracing::info;

use crate::error::{ChainError, ChainResult};

/// Stream of block numbers. Ends when the connection drops.
pub type BlockStream = Pin<Box<dyn Stream<Item = u64> + Send>>;

/// Source of new-block notifications.
#[async_trait]
pub trait HeadSubscriber: Send + Sync + Debug {
    async fn subscribe_new_heads(&self) -> ChainResult<BlockStream>;
}

/// WebSocket `newHeads` listener.
#[derive(Debug, Clone)]
pub struct BlockListener {
    ws_url: String,
}

impl BlockListener {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }
}

#[async_trait]
impl HeadSubscriber for BlockListener {
    async fn subscribe_new_heads(&self) -> ChainResult<BlockStream> {
        let ws = WsConnect::new(&self.ws_url);
        let provider = ProviderBuilder::new()
            .on_ws(ws)
            .await
            .map_err(|e| ChainError::Rpc(format!("websocket connect: {e}")))?;

        let sub = provider.subscribe_blocks().await?;
        info!(ws_url = %self.ws_url, "Subscribed to new block headers");

        // The provider owns the socket; it lives in the stream state.
        let block_stream = futures::stream::unfold(
            (provider, sub.into_stream()),
            |(provider, mut stream)| async move {
                stream
                    .next()
                    .await
                    .map(|header| (header.number, (provider, stream)))
            },
        );

        Ok(Box::pin(block_stream))
    }
}
