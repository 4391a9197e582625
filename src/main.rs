//! Liquidity Book keeper
//!
//! Holds a narrow range around the active bin of one LB pool on Monad and
//! rebalances it as the price moves. Triggers:
//! - New block heads over WebSocket (reconnecting)
//! - A fallback poll interval that also drives maintenance

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lbkeeper_chain::{BlockListener, RpcChainClient, TransactionSender};
use lbkeeper_core::{Agent, DeploymentConfig, StrategyConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    // BOT_PROFILE selects a built-in profile; STRATEGY_FILE overrides it
    let strategy = StrategyConfig::load().context("loading strategy configuration")?;
    strategy.log_config();

    let deployment = DeploymentConfig::load().context("loading deployment configuration")?;
    deployment.log_config();

    let sender = Arc::new(
        TransactionSender::new(
            deployment.private_key.expose(),
            &deployment.rpc_http,
            deployment.chain_id,
            &deployment.gas,
        )
        .await?,
    );
    info!(address = %sender.address(), "Transaction sender initialized");

    let client = RpcChainClient::connect(&deployment.rpc_http, deployment.chain_id, sender)
        .await?
        .with_confirmation_timeout(strategy.execution.confirmation_timeout());
    let heads = Arc::new(BlockListener::new(deployment.rpc_ws.clone()));

    let agent = Arc::new(
        Agent::init(
            Arc::new(client),
            strategy,
            deployment.pool,
            deployment.router,
        )
        .await?,
    );
    agent.bootstrap().await?;

    info!("Starting keeper loop...");
    tokio::select! {
        result = agent.clone().run(heads) => {
            if let Err(e) = result {
                error!(error = %e, "Keeper stopped");
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            // Interrupt leaves the position in place; a restart in scan mode adopts it.
            let ledger = agent.ledger_snapshot().await;
            warn!(
                held_bins = ?ledger.held_bins(),
                total_rebalances = ledger.total_rebalances(),
                "Interrupted, exiting without withdrawal"
            );
        }
    }

    Ok(())
}

fn init_tracing() {
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,lbkeeper_core=debug,lbkeeper_chain=debug")),
        )
        .init();
}
