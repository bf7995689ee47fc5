/// Run orchestration.
///
/// Wires the environment, run configuration, chain client, submitter and operations into an
/// `AccountScheduler` and drives it to completion.
use anyhow::Result;
use log::info;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::common::accounts::load_accounts;
use crate::common::alert::Alert;
use crate::common::chain::{ChainClient, EthersClient};
use crate::common::constants::Env;
use crate::common::execution::{SubmitterConfig, TransactionSubmitter};
use crate::cycle::config::{OperationKind, RunConfig, UnswapAmount};
use crate::cycle::operations::{Operations, Venue};
use crate::cycle::pipeline::AccountTask;
use crate::cycle::scheduler::{AccountScheduler, RunSummary, SchedulerConfig};

/// Builds the account task for the configured operation.
pub fn build_task(operations: &Operations, operation: &OperationKind) -> Arc<dyn AccountTask> {
    match operation.clone() {
        OperationKind::Swap { amount } => Arc::new(operations.swap(amount)),
        OperationKind::Unswap { amount } => {
            Arc::new(operations.unswap(UnswapAmount::Range(amount)))
        }
        OperationKind::SwapUnswap { amount, unswap } => {
            Arc::new(operations.swap_unswap(amount, unswap))
        }
        OperationKind::AddLiquidity { native } => Arc::new(operations.add_liquidity(native)),
        OperationKind::RemoveLiquidity { amount } => {
            Arc::new(operations.remove_liquidity(amount))
        }
        OperationKind::All {
            swap,
            unswap,
            add_native,
            remove,
        } => Arc::new(operations.full_cycle(swap, unswap, add_native, remove)),
    }
}

/// Runs `config` for every configured account against `client`.
///
/// # Parameters
/// * `env`: &Env - Environment (keys, chain id, explorer).
/// * `config`: RunConfig - Validated run parameters.
/// * `client`: Arc<dyn ChainClient> - Chain access.
/// * `alert`: Arc<Alert> - Notification sink.
/// * `cancel`: &CancellationToken - Stops the run at the next wait point.
pub async fn run_with_client(
    env: &Env,
    config: RunConfig,
    client: Arc<dyn ChainClient>,
    alert: Arc<Alert>,
    cancel: &CancellationToken,
) -> Result<RunSummary> {
    config.validate()?;
    let accounts = load_accounts(&env.private_keys, env.chain_id)?;

    let mut submitter_config = SubmitterConfig::new(env.chain_id);
    submitter_config.max_attempts = config.max_attempts;
    submitter_config.initial_gas_price = config.initial_gas_price;
    submitter_config.explorer_url = env.explorer_url.clone();
    let submitter = Arc::new(TransactionSubmitter::new(client, submitter_config));

    let operations = Operations::new(Venue::from_config(&config), submitter, &config);
    let task = build_task(&operations, &config.operation);

    let mut scheduler_config = SchedulerConfig::new(config.mode);
    scheduler_config.after_success = config.account_pacing;

    let mut scheduler = AccountScheduler::new(accounts, task, scheduler_config, alert.clone())?;
    let summary = scheduler.run(cancel).await?;

    alert
        .send_summary(&format!("[{}] {}", config.operation.label(), summary))
        .await;
    Ok(summary)
}

/// Runs `config` against the node named in the environment.
pub async fn run_cycle_strategy(
    env: &Env,
    config: RunConfig,
    cancel: &CancellationToken,
) -> Result<RunSummary> {
    info!(
        "Operation {} on {} ({:?}), slippage {}, chain {} via {}",
        config.operation.label(),
        config.token.symbol,
        config.token.token,
        config.slippage,
        env.chain_id,
        env.rpc_url
    );
    let client: Arc<dyn ChainClient> = Arc::new(EthersClient::new(env.rpc_url.clone())?);
    let alert = Arc::new(Alert::new(env)?);
    run_with_client(env, config, client, alert, cancel).await
}
