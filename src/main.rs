//! swapcycle - multi-account router automation
use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use dotenv::dotenv;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use swapcycle::common::constants::*;
use swapcycle::common::gas::parse_gwei;
use swapcycle::common::utils::{setup_logger, to_base_units, Pacing};
use swapcycle::cycle::config::{
    AmountRange, LiquidityAmount, OperationKind, RunConfig, TokenSelection,
};
use swapcycle::cycle::pipeline::Percent;
use swapcycle::cycle::scheduler::ScheduleMode;
use swapcycle::cycle::strategy::run_cycle_strategy;

#[derive(Parser, Debug)]
#[command(author, version, about = "Swap and liquidity cycles across many accounts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Token symbol from the built-in table (NXS, NEXI, AIE)
    #[arg(long, global = true, default_value = "NXS")]
    token: String,

    /// Explicit token address, used instead of the built-in table
    #[arg(long, global = true, requires = "lp_token")]
    token_address: Option<String>,

    /// LP pair address for --token-address
    #[arg(long, global = true, requires = "token_address")]
    lp_token: Option<String>,

    /// Keep cycling through the accounts until interrupted
    #[arg(long = "loop", global = true)]
    run_loop: bool,

    /// Slippage tolerance in percent
    #[arg(long, global = true, default_value_t = DEFAULT_SLIPPAGE_PERCENT)]
    slippage: f64,

    /// Seconds added to the latest block timestamp for router deadlines
    #[arg(long, global = true, default_value_t = DEFAULT_DEADLINE_OFFSET_SECS)]
    deadline_offset: u64,

    /// Broadcast attempts per transaction, 0 for no limit
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_SEND_ATTEMPTS)]
    max_attempts: usize,

    /// Starting gas price in gwei instead of the node's suggestion
    #[arg(long, global = true)]
    gas_price: Option<String>,

    /// Minimum pause after an account, in seconds
    #[arg(long, global = true, default_value_t = 5)]
    min_delay: u64,

    /// Maximum pause after an account, in seconds
    #[arg(long, global = true, default_value_t = 15)]
    max_delay: u64,

    /// Print the run summary as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Swap a random native amount for the token
    Swap {
        #[arg(long)]
        min: f64,
        #[arg(long)]
        max: f64,
    },
    /// Swap a random token amount back to the native currency
    Unswap {
        #[arg(long)]
        min: f64,
        #[arg(long)]
        max: f64,
    },
    /// Swap, then sell back a share of the received token
    SwapUnswap {
        #[arg(long)]
        min: f64,
        #[arg(long)]
        max: f64,
        /// Percentage of the quoted swap output to sell back
        #[arg(long, default_value_t = 50.0)]
        unswap_percent: f64,
    },
    /// Add native + token liquidity
    AddLiquidity {
        /// Native amount to deposit
        #[arg(long)]
        amount: f64,
    },
    /// Redeem LP tokens
    RemoveLiquidity {
        /// Percentage of the LP balance to redeem
        #[arg(long, conflicts_with = "amount")]
        percent: Option<f64>,
        /// Exact LP amount to redeem
        #[arg(long)]
        amount: Option<f64>,
    },
    /// Swap, unswap, add liquidity and remove liquidity in one cycle
    All {
        #[arg(long)]
        min: f64,
        #[arg(long)]
        max: f64,
        #[arg(long, default_value_t = 50.0)]
        unswap_percent: f64,
        /// Native amount to deposit as liquidity
        #[arg(long)]
        add_amount: f64,
        #[arg(long, default_value_t = 50.0)]
        remove_percent: f64,
    },
}

impl Cli {
    fn operation(&self) -> Result<OperationKind> {
        let operation = match &self.command {
            Command::Swap { min, max } => OperationKind::Swap {
                amount: AmountRange::new(*min, *max)?,
            },
            Command::Unswap { min, max } => OperationKind::Unswap {
                amount: AmountRange::new(*min, *max)?,
            },
            Command::SwapUnswap {
                min,
                max,
                unswap_percent,
            } => OperationKind::SwapUnswap {
                amount: AmountRange::new(*min, *max)?,
                unswap: Percent::from_percent(*unswap_percent)?,
            },
            Command::AddLiquidity { amount } => OperationKind::AddLiquidity {
                native: AmountRange::fixed(*amount)?,
            },
            Command::RemoveLiquidity { percent, amount } => {
                let amount = match (percent, amount) {
                    (Some(p), None) => LiquidityAmount::Share(Percent::from_percent(*p)?),
                    (None, Some(a)) => LiquidityAmount::Fixed(to_base_units(*a)?),
                    _ => bail!("remove-liquidity needs exactly one of --percent or --amount"),
                };
                OperationKind::RemoveLiquidity { amount }
            }
            Command::All {
                min,
                max,
                unswap_percent,
                add_amount,
                remove_percent,
            } => OperationKind::All {
                swap: AmountRange::new(*min, *max)?,
                unswap: Percent::from_percent(*unswap_percent)?,
                add_native: AmountRange::fixed(*add_amount)?,
                remove: Percent::from_percent(*remove_percent)?,
            },
        };
        Ok(operation)
    }

    fn run_config(&self) -> Result<RunConfig> {
        let token = match (&self.token_address, &self.lp_token) {
            (Some(token), Some(lp)) => TokenSelection::custom(&self.token, token, lp)?,
            _ => TokenSelection::builtin(&self.token)?,
        };
        let mode = if self.run_loop {
            ScheduleMode::Continuous
        } else {
            ScheduleMode::SinglePass
        };

        let mut config = RunConfig::new(self.operation()?, token, mode)?;
        config.slippage = Percent::from_percent(self.slippage)?;
        config.deadline_offset = self.deadline_offset;
        config.max_attempts = match self.max_attempts {
            0 => None,
            n => Some(n),
        };
        config.initial_gas_price = match &self.gas_price {
            Some(gwei) => Some(parse_gwei(gwei)?),
            None => None,
        };
        if self.min_delay > self.max_delay {
            bail!("--min-delay is larger than --max-delay");
        }
        config.account_pacing = Pacing::secs(self.min_delay, self.max_delay);
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let env = Env::new()?;
    setup_logger(env.debug || cli.verbose)?;
    let config = cli.run_config()?;

    info!("{}", format!("Starting {}", PROJECT_NAME).bold());

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping at the next wait point");
            ctrl_c.cancel();
        }
    });

    let summary = run_cycle_strategy(&env, config, &cancel).await?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}
