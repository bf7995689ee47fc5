/// Validated per-run parameters.
use anyhow::{bail, Result};
use ethers::types::{H160, U256};

use crate::common::constants::*;
use crate::common::utils::{random_amount, to_base_units, to_h160, Pacing};
use crate::cycle::pipeline::Percent;
use crate::cycle::scheduler::ScheduleMode;

/// Inclusive range of decimal amounts a random amount is drawn from, or one exact amount.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmountRange {
    pub min: f64,
    pub max: f64,
    /// Set for fixed amounts, which are used as given instead of drawn.
    exact: Option<U256>,
}

impl AmountRange {
    pub fn new(min: f64, max: f64) -> Result<Self> {
        if !(min.is_finite() && max.is_finite()) || min <= 0.0 || max <= 0.0 {
            bail!("amounts must be positive, got {}..{}", min, max);
        }
        if min > max {
            bail!("minimum amount {} is larger than maximum {}", min, max);
        }
        Ok(Self {
            min,
            max,
            exact: None,
        })
    }

    /// An exact amount, converted once with full 18-decimal precision.
    pub fn fixed(amount: f64) -> Result<Self> {
        let mut range = Self::new(amount, amount)?;
        let exact = to_base_units(amount)?;
        if exact.is_zero() {
            bail!("amount {} is below one base unit", amount);
        }
        range.exact = Some(exact);
        Ok(range)
    }

    /// The fixed amount, or a 4-decimal draw from the range, in base units.
    pub fn draw(&self) -> Result<U256> {
        match self.exact {
            Some(amount) => Ok(amount),
            None => to_base_units(random_amount(self.min, self.max)),
        }
    }
}

/// How much LP to redeem.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LiquidityAmount {
    /// Share of the current LP balance, at least 1 wei when the balance is non-zero.
    Share(Percent),
    /// Exact amount in base units.
    Fixed(U256),
}

/// How much token to sell back for the native currency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnswapAmount {
    Range(AmountRange),
    /// Share of the output quoted for the swap earlier in the same cycle.
    ShareOfSwap(Percent),
}

/// The operation to run for each account.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationKind {
    Swap {
        amount: AmountRange,
    },
    Unswap {
        amount: AmountRange,
    },
    SwapUnswap {
        amount: AmountRange,
        unswap: Percent,
    },
    AddLiquidity {
        native: AmountRange,
    },
    RemoveLiquidity {
        amount: LiquidityAmount,
    },
    All {
        swap: AmountRange,
        unswap: Percent,
        add_native: AmountRange,
        remove: Percent,
    },
}

impl OperationKind {
    pub fn label(&self) -> &'static str {
        match self {
            OperationKind::Swap { .. } => "swap",
            OperationKind::Unswap { .. } => "unswap",
            OperationKind::SwapUnswap { .. } => "swap-unswap",
            OperationKind::AddLiquidity { .. } => "add-liquidity",
            OperationKind::RemoveLiquidity { .. } => "remove-liquidity",
            OperationKind::All { .. } => "all",
        }
    }
}

/// Token the run trades against the wrapped native token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSelection {
    pub symbol: String,
    pub token: H160,
    pub lp_token: H160,
}

impl TokenSelection {
    /// Looks a symbol up in the built-in table.
    pub fn builtin(symbol: &str) -> Result<Self> {
        let (symbol, token, lp) = find_token(symbol)?;
        Self::custom(symbol, token, lp)
    }

    pub fn custom(symbol: &str, token: &str, lp_token: &str) -> Result<Self> {
        Ok(Self {
            symbol: symbol.to_string(),
            token: to_h160(token)?,
            lp_token: to_h160(lp_token)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub operation: OperationKind,
    pub token: TokenSelection,
    pub router: H160,
    pub wrapped_native: H160,
    pub slippage: Percent,
    /// Seconds added to the latest block timestamp for router deadlines.
    pub deadline_offset: u64,
    pub mode: ScheduleMode,
    /// Broadcast attempts per call; `None` is unbounded.
    pub max_attempts: Option<usize>,
    /// Starting gas price; `None` asks the node.
    pub initial_gas_price: Option<U256>,
    /// Delay between the steps of one pipeline.
    pub step_pacing: Pacing,
    /// Delay between the pipelines of a multi-operation cycle.
    pub operation_pacing: Pacing,
    /// Delay after an account completed its cycle.
    pub account_pacing: Pacing,
}

impl RunConfig {
    pub fn new(operation: OperationKind, token: TokenSelection, mode: ScheduleMode) -> Result<Self> {
        Ok(Self {
            operation,
            token,
            router: to_h160(ROUTER)?,
            wrapped_native: to_h160(WRAPPED_NATIVE)?,
            slippage: Percent::from_percent(DEFAULT_SLIPPAGE_PERCENT)?,
            deadline_offset: DEFAULT_DEADLINE_OFFSET_SECS,
            mode,
            max_attempts: Some(DEFAULT_MAX_SEND_ATTEMPTS),
            initial_gas_price: None,
            step_pacing: Pacing::none(),
            operation_pacing: Pacing::secs(5, 10),
            account_pacing: Pacing::secs(5, 15),
        })
    }

    /// Rejects parameter combinations the run could not honor.
    pub fn validate(&self) -> Result<()> {
        if self.deadline_offset == 0 {
            bail!("deadline offset must be at least one second");
        }
        if self.max_attempts == Some(0) {
            bail!("max attempts must be at least 1");
        }
        match &self.operation {
            OperationKind::RemoveLiquidity {
                amount: LiquidityAmount::Share(p),
            } if p.is_zero() => bail!("remove percentage must be above 0"),
            OperationKind::RemoveLiquidity {
                amount: LiquidityAmount::Fixed(a),
            } if a.is_zero() => bail!("remove amount must be above 0"),
            OperationKind::All { remove, .. } if remove.is_zero() => {
                bail!("remove percentage must be above 0")
            }
            _ => {}
        }
        Ok(())
    }

    pub fn with_pacing(mut self, step: Pacing, operation: Pacing, account: Pacing) -> Self {
        self.step_pacing = step;
        self.operation_pacing = operation;
        self.account_pacing = account;
        self
    }
}
