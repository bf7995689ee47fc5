/// Router operations: swap, unswap, add and remove liquidity, and their combinations.
///
/// Every operation is an `OperationPipeline` of approve/act steps with guards that quote the
/// router and check balances before anything is signed.
use anyhow::Result;
use async_trait::async_trait;
use ethers::types::{H160, U256, U512};
use log::{info, warn};
use std::sync::Arc;

use crate::common::abi::Abi;
use crate::common::chain::{ChainClient, ChainError};
use crate::common::constants::NATIVE_SYMBOL;
use crate::common::execution::{CallKind, CallRequest, TransactionSubmitter};
use crate::common::utils::{display_units, Pacing};
use crate::cycle::config::{AmountRange, LiquidityAmount, RunConfig, UnswapAmount};
use crate::cycle::pipeline::{
    min_with_slippage, Check, Guard, OperationPipeline, Percent, PipelineSet, Step, StepContext,
    INSUFFICIENT_BALANCE,
};

pub const SWAP_AMOUNT_IN: &str = "swap_amount_in";
pub const SWAP_QUOTED_OUT: &str = "swap_quoted_out";
pub const SWAP_MIN_OUT: &str = "swap_min_out";
pub const UNSWAP_AMOUNT_IN: &str = "unswap_amount_in";
pub const UNSWAP_MIN_OUT: &str = "unswap_min_out";
pub const ADD_NATIVE: &str = "add_native";
pub const ADD_TOKEN: &str = "add_token";
pub const ADD_NATIVE_MIN: &str = "add_native_min";
pub const ADD_TOKEN_MIN: &str = "add_token_min";
pub const REMOVE_LP_BALANCE: &str = "remove_lp_balance";
pub const REMOVE_LIQUIDITY: &str = "remove_liquidity";
pub const REMOVE_TOKEN_MIN: &str = "remove_token_min";
pub const REMOVE_NATIVE_MIN: &str = "remove_native_min";

/// Router, token pair and slippage tolerance every operation of a run uses.
#[derive(Debug, Clone)]
pub struct Venue {
    pub abi: Abi,
    pub router: H160,
    pub wrapped_native: H160,
    pub symbol: String,
    pub token: H160,
    pub lp_token: H160,
    pub slippage: Percent,
}

impl Venue {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            abi: Abi::new(),
            router: config.router,
            wrapped_native: config.wrapped_native,
            symbol: config.token.symbol.clone(),
            token: config.token.token,
            lp_token: config.token.lp_token,
            slippage: config.slippage,
        }
    }

    fn buy_path(&self) -> Vec<H160> {
        vec![self.wrapped_native, self.token]
    }

    fn sell_path(&self) -> Vec<H160> {
        vec![self.token, self.wrapped_native]
    }

    /// Router quote for the final hop of `path`; `None` when the quote is empty or zero.
    async fn quote(
        &self,
        chain: &dyn ChainClient,
        amount_in: U256,
        path: Vec<H160>,
    ) -> Result<Option<U256>, ChainError> {
        let amounts = self.abi.amounts_out(chain, self.router, amount_in, path).await?;
        Ok(amounts.last().copied().filter(|out| !out.is_zero()))
    }

    pub fn approve(&self, caller: H160, token: H160, amount: U256) -> Result<CallRequest> {
        let data = self.abi.token.encode("approve", (self.router, amount))?;
        Ok(CallRequest::new(CallKind::Approve, caller, token, data))
    }

    pub fn swap_exact_eth_for_tokens(&self, ctx: &StepContext) -> Result<CallRequest> {
        let data = self.abi.router.encode(
            "swapExactETHForTokens",
            (
                ctx.get(SWAP_MIN_OUT)?,
                self.buy_path(),
                ctx.account.address,
                ctx.deadline,
            ),
        )?;
        Ok(CallRequest::new(
            CallKind::SwapExactEthForTokens,
            ctx.account.address,
            self.router,
            data,
        )
        .with_value(ctx.get(SWAP_AMOUNT_IN)?))
    }

    pub fn swap_exact_tokens_for_eth(&self, ctx: &StepContext) -> Result<CallRequest> {
        let data = self.abi.router.encode(
            "swapExactTokensForETH",
            (
                ctx.get(UNSWAP_AMOUNT_IN)?,
                ctx.get(UNSWAP_MIN_OUT)?,
                self.sell_path(),
                ctx.account.address,
                ctx.deadline,
            ),
        )?;
        Ok(CallRequest::new(
            CallKind::SwapExactTokensForEth,
            ctx.account.address,
            self.router,
            data,
        ))
    }

    pub fn add_liquidity_eth(&self, ctx: &StepContext) -> Result<CallRequest> {
        let data = self.abi.router.encode(
            "addLiquidityETH",
            (
                self.token,
                ctx.get(ADD_TOKEN)?,
                ctx.get(ADD_TOKEN_MIN)?,
                ctx.get(ADD_NATIVE_MIN)?,
                ctx.account.address,
                ctx.deadline,
            ),
        )?;
        Ok(CallRequest::new(
            CallKind::AddLiquidityEth,
            ctx.account.address,
            self.router,
            data,
        )
        .with_value(ctx.get(ADD_NATIVE)?))
    }

    pub fn remove_liquidity_eth(&self, ctx: &StepContext) -> Result<CallRequest> {
        let data = self.abi.router.encode(
            "removeLiquidityETH",
            (
                self.token,
                ctx.get(REMOVE_LIQUIDITY)?,
                ctx.get(REMOVE_TOKEN_MIN)?,
                ctx.get(REMOVE_NATIVE_MIN)?,
                ctx.account.address,
                ctx.deadline,
            ),
        )?;
        Ok(CallRequest::new(
            CallKind::RemoveLiquidityEth,
            ctx.account.address,
            self.router,
            data,
        ))
    }
}

/// `floor(a * b / denominator)` without intermediate overflow.
pub fn mul_div(a: U256, b: U256, denominator: U256) -> Option<U256> {
    if denominator.is_zero() {
        return None;
    }
    let wide = a.full_mul(b) / U512::from(denominator);
    U256::try_from(wide).ok()
}

/// Native balance check plus router quote for native → token.
pub struct NativeSwapGuard {
    pub venue: Arc<Venue>,
    pub amount: AmountRange,
}

#[async_trait]
impl Guard for NativeSwapGuard {
    async fn derive(&self, chain: &dyn ChainClient, ctx: &mut StepContext) -> Result<Check, ChainError> {
        let amount_in = match self.amount.draw() {
            Ok(amount) if !amount.is_zero() => amount,
            Ok(_) => return Ok(Check::fail("swap amount is zero")),
            Err(e) => return Ok(Check::fail(format!("invalid swap amount: {}", e))),
        };
        let quoted = match self.venue.quote(chain, amount_in, self.venue.buy_path()).await? {
            Some(out) => out,
            None => return Ok(Check::fail("router quoted nothing for the swap")),
        };
        info!(
            "[{:?}] swap {} {} for ~{} {}",
            ctx.account.address,
            display_units(amount_in),
            NATIVE_SYMBOL,
            display_units(quoted),
            self.venue.symbol
        );
        ctx.set(SWAP_AMOUNT_IN, amount_in);
        ctx.set(SWAP_QUOTED_OUT, quoted);
        ctx.set(SWAP_MIN_OUT, min_with_slippage(quoted, self.venue.slippage));
        Ok(Check::Pass)
    }

    async fn check(&self, chain: &dyn ChainClient, ctx: &StepContext) -> Result<Check, ChainError> {
        let needed = ctx.value(SWAP_AMOUNT_IN).unwrap_or_default();
        let balance = chain.balance(ctx.account.address).await?;
        if balance < needed {
            info!(
                "[{:?}] {} balance {} is below {}",
                ctx.account.address,
                NATIVE_SYMBOL,
                display_units(balance),
                display_units(needed)
            );
            return Ok(Check::fail(INSUFFICIENT_BALANCE));
        }
        Ok(Check::Pass)
    }
}

/// Token balance check plus router quote for token → native.
pub struct TokenSwapGuard {
    pub venue: Arc<Venue>,
    pub amount: UnswapAmount,
}

#[async_trait]
impl Guard for TokenSwapGuard {
    async fn derive(&self, chain: &dyn ChainClient, ctx: &mut StepContext) -> Result<Check, ChainError> {
        let amount_in = match self.amount {
            UnswapAmount::Range(range) => match range.draw() {
                Ok(amount) => amount,
                Err(e) => return Ok(Check::fail(format!("invalid unswap amount: {}", e))),
            },
            UnswapAmount::ShareOfSwap(share) => match ctx.value(SWAP_QUOTED_OUT) {
                Some(quoted) => share.of(quoted),
                None => return Ok(Check::fail("no swap output to unswap")),
            },
        };
        if amount_in.is_zero() {
            return Ok(Check::fail("unswap amount is zero"));
        }
        let quoted = match self.venue.quote(chain, amount_in, self.venue.sell_path()).await? {
            Some(out) => out,
            None => return Ok(Check::fail("router quoted nothing for the unswap")),
        };
        info!(
            "[{:?}] unswap {} {} for ~{} {}",
            ctx.account.address,
            display_units(amount_in),
            self.venue.symbol,
            display_units(quoted),
            NATIVE_SYMBOL
        );
        ctx.set(UNSWAP_AMOUNT_IN, amount_in);
        ctx.set(UNSWAP_MIN_OUT, min_with_slippage(quoted, self.venue.slippage));
        Ok(Check::Pass)
    }

    async fn check(&self, chain: &dyn ChainClient, ctx: &StepContext) -> Result<Check, ChainError> {
        let needed = ctx.value(UNSWAP_AMOUNT_IN).unwrap_or_default();
        let balance = self
            .venue
            .abi
            .balance_of(chain, self.venue.token, ctx.account.address)
            .await?;
        if balance < needed {
            info!(
                "[{:?}] {} balance {} is below {}",
                ctx.account.address,
                self.venue.symbol,
                display_units(balance),
                display_units(needed)
            );
            return Ok(Check::fail(INSUFFICIENT_BALANCE));
        }
        Ok(Check::Pass)
    }
}

/// Quotes the token side of a native deposit and checks both balances.
pub struct AddLiquidityGuard {
    pub venue: Arc<Venue>,
    pub native: AmountRange,
}

#[async_trait]
impl Guard for AddLiquidityGuard {
    async fn derive(&self, chain: &dyn ChainClient, ctx: &mut StepContext) -> Result<Check, ChainError> {
        let native = match self.native.draw() {
            Ok(amount) if !amount.is_zero() => amount,
            Ok(_) => return Ok(Check::fail("liquidity amount is zero")),
            Err(e) => return Ok(Check::fail(format!("invalid liquidity amount: {}", e))),
        };
        let token = match self.venue.quote(chain, native, self.venue.buy_path()).await? {
            Some(out) => out,
            None => return Ok(Check::fail("router quoted nothing for the token side")),
        };
        info!(
            "[{:?}] add {} {} + ~{} {} liquidity",
            ctx.account.address,
            display_units(native),
            NATIVE_SYMBOL,
            display_units(token),
            self.venue.symbol
        );
        ctx.set(ADD_NATIVE, native);
        ctx.set(ADD_TOKEN, token);
        ctx.set(ADD_NATIVE_MIN, min_with_slippage(native, self.venue.slippage));
        ctx.set(ADD_TOKEN_MIN, min_with_slippage(token, self.venue.slippage));
        Ok(Check::Pass)
    }

    async fn check(&self, chain: &dyn ChainClient, ctx: &StepContext) -> Result<Check, ChainError> {
        let owner = ctx.account.address;
        let native = chain.balance(owner).await?;
        if native < ctx.value(ADD_NATIVE).unwrap_or_default() {
            info!("[{:?}] not enough {} to add liquidity", owner, NATIVE_SYMBOL);
            return Ok(Check::fail(INSUFFICIENT_BALANCE));
        }
        let token = self.venue.abi.balance_of(chain, self.venue.token, owner).await?;
        if token < ctx.value(ADD_TOKEN).unwrap_or_default() {
            info!("[{:?}] not enough {} to add liquidity", owner, self.venue.symbol);
            return Ok(Check::fail(INSUFFICIENT_BALANCE));
        }
        Ok(Check::Pass)
    }
}

/// Sizes the LP redemption and derives its minimums from the pair reserves.
pub struct RemoveLiquidityGuard {
    pub venue: Arc<Venue>,
    pub amount: LiquidityAmount,
}

#[async_trait]
impl Guard for RemoveLiquidityGuard {
    async fn derive(&self, chain: &dyn ChainClient, ctx: &mut StepContext) -> Result<Check, ChainError> {
        let venue = &self.venue;
        let lp_balance = venue
            .abi
            .balance_of(chain, venue.lp_token, ctx.account.address)
            .await?;
        if lp_balance.is_zero() {
            return Ok(Check::fail("no LP tokens to remove"));
        }
        let liquidity = match self.amount {
            LiquidityAmount::Share(share) => share.of(lp_balance).max(U256::one()),
            LiquidityAmount::Fixed(amount) => amount,
        };
        if liquidity.is_zero() {
            return Ok(Check::fail("remove amount is zero"));
        }

        let (reserve0, reserve1) = venue.abi.reserves(chain, venue.lp_token).await?;
        let total_supply = venue.abi.total_supply(chain, venue.lp_token).await?;
        let (token0, token1) = venue.abi.pair_tokens(chain, venue.lp_token).await?;
        let (reserve_token, reserve_native) =
            if token0 == venue.token && token1 == venue.wrapped_native {
                (reserve0, reserve1)
            } else if token0 == venue.wrapped_native && token1 == venue.token {
                (reserve1, reserve0)
            } else {
                warn!(
                    "pair {:?} holds {:?}/{:?}, not the configured tokens",
                    venue.lp_token, token0, token1
                );
                (reserve0, reserve1)
            };

        let (expected_token, expected_native) = match (
            mul_div(reserve_token, liquidity, total_supply),
            mul_div(reserve_native, liquidity, total_supply),
        ) {
            (Some(token), Some(native)) => (token, native),
            _ => return Ok(Check::fail("pair reports no LP supply")),
        };
        info!(
            "[{:?}] remove {} LP for ~{} {} + ~{} {}",
            ctx.account.address,
            display_units(liquidity),
            display_units(expected_token),
            venue.symbol,
            display_units(expected_native),
            NATIVE_SYMBOL
        );

        ctx.set(REMOVE_LP_BALANCE, lp_balance);
        ctx.set(REMOVE_LIQUIDITY, liquidity);
        ctx.set(REMOVE_TOKEN_MIN, min_with_slippage(expected_token, venue.slippage));
        ctx.set(REMOVE_NATIVE_MIN, min_with_slippage(expected_native, venue.slippage));
        Ok(Check::Pass)
    }

    async fn check(&self, _chain: &dyn ChainClient, ctx: &StepContext) -> Result<Check, ChainError> {
        let balance = ctx.value(REMOVE_LP_BALANCE).unwrap_or_default();
        if balance < ctx.value(REMOVE_LIQUIDITY).unwrap_or_default() {
            return Ok(Check::fail(INSUFFICIENT_BALANCE));
        }
        Ok(Check::Pass)
    }
}

/// Builds the pipelines of a run.
#[derive(Clone)]
pub struct Operations {
    pub venue: Arc<Venue>,
    pub submitter: Arc<TransactionSubmitter>,
    pub step_pacing: Pacing,
    pub operation_pacing: Pacing,
    pub deadline_offset: u64,
}

impl Operations {
    pub fn new(venue: Venue, submitter: Arc<TransactionSubmitter>, config: &RunConfig) -> Self {
        Self {
            venue: Arc::new(venue),
            submitter,
            step_pacing: config.step_pacing,
            operation_pacing: config.operation_pacing,
            deadline_offset: config.deadline_offset,
        }
    }

    fn pipeline(&self, name: &str) -> OperationPipeline {
        OperationPipeline::new(
            name,
            self.submitter.clone(),
            self.step_pacing,
            self.deadline_offset,
        )
    }

    /// Native → token.
    pub fn swap(&self, amount: AmountRange) -> OperationPipeline {
        let venue = self.venue.clone();
        let guard = Arc::new(NativeSwapGuard {
            venue: venue.clone(),
            amount,
        });
        self.pipeline("swap").step(
            Step::new("swapExactETHForTokens", move |ctx| {
                venue.swap_exact_eth_for_tokens(ctx)
            })
            .guarded(guard),
        )
    }

    /// Approve, then token → native.
    pub fn unswap(&self, amount: UnswapAmount) -> OperationPipeline {
        let approve_venue = self.venue.clone();
        let swap_venue = self.venue.clone();
        let guard = Arc::new(TokenSwapGuard {
            venue: self.venue.clone(),
            amount,
        });
        self.pipeline("unswap")
            .step(
                Step::new("approve", move |ctx| {
                    approve_venue.approve(
                        ctx.account.address,
                        approve_venue.token,
                        ctx.get(UNSWAP_AMOUNT_IN)?,
                    )
                })
                .guarded(guard),
            )
            .step(Step::new("swapExactTokensForETH", move |ctx| {
                swap_venue.swap_exact_tokens_for_eth(ctx)
            }))
    }

    /// Approve the token side, then deposit both sides.
    pub fn add_liquidity(&self, native: AmountRange) -> OperationPipeline {
        let approve_venue = self.venue.clone();
        let add_venue = self.venue.clone();
        let guard = Arc::new(AddLiquidityGuard {
            venue: self.venue.clone(),
            native,
        });
        self.pipeline("add-liquidity")
            .step(
                Step::new("approve", move |ctx| {
                    approve_venue.approve(
                        ctx.account.address,
                        approve_venue.token,
                        ctx.get(ADD_TOKEN)?,
                    )
                })
                .guarded(guard),
            )
            .step(Step::new("addLiquidityETH", move |ctx| {
                add_venue.add_liquidity_eth(ctx)
            }))
    }

    /// Approve the LP token, then redeem it.
    pub fn remove_liquidity(&self, amount: LiquidityAmount) -> OperationPipeline {
        let approve_venue = self.venue.clone();
        let remove_venue = self.venue.clone();
        let guard = Arc::new(RemoveLiquidityGuard {
            venue: self.venue.clone(),
            amount,
        });
        self.pipeline("remove-liquidity")
            .step(
                Step::new("approve", move |ctx| {
                    approve_venue.approve(
                        ctx.account.address,
                        approve_venue.lp_token,
                        ctx.get(REMOVE_LIQUIDITY)?,
                    )
                })
                .guarded(guard),
            )
            .step(Step::new("removeLiquidityETH", move |ctx| {
                remove_venue.remove_liquidity_eth(ctx)
            }))
    }

    /// Swap, then sell back a share of the quoted output.
    pub fn swap_unswap(&self, amount: AmountRange, unswap: Percent) -> PipelineSet {
        PipelineSet::new("swap-unswap", self.swap(amount), self.operation_pacing)
            .then(self.unswap(UnswapAmount::ShareOfSwap(unswap)))
    }

    /// Swap gate followed by unswap, add-liquidity and remove-liquidity.
    pub fn full_cycle(
        &self,
        swap: AmountRange,
        unswap: Percent,
        add_native: AmountRange,
        remove: Percent,
    ) -> PipelineSet {
        PipelineSet::new("all", self.swap(swap), self.operation_pacing)
            .then(self.unswap(UnswapAmount::ShareOfSwap(unswap)))
            .then(self.add_liquidity(add_native))
            .then(self.remove_liquidity(LiquidityAmount::Share(remove)))
    }
}
