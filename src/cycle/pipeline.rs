/// Dependent step chains (approve, then act) run for one account.
///
/// Each step is derive → check → build → submit. Derive and check only read the chain; a step
/// that fails its guard ends the pipeline as `Skipped` before anything is broadcast.
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use ethers::types::U256;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::common::accounts::Account;
use crate::common::chain::{ChainClient, ChainError};
use crate::common::execution::{CallRequest, Confirmed, SubmitError, TransactionSubmitter};
use crate::common::utils::{or_cancel, sleep_or_cancel, Pacing};

/// Reason used when a balance cannot cover the amount a step needs.
pub const INSUFFICIENT_BALANCE: &str = "insufficient balance";

const BPS_DENOMINATOR: u32 = 10_000;

/// A fraction held in basis points (1 bps = 0.01 %), 0..=10000.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Percent {
    bps: u32,
}

impl Percent {
    pub const ZERO: Percent = Percent { bps: 0 };
    pub const FULL: Percent = Percent {
        bps: BPS_DENOMINATOR,
    };

    pub fn from_bps(bps: u32) -> Result<Self> {
        if bps > BPS_DENOMINATOR {
            bail!("{} bps is more than 100%", bps);
        }
        Ok(Self { bps })
    }

    /// Parses a percentage such as 0.5 or 50; finer than one basis point is rejected.
    pub fn from_percent(percent: f64) -> Result<Self> {
        if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
            bail!("percentage must be between 0 and 100, got {}", percent);
        }
        let scaled = percent * 100.0;
        let bps = scaled.round();
        if (scaled - bps).abs() > 1e-6 {
            bail!("percentage {} is finer than 0.01%", percent);
        }
        Self::from_bps(bps as u32)
    }

    pub fn bps(&self) -> u32 {
        self.bps
    }

    pub fn is_zero(&self) -> bool {
        self.bps == 0
    }

    /// `floor(amount * self)`, exact for every `U256` amount.
    pub fn of(&self, amount: U256) -> U256 {
        // amount = q * 10000 + r, so floor(amount * k / 10000) = q * k + floor(r * k / 10000)
        let denominator = U256::from(BPS_DENOMINATOR);
        let k = U256::from(self.bps);
        let q = amount / denominator;
        let r = amount % denominator;
        q * k + r * k / denominator
    }

    /// `floor(amount * (1 - self))`.
    pub fn remaining_of(&self, amount: U256) -> U256 {
        Percent {
            bps: BPS_DENOMINATOR - self.bps,
        }
        .of(amount)
    }
}

impl std::fmt::Display for Percent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", self.bps as f64 / 100.0)
    }
}

/// Lowest acceptable amount for `desired` under a slippage tolerance.
pub fn min_with_slippage(desired: U256, tolerance: Percent) -> U256 {
    tolerance.remaining_of(desired)
}

/// Result of a guard's derive or check phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    Pass,
    Fail(String),
}

impl Check {
    pub fn fail(reason: impl Into<String>) -> Self {
        Check::Fail(reason.into())
    }
}

/// Values shared by the steps of one account cycle.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub account: Account,
    /// Named amounts derived so far.
    pub values: HashMap<&'static str, U256>,
    /// Router deadline of the current pipeline run.
    pub deadline: U256,
    /// Every confirmed step so far, in order.
    pub confirmed: Vec<Confirmed>,
}

impl StepContext {
    pub fn new(account: Account) -> Self {
        Self {
            account,
            values: HashMap::new(),
            deadline: U256::zero(),
            confirmed: Vec::new(),
        }
    }

    pub fn set(&mut self, key: &'static str, value: U256) {
        self.values.insert(key, value);
    }

    pub fn get(&self, key: &'static str) -> Result<U256> {
        self.values
            .get(key)
            .copied()
            .ok_or_else(|| anyhow!("value {:?} was never derived", key))
    }

    pub fn value(&self, key: &'static str) -> Option<U256> {
        self.values.get(key).copied()
    }
}

/// Read-only precondition of a step.
#[async_trait]
pub trait Guard: Send + Sync {
    /// Computes the step inputs. `Fail` or a non-transient read error skips the pipeline.
    async fn derive(&self, _chain: &dyn ChainClient, _ctx: &mut StepContext) -> Result<Check, ChainError> {
        Ok(Check::Pass)
    }

    /// Verifies the inputs can be honored. A read error here is fatal.
    async fn check(&self, chain: &dyn ChainClient, ctx: &StepContext) -> Result<Check, ChainError>;
}

pub type CallBuilder = Box<dyn Fn(&StepContext) -> Result<CallRequest> + Send + Sync>;

/// One submission of a pipeline.
pub struct Step {
    pub name: &'static str,
    pub guard: Option<Arc<dyn Guard>>,
    pub build: CallBuilder,
}

impl Step {
    pub fn new(
        name: &'static str,
        build: impl Fn(&StepContext) -> Result<CallRequest> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            guard: None,
            build: Box::new(build),
        }
    }

    pub fn guarded(mut self, guard: Arc<dyn Guard>) -> Self {
        self.guard = Some(guard);
        self
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{step}: {source}")]
    Submit {
        step: &'static str,
        #[source]
        source: SubmitError,
    },
    #[error("{step}: read failed: {source}")]
    Read {
        step: &'static str,
        #[source]
        source: ChainError,
    },
    #[error("{step}: could not build call: {message}")]
    Build { step: &'static str, message: String },
    #[error("cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn is_transient_infrastructure(&self) -> bool {
        match self {
            PipelineError::Submit { source, .. } => source.is_transient_infrastructure(),
            PipelineError::Read { source, .. } => source.is_transient_infrastructure(),
            _ => false,
        }
    }
}

#[derive(Debug)]
pub enum OperationOutcome {
    Success(Confirmed),
    Skipped(String),
    Fatal(PipelineError),
}

impl OperationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, OperationOutcome::Success(_))
    }
}

/// Work the scheduler runs once per account visit.
#[async_trait]
pub trait AccountTask: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, account: &Account, cancel: &CancellationToken) -> OperationOutcome;
}

/// Ordered, dependent submissions for one account.
pub struct OperationPipeline {
    pub name: String,
    pub steps: Vec<Step>,
    pub submitter: Arc<TransactionSubmitter>,
    /// Idle delay between steps.
    pub pacing: Pacing,
    /// Seconds added to the latest block timestamp to form the deadline.
    pub deadline_offset: u64,
}

impl OperationPipeline {
    pub fn new(
        name: impl Into<String>,
        submitter: Arc<TransactionSubmitter>,
        pacing: Pacing,
        deadline_offset: u64,
    ) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            submitter,
            pacing,
            deadline_offset,
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Runs every step against `ctx`, which may carry values from an earlier pipeline.
    ///
    /// # Returns
    /// * `OperationOutcome` - Success with the last step's receipt, the first skip, or the first fatal error.
    pub async fn run_with(
        &self,
        ctx: &mut StepContext,
        cancel: &CancellationToken,
    ) -> OperationOutcome {
        let chain = self.submitter.client.as_ref();

        ctx.deadline = match or_cancel(chain.latest_timestamp(), cancel).await {
            None => return OperationOutcome::Fatal(PipelineError::Cancelled),
            Some(Ok(ts)) => ts.saturating_add(U256::from(self.deadline_offset)),
            Some(Err(source)) => {
                return OperationOutcome::Fatal(PipelineError::Read {
                    step: "deadline",
                    source,
                })
            }
        };

        let mut last = None;
        for (i, step) in self.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                return OperationOutcome::Fatal(PipelineError::Cancelled);
            }
            if i > 0 && !sleep_or_cancel(self.pacing.next(), cancel).await {
                return OperationOutcome::Fatal(PipelineError::Cancelled);
            }

            if let Some(guard) = &step.guard {
                let derived = match or_cancel(guard.derive(chain, ctx), cancel).await {
                    Some(derived) => derived,
                    None => return OperationOutcome::Fatal(PipelineError::Cancelled),
                };
                match derived {
                    Ok(Check::Pass) => {}
                    Ok(Check::Fail(reason)) => return self.skip(ctx, step, reason),
                    Err(source) if source.is_transient_infrastructure() => {
                        return OperationOutcome::Fatal(PipelineError::Read {
                            step: step.name,
                            source,
                        })
                    }
                    Err(source) => return self.skip(ctx, step, source.to_string()),
                }
                let checked = match or_cancel(guard.check(chain, ctx), cancel).await {
                    Some(checked) => checked,
                    None => return OperationOutcome::Fatal(PipelineError::Cancelled),
                };
                match checked {
                    Ok(Check::Pass) => {}
                    Ok(Check::Fail(reason)) => return self.skip(ctx, step, reason),
                    Err(source) => {
                        return OperationOutcome::Fatal(PipelineError::Read {
                            step: step.name,
                            source,
                        })
                    }
                }
            }

            let call = match (step.build)(ctx) {
                Ok(call) => call,
                Err(e) => {
                    return OperationOutcome::Fatal(PipelineError::Build {
                        step: step.name,
                        message: format!("{:#}", e),
                    })
                }
            };

            debug!("[{}] {} -> {:?}", self.name, step.name, call.to);
            match self.submitter.submit(&ctx.account, &call, cancel).await {
                Ok(confirmed) => {
                    ctx.confirmed.push(confirmed.clone());
                    last = Some(confirmed);
                }
                Err(SubmitError::Cancelled) => {
                    return OperationOutcome::Fatal(PipelineError::Cancelled)
                }
                Err(source) => {
                    warn!(
                        "[{}] {:?} step {} failed: {}",
                        self.name, ctx.account.address, step.name, source
                    );
                    return OperationOutcome::Fatal(PipelineError::Submit {
                        step: step.name,
                        source,
                    });
                }
            }
        }

        match last {
            Some(confirmed) => OperationOutcome::Success(confirmed),
            None => OperationOutcome::Skipped("nothing to submit".to_string()),
        }
    }

    fn skip(&self, ctx: &StepContext, step: &Step, reason: String) -> OperationOutcome {
        info!(
            "[{}] {:?} skipped at {}: {}",
            self.name, ctx.account.address, step.name, reason
        );
        OperationOutcome::Skipped(reason)
    }
}

#[async_trait]
impl AccountTask for OperationPipeline {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, account: &Account, cancel: &CancellationToken) -> OperationOutcome {
        let mut ctx = StepContext::new(account.clone());
        self.run_with(&mut ctx, cancel).await
    }
}

/// A gate pipeline followed by pipelines that only run once the gate succeeded.
///
/// Follow-ups share the gate's context. Their skips and non-infrastructure failures are logged
/// and do not fail the cycle; an infrastructure failure is returned so the account is retried.
pub struct PipelineSet {
    pub name: String,
    pub gate: OperationPipeline,
    pub follow_ups: Vec<OperationPipeline>,
    /// Idle delay between pipelines.
    pub pacing: Pacing,
}

impl PipelineSet {
    pub fn new(name: impl Into<String>, gate: OperationPipeline, pacing: Pacing) -> Self {
        Self {
            name: name.into(),
            gate,
            follow_ups: Vec::new(),
            pacing,
        }
    }

    pub fn then(mut self, pipeline: OperationPipeline) -> Self {
        self.follow_ups.push(pipeline);
        self
    }
}

#[async_trait]
impl AccountTask for PipelineSet {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, account: &Account, cancel: &CancellationToken) -> OperationOutcome {
        let mut ctx = StepContext::new(account.clone());
        let mut last = match self.gate.run_with(&mut ctx, cancel).await {
            OperationOutcome::Success(confirmed) => confirmed,
            other => return other,
        };

        for pipeline in &self.follow_ups {
            if !sleep_or_cancel(self.pacing.next(), cancel).await {
                return OperationOutcome::Fatal(PipelineError::Cancelled);
            }
            match pipeline.run_with(&mut ctx, cancel).await {
                OperationOutcome::Success(confirmed) => last = confirmed,
                OperationOutcome::Skipped(reason) => {
                    info!("[{}] {} skipped: {}", self.name, pipeline.name, reason)
                }
                OperationOutcome::Fatal(err)
                    if err.is_transient_infrastructure()
                        || matches!(err, PipelineError::Cancelled) =>
                {
                    return OperationOutcome::Fatal(err)
                }
                OperationOutcome::Fatal(err) => {
                    warn!("[{}] {} failed, continuing: {}", self.name, pipeline.name, err)
                }
            }
        }

        OperationOutcome::Success(last)
    }
}
