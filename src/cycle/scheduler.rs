/// Round-robin account scheduler.
///
/// Visits one account at a time, runs the account task for it and decides from the outcome
/// whether to advance, retry the same account or stop.
use anyhow::{bail, Result};
use colored::Colorize;
use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::common::accounts::Account;
use crate::common::alert::Alert;
use crate::common::constants::DEFAULT_MAX_INFRA_RETRIES;
use crate::common::utils::{sleep_or_cancel, Pacing};
use crate::cycle::pipeline::{AccountTask, OperationOutcome, PipelineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScheduleMode {
    /// Each account once, in order, then stop.
    SinglePass,
    /// Wrap around until cancelled.
    Continuous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running(usize),
    Advancing,
    Retrying(usize),
    Stopped,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub mode: ScheduleMode,
    /// Reruns of the same account after a transient infrastructure failure.
    pub max_infra_retries: usize,
    pub after_success: Pacing,
    pub after_skip: Duration,
    pub before_retry: Duration,
    pub after_fatal: Duration,
}

impl SchedulerConfig {
    pub fn new(mode: ScheduleMode) -> Self {
        Self {
            mode,
            max_infra_retries: DEFAULT_MAX_INFRA_RETRIES,
            after_success: Pacing::secs(5, 15),
            after_skip: Duration::from_secs(1),
            before_retry: Duration::from_secs(5),
            after_fatal: Duration::from_secs(5),
        }
    }
}

/// Tally of one scheduler run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Account task invocations, retries included.
    pub invocations: usize,
    pub successes: usize,
    pub skips: usize,
    pub fatals: usize,
    /// Reruns of an account after an infrastructure failure.
    pub retries: usize,
    /// Completed passes over the whole account list.
    pub cycles: usize,
    pub cancelled: bool,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} runs: {} confirmed, {} skipped, {} failed, {} retried ({} full passes)",
            self.invocations, self.successes, self.skips, self.fatals, self.retries, self.cycles
        )
    }
}

pub struct AccountScheduler {
    pub accounts: Vec<Account>,
    pub task: Arc<dyn AccountTask>,
    pub config: SchedulerConfig,
    pub alert: Arc<Alert>,
    state: SchedulerState,
    index: usize,
    retries: usize,
}

impl AccountScheduler {
    /// # Returns
    /// * `Result<Self>` - Errors when there are no accounts to schedule.
    pub fn new(
        accounts: Vec<Account>,
        task: Arc<dyn AccountTask>,
        config: SchedulerConfig,
        alert: Arc<Alert>,
    ) -> Result<Self> {
        if accounts.is_empty() {
            bail!("no accounts configured");
        }
        Ok(Self {
            accounts,
            task,
            config,
            alert,
            state: SchedulerState::Idle,
            index: 0,
            retries: 0,
        })
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Runs until the single pass is complete or `cancel` fires.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let total = self.accounts.len();
        info!(
            "{} over {} account(s), {:?}",
            self.task.name().bold(),
            total,
            self.config.mode
        );

        loop {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            self.state = SchedulerState::Running(self.index);
            let account = &self.accounts[self.index];
            info!(
                "{} account #{} {:?}",
                "==>".cyan(),
                self.index + 1,
                account.address
            );
            summary.invocations += 1;
            let outcome = self.task.run(account, cancel).await;

            let pause = match outcome {
                OperationOutcome::Success(confirmed) => {
                    summary.successes += 1;
                    info!(
                        "{} {} for {:?} ({} attempt(s))",
                        "Confirmed".green(),
                        self.task.name(),
                        account.address,
                        confirmed.attempts
                    );
                    self.alert
                        .send_confirmed(self.task.name(), account.address, &confirmed)
                        .await;
                    self.config.after_success.next()
                }
                OperationOutcome::Skipped(reason) => {
                    summary.skips += 1;
                    info!("{} {:?}: {}", "Skipped".yellow(), account.address, reason);
                    self.config.after_skip
                }
                OperationOutcome::Fatal(PipelineError::Cancelled) => {
                    summary.cancelled = true;
                    break;
                }
                OperationOutcome::Fatal(err)
                    if err.is_transient_infrastructure()
                        && self.retries < self.config.max_infra_retries =>
                {
                    self.retries += 1;
                    summary.retries += 1;
                    warn!(
                        "{:?} hit a node problem ({}), retry {}/{}",
                        account.address, err, self.retries, self.config.max_infra_retries
                    );
                    self.state = SchedulerState::Retrying(self.index);
                    if !sleep_or_cancel(self.config.before_retry, cancel).await {
                        summary.cancelled = true;
                        break;
                    }
                    continue;
                }
                OperationOutcome::Fatal(err) => {
                    summary.fatals += 1;
                    error!(
                        "{} {} for {:?}: {}",
                        "Failed".red(),
                        self.task.name(),
                        account.address,
                        err
                    );
                    self.config.after_fatal
                }
            };

            self.state = SchedulerState::Advancing;
            self.retries = 0;
            self.index = (self.index + 1) % total;
            if self.index == 0 {
                summary.cycles += 1;
                if self.config.mode == ScheduleMode::SinglePass {
                    break;
                }
            }
            if !sleep_or_cancel(pause, cancel).await {
                summary.cancelled = true;
                break;
            }
        }

        self.state = SchedulerState::Stopped;
        info!("{}", summary);
        Ok(summary)
    }
}
