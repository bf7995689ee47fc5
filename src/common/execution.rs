/// Execution logic for building, signing, broadcasting and confirming router calls.
///
/// Provides the `TransactionSubmitter`, which gets exactly one logical call included on-chain
/// (or reports why it could not), escalating gas price through `GasPriceEscalator` when the
/// node rejects a broadcast for pricing or nonce reasons.
use ethers::prelude::*;
use ethers::signers::Signer;
use ethers::types::transaction::eip2718::TypedTransaction;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::common::accounts::Account;
use crate::common::chain::{ChainClient, ChainError};
use crate::common::constants::*;
use crate::common::gas::{format_gwei, Escalation, GasPriceEscalator, GasQuote, SendFailure};
use crate::common::utils::{explorer_tx_url, or_cancel};

/// The router/token entry points the engine submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallKind {
    Approve,
    SwapExactEthForTokens,
    SwapExactTokensForEth,
    AddLiquidityEth,
    RemoveLiquidityEth,
}

impl CallKind {
    /// Gas-limit ceiling for this kind of call.
    pub fn gas_limit(&self) -> U256 {
        let limit = match self {
            CallKind::Approve => APPROVE_GAS_LIMIT,
            CallKind::SwapExactEthForTokens => SWAP_ETH_FOR_TOKENS_GAS_LIMIT,
            CallKind::SwapExactTokensForEth => SWAP_TOKENS_FOR_ETH_GAS_LIMIT,
            CallKind::AddLiquidityEth => ADD_LIQUIDITY_GAS_LIMIT,
            CallKind::RemoveLiquidityEth => REMOVE_LIQUIDITY_GAS_LIMIT,
        };
        U256::from(limit)
    }

    pub fn label(&self) -> &'static str {
        match self {
            CallKind::Approve => "approve",
            CallKind::SwapExactEthForTokens => "swapExactETHForTokens",
            CallKind::SwapExactTokensForEth => "swapExactTokensForETH",
            CallKind::AddLiquidityEth => "addLiquidityETH",
            CallKind::RemoveLiquidityEth => "removeLiquidityETH",
        }
    }
}

/// Unsigned intent of one contract invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    /// What is being called; selects the gas-limit ceiling.
    pub kind: CallKind,
    /// Address the transaction is sent from.
    pub caller: H160,
    /// Target contract.
    pub to: H160,
    /// Encoded selector and arguments.
    pub data: Bytes,
    /// Attached native value in wei.
    pub value: U256,
}

impl CallRequest {
    pub fn new(kind: CallKind, caller: H160, to: H160, data: Bytes) -> Self {
        Self {
            kind,
            caller,
            to,
            data,
            value: U256::zero(),
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    /// Builds the legacy transaction for one attempt.
    ///
    /// # Parameters
    /// * `nonce`: U256 - Pending nonce read for this attempt.
    /// * `quote`: &GasQuote - Gas price and gas limit.
    /// * `chain_id`: u64 - Chain id to sign for.
    ///
    /// # Returns
    /// * `TypedTransaction` - The fully-formed, unsigned transaction.
    pub fn to_typed_transaction(
        &self,
        nonce: U256,
        quote: &GasQuote,
        chain_id: u64,
    ) -> TypedTransaction {
        TypedTransaction::Legacy(TransactionRequest {
            from: Some(self.caller),
            to: Some(NameOrAddress::Address(self.to)),
            gas: Some(quote.gas_limit),
            gas_price: Some(quote.gas_price),
            value: Some(self.value),
            data: Some(self.data.clone()),
            nonce: Some(nonce),
            chain_id: Some(U64::from(chain_id)),
        })
    }
}

/// Attempt bookkeeping for one `CallRequest`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Broadcast attempts made so far.
    pub attempts: usize,
    /// Total gas price added by escalation, in wei.
    pub escalated: U256,
}

/// A broadcast transaction awaiting inclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingReceipt {
    pub hash: H256,
    pub broadcast_at: Instant,
}

/// Where a `PendingReceipt` ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiptStatus {
    Confirmed(TransactionReceipt),
    TimedOut,
}

/// A call that made it on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Confirmed {
    pub kind: CallKind,
    pub hash: H256,
    pub block_number: Option<U64>,
    pub gas_used: Option<U256>,
    /// Broadcast attempts it took, including the successful one.
    pub attempts: usize,
}

/// Why a submission did not end in `Confirmed`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmitError {
    /// The node rejected a read or the broadcast and escalation cannot help.
    #[error(transparent)]
    Chain(#[from] ChainError),
    /// The attempt ceiling was reached while the node kept rejecting the call.
    #[error("gave up after {attempts} attempts, last error: {last}")]
    AttemptsExhausted { attempts: usize, last: ChainError },
    /// Broadcast succeeded but no receipt was observed within the wait window.
    #[error("transaction {hash:?} not confirmed within {waited_secs}s")]
    TimedOut { hash: H256, waited_secs: u64 },
    /// Included, but execution failed.
    #[error("transaction {hash:?} reverted on-chain")]
    Reverted { hash: H256 },
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("submission cancelled")]
    Cancelled,
}

impl SubmitError {
    /// Node desync or unreachable node.
    pub fn is_transient_infrastructure(&self) -> bool {
        match self {
            SubmitError::Chain(err) => err.is_transient_infrastructure(),
            SubmitError::AttemptsExhausted { last, .. } => last.is_transient_infrastructure(),
            _ => false,
        }
    }
}

/// Tunables of the submitter.
#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    /// Chain id every transaction is signed for.
    pub chain_id: u64,
    /// Escalation policy.
    pub escalator: GasPriceEscalator,
    /// Longest wait for a receipt after a successful broadcast.
    pub receipt_timeout: Duration,
    /// Delay between receipt polls.
    pub poll_interval: Duration,
    /// Broadcast attempts per logical call; `None` retries until success or an abort.
    pub max_attempts: Option<usize>,
    /// Starting gas price; `None` queries the network before the first attempt.
    pub initial_gas_price: Option<U256>,
    /// Block explorer base URL for confirmation log lines.
    pub explorer_url: String,
}

impl SubmitterConfig {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            escalator: GasPriceEscalator::default(),
            receipt_timeout: Duration::from_secs(RECEIPT_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(RECEIPT_POLL_INTERVAL_SECS),
            max_attempts: Some(DEFAULT_MAX_SEND_ATTEMPTS),
            initial_gas_price: None,
            explorer_url: DEFAULT_EXPLORER_URL.to_string(),
        }
    }
}

/// Builds, signs, broadcasts and confirms calls.
pub struct TransactionSubmitter {
    /// The chain client.
    pub client: Arc<dyn ChainClient>,
    /// Tunables.
    pub config: SubmitterConfig,
}

impl TransactionSubmitter {
    /// Creates a new submitter.
    ///
    /// # Parameters
    /// * `client`: Arc<dyn ChainClient> - The chain client.
    /// * `config`: SubmitterConfig - Chain id, escalation and timeout settings.
    pub fn new(client: Arc<dyn ChainClient>, config: SubmitterConfig) -> Self {
        Self { client, config }
    }

    /// Gets `call` included on-chain, signing with `account`.
    ///
    /// A fresh pending nonce is read before every attempt. Broadcast failures go through the
    /// escalator; anything it will not retry is returned as an error. After a successful
    /// broadcast the receipt is awaited, and a timeout is returned as `TimedOut` without
    /// resubmitting.
    ///
    /// # Parameters
    /// * `account`: &Account - Signer; must match `call.caller`.
    /// * `call`: &CallRequest - What to submit.
    /// * `cancel`: &CancellationToken - Aborts the submission at the next wait point.
    ///
    /// # Returns
    /// * `Result<Confirmed, SubmitError>` - The included transaction, or why there is none.
    pub async fn submit(
        &self,
        account: &Account,
        call: &CallRequest,
        cancel: &CancellationToken,
    ) -> Result<Confirmed, SubmitError> {
        if account.address != call.caller {
            return Err(SubmitError::Signing(format!(
                "call is from {:?} but signer is {:?}",
                call.caller, account.address
            )));
        }

        let gas_price = match self.config.initial_gas_price {
            Some(price) => price,
            None => or_cancel(self.client.gas_price(), cancel)
                .await
                .ok_or(SubmitError::Cancelled)??,
        };
        let mut quote = GasQuote::new(gas_price, call.kind.gas_limit());
        let mut retry = RetryState::default();

        loop {
            if cancel.is_cancelled() {
                return Err(SubmitError::Cancelled);
            }
            retry.attempts += 1;

            let nonce = or_cancel(self.client.pending_nonce(call.caller), cancel)
                .await
                .ok_or(SubmitError::Cancelled)??;
            let tx = call.to_typed_transaction(nonce, &quote, self.config.chain_id);
            let signature = account
                .wallet
                .sign_transaction(&tx)
                .await
                .map_err(|e| SubmitError::Signing(e.to_string()))?;
            let raw = tx.rlp_signed(&signature);

            debug!(
                "[{:?}] {} attempt #{} nonce={} gas_price={} gwei",
                call.caller,
                call.kind.label(),
                retry.attempts,
                nonce,
                format_gwei(quote.gas_price)
            );

            let sent = or_cancel(self.client.send_raw_transaction(raw), cancel)
                .await
                .ok_or(SubmitError::Cancelled)?;
            match sent {
                Ok(hash) => {
                    info!(
                        "[{:?}] {} sent: {:?}",
                        call.caller,
                        call.kind.label(),
                        hash
                    );
                    let pending = PendingReceipt {
                        hash,
                        broadcast_at: Instant::now(),
                    };
                    return match self.await_receipt(&pending, cancel).await? {
                        ReceiptStatus::Confirmed(receipt) => {
                            if receipt.status == Some(U64::zero()) {
                                error!("[{:?}] {} reverted: {:?}", call.caller, call.kind.label(), hash);
                                return Err(SubmitError::Reverted { hash });
                            }
                            info!(
                                "[{:?}] {} confirmed in block {:?}: {}",
                                call.caller,
                                call.kind.label(),
                                receipt.block_number.unwrap_or_default(),
                                explorer_tx_url(&self.config.explorer_url, hash)
                            );
                            Ok(Confirmed {
                                kind: call.kind,
                                hash,
                                block_number: receipt.block_number,
                                gas_used: receipt.gas_used,
                                attempts: retry.attempts,
                            })
                        }
                        ReceiptStatus::TimedOut => Err(SubmitError::TimedOut {
                            hash,
                            waited_secs: self.config.receipt_timeout.as_secs(),
                        }),
                    };
                }
                Err(err) => {
                    let failure = SendFailure::from(&err);
                    match self.config.escalator.escalate(failure, &quote) {
                        Escalation::Retry {
                            quote: next,
                            refresh_nonce,
                        } => {
                            if let Some(max) = self.config.max_attempts {
                                if retry.attempts >= max {
                                    error!(
                                        "[{:?}] {} still rejected after {} attempts: {}",
                                        call.caller,
                                        call.kind.label(),
                                        retry.attempts,
                                        err
                                    );
                                    return Err(SubmitError::AttemptsExhausted {
                                        attempts: retry.attempts,
                                        last: err,
                                    });
                                }
                            }
                            retry.escalated = retry
                                .escalated
                                .saturating_add(next.gas_price.saturating_sub(quote.gas_price));
                            warn!(
                                "[{:?}] {} rejected ({}), raising gas price to {} gwei{}",
                                call.caller,
                                call.kind.label(),
                                err,
                                format_gwei(next.gas_price),
                                if refresh_nonce { " with a fresh nonce" } else { "" }
                            );
                            quote = next;
                        }
                        Escalation::Abort => {
                            error!(
                                "[{:?}] {} failed: {}",
                                call.caller,
                                call.kind.label(),
                                err
                            );
                            return Err(SubmitError::Chain(err));
                        }
                    }
                }
            }
        }
    }

    /// Polls for the receipt of `pending` until it appears or the wait window closes.
    ///
    /// After the window closes one more lookup is made, so a transaction mined right at the
    /// deadline is still reported as confirmed.
    pub async fn await_receipt(
        &self,
        pending: &PendingReceipt,
        cancel: &CancellationToken,
    ) -> Result<ReceiptStatus, SubmitError> {
        let poll = async {
            loop {
                match or_cancel(self.client.receipt(pending.hash), cancel).await {
                    None => return Err(SubmitError::Cancelled),
                    Some(Ok(Some(receipt))) => return Ok(receipt),
                    Some(Ok(None)) => {}
                    Some(Err(err)) => warn!("receipt lookup for {:?} failed: {}", pending.hash, err),
                }
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SubmitError::Cancelled),
                    _ = sleep(self.config.poll_interval) => {}
                }
            }
        };

        match timeout(self.config.receipt_timeout, poll).await {
            Ok(Ok(receipt)) => Ok(ReceiptStatus::Confirmed(receipt)),
            Ok(Err(err)) => Err(err),
            Err(_) => match or_cancel(self.client.receipt(pending.hash), cancel).await {
                None => Err(SubmitError::Cancelled),
                Some(Ok(Some(receipt))) => Ok(ReceiptStatus::Confirmed(receipt)),
                _ => {
                    error!(
                        "{:?} not confirmed {:?} after broadcast",
                        pending.hash,
                        pending.broadcast_at.elapsed()
                    );
                    Ok(ReceiptStatus::TimedOut)
                }
            },
        }
    }
}
