/// Gas price escalation for failed broadcasts.
///
/// The escalator is a pure function of (failure class, current quote): it never looks at
/// the network and keeps no state between calls.
use ethers::types::U256;
use ethers::utils::parse_units;
use log::debug;

use crate::common::chain::ChainError;
use crate::common::constants::{OUT_OF_GAS_BUMP_GWEI, UNDERPRICED_BUMP_GWEI};

/// Why a broadcast failed, as far as gas pricing is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// Replacement underpriced or nonce already used.
    UnderpricedOrStaleNonce,
    /// Ran out of gas.
    OutOfGas,
    /// Anything escalation cannot fix.
    Other,
}

impl From<&ChainError> for SendFailure {
    fn from(err: &ChainError) -> Self {
        match err {
            ChainError::Underpriced | ChainError::NonceTooLow => SendFailure::UnderpricedOrStaleNonce,
            ChainError::OutOfGas => SendFailure::OutOfGas,
            _ => SendFailure::Other,
        }
    }
}

/// Gas price plus the gas-limit ceiling for one call kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasQuote {
    /// Price per unit of gas, in wei.
    pub gas_price: U256,
    /// Gas-limit ceiling for the call.
    pub gas_limit: U256,
}

impl GasQuote {
    pub fn new(gas_price: U256, gas_limit: U256) -> Self {
        Self {
            gas_price,
            gas_limit,
        }
    }
}

/// What the submitter should do after a failed broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Resubmit with `quote`. `refresh_nonce` is set when the failure was nonce related.
    Retry { quote: GasQuote, refresh_nonce: bool },
    /// Give up and surface the error.
    Abort,
}

/// Computes the next gas price after a failed broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPriceEscalator {
    /// Added after an underpriced replacement or a stale nonce.
    pub underpriced_bump: U256,
    /// Added after an out-of-gas failure.
    pub out_of_gas_bump: U256,
}

impl Default for GasPriceEscalator {
    fn default() -> Self {
        Self::from_gwei(UNDERPRICED_BUMP_GWEI, OUT_OF_GAS_BUMP_GWEI)
    }
}

impl GasPriceEscalator {
    /// Creates an escalator with increments given in gwei.
    ///
    /// # Parameters
    /// * `underpriced_gwei`: u64 - Bump after underpriced/stale-nonce failures.
    /// * `out_of_gas_gwei`: u64 - Bump after out-of-gas failures.
    pub fn from_gwei(underpriced_gwei: u64, out_of_gas_gwei: u64) -> Self {
        Self {
            underpriced_bump: gwei(underpriced_gwei),
            out_of_gas_bump: gwei(out_of_gas_gwei),
        }
    }

    /// Decides whether to retry and at which price.
    ///
    /// # Parameters
    /// * `failure`: SendFailure - Classification of the failed broadcast.
    /// * `quote`: &GasQuote - Quote used by the failed attempt.
    ///
    /// # Returns
    /// * `Escalation` - Retry with a new quote, or abort.
    pub fn escalate(&self, failure: SendFailure, quote: &GasQuote) -> Escalation {
        let (bump, refresh_nonce) = match failure {
            SendFailure::UnderpricedOrStaleNonce => (self.underpriced_bump, true),
            SendFailure::OutOfGas => (self.out_of_gas_bump, false),
            SendFailure::Other => return Escalation::Abort,
        };
        let gas_price = quote.gas_price.saturating_add(bump);
        debug!(
            "Escalating gas price {} -> {} wei ({:?})",
            quote.gas_price, gas_price, failure
        );
        Escalation::Retry {
            quote: GasQuote {
                gas_price,
                gas_limit: quote.gas_limit,
            },
            refresh_nonce,
        }
    }
}

/// Converts whole gwei into wei.
pub fn gwei(amount: u64) -> U256 {
    U256::from(amount) * U256::exp10(9)
}

/// Formats a wei gas price as gwei for log lines.
pub fn format_gwei(wei: U256) -> String {
    ethers::utils::format_units(wei, "gwei").unwrap_or_else(|_| format!("{} wei", wei))
}

/// Parses a decimal gwei string (e.g. "1.5") into wei.
pub fn parse_gwei(amount: &str) -> anyhow::Result<U256> {
    Ok(parse_units(amount, "gwei")?.into())
}
