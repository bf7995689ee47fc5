/// Utility functions for logging, address conversion, amounts and pacing.
use anyhow::{anyhow, Result};
use ethers::types::{H160, H256, U256};
use ethers::utils::{format_ether, parse_ether};
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;
use rand::Rng;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::common::constants::*;

/// Sets up a colored logger for the project.
///
/// # Parameters
/// * `debug`: bool - Log this crate at `Debug` instead of `Info`.
///
/// # Returns
/// * `Result<()>` - Ok if successful.
pub fn setup_logger(debug: bool) -> Result<()> {
    let colors = ColoredLevelConfig {
        trace: Color::Cyan,
        debug: Color::Magenta,
        info: Color::Green,
        warn: Color::Yellow,
        error: Color::BrightRed,
        ..ColoredLevelConfig::new()
    };
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{}[{}] {}",
                chrono::Local::now().format("[%H:%M:%S]"),
                colors.color(record.level()),
                message
            ))
        })
        .chain(std::io::stdout())
        .level(LevelFilter::Error)
        .level_for(PROJECT_NAME, level)
        .apply()?;

    Ok(())
}

/// Converts an Ethereum address string to H160.
///
/// # Parameters
/// * `str_address`: &str - Address as string.
///
/// # Returns
/// * `Result<H160>` - The address, or an error naming the bad input.
pub fn to_h160(str_address: &str) -> Result<H160> {
    H160::from_str(str_address.trim()).map_err(|e| anyhow!("invalid address {:?}: {}", str_address, e))
}

/// Link to a transaction on the block explorer.
pub fn explorer_tx_url(explorer_url: &str, hash: H256) -> String {
    format!("{}/tx/{:?}", explorer_url.trim_end_matches('/'), hash)
}

/// Formats an 18-decimal amount for log lines.
pub fn display_units(amount: U256) -> String {
    format_ether(amount)
}

/// Converts a decimal amount (e.g. 0.1) into 18-decimal base units.
pub fn to_base_units(amount: f64) -> Result<U256> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(anyhow!("amount must be a non-negative number, got {}", amount));
    }
    // shortest round-trip form, cut to 18 decimals
    let mut text = amount.to_string();
    if let Some(dot) = text.find('.') {
        text.truncate((dot + 19).min(text.len()));
    }
    Ok(parse_ether(text)?)
}

/// Draws an amount uniformly from `[min, max]`, rounded to 4 decimals.
pub fn random_amount(min: f64, max: f64) -> f64 {
    let raw = if min < max {
        rand::thread_rng().gen_range(min..=max)
    } else {
        min
    };
    (raw * 10_000.0).round() / 10_000.0
}

/// An idle delay drawn uniformly from `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub min: Duration,
    pub max: Duration,
}

impl Pacing {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            min: delay,
            max: delay,
        }
    }

    pub fn secs(min: u64, max: u64) -> Self {
        Self {
            min: Duration::from_secs(min),
            max: Duration::from_secs(max.max(min)),
        }
    }

    pub fn none() -> Self {
        Self::fixed(Duration::ZERO)
    }

    pub fn next(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

/// Sleeps for `delay` unless `cancel` fires first.
///
/// # Returns
/// * `bool` - true if the full delay elapsed, false if cancelled.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleep(delay) => true,
    }
}

/// Drives `fut` to completion unless `cancel` fires first.
///
/// # Returns
/// * `Option<F::Output>` - None if cancelled.
pub async fn or_cancel<F: Future>(fut: F, cancel: &CancellationToken) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}
