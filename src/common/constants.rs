/// Defines global constants and environment configuration for the swapcycle project.
///
/// Contains the network defaults, static router/token addresses and environment variable parsing.
use anyhow::{anyhow, Context, Result};
use itertools::Itertools;
use url::Url;

pub static PROJECT_NAME: &str = "swapcycle";

/// Default JSON-RPC endpoint of the test network.
pub static DEFAULT_RPC_URL: &str = "https://testnet3.rpc.nexus.xyz";
/// Default chain id of the test network.
pub static DEFAULT_CHAIN_ID: u64 = 3940;
/// Default block explorer base URL.
pub static DEFAULT_EXPLORER_URL: &str = "https://testnet3.explorer.nexus.xyz";

/// UniswapV2-style router every operation talks to.
pub static ROUTER: &str = "0x32aA9448586b06d2d42Fe4CFabF1c7AcD03bAE31";
/// Wrapped native token used as the first/last hop of every path.
pub static WRAPPED_NATIVE: &str = "0xfAdf8E61BE6e95790d627057251AA41258a207d0";

/// Symbol of the native currency, used in log lines only.
pub static NATIVE_SYMBOL: &str = "NEX";

/// Tradeable tokens paired with the wrapped native token.
/// (symbol, token address, LP pair address)
pub static TOKENS: [(&str, &str, &str); 3] = [
    (
        "NXS",
        "0x3eC55271351865ab99a9Ce92272C3E908f2E627b",
        "0x053d715880A9A269199186B8BF26909cc6725763",
    ),
    (
        "NEXI",
        "0x184eE44cF8B7Fec2371dc46D9076fFB2c1E0Ce65",
        "0xFA1BB4324F96Ba4264B95Af1ae706E77ED5B90A8",
    ),
    (
        "AIE",
        "0xF6f61565947621387ADF3BeD7ba02533aB013CCd",
        "0xa47b8266D2e5a23275a4679254eF46d883576Bf4",
    ),
];

/// Gas-limit ceilings per call kind.
pub static APPROVE_GAS_LIMIT: u64 = 120_000;
pub static SWAP_ETH_FOR_TOKENS_GAS_LIMIT: u64 = 200_000;
pub static SWAP_TOKENS_FOR_ETH_GAS_LIMIT: u64 = 270_000;
pub static ADD_LIQUIDITY_GAS_LIMIT: u64 = 320_000;
pub static REMOVE_LIQUIDITY_GAS_LIMIT: u64 = 320_000;

/// Gas price bump (gwei) after an underpriced replacement or stale nonce.
pub static UNDERPRICED_BUMP_GWEI: u64 = 2;
/// Gas price bump (gwei) after an out-of-gas failure.
pub static OUT_OF_GAS_BUMP_GWEI: u64 = 5;

/// Seconds to wait for a receipt before reporting a timeout.
pub static RECEIPT_TIMEOUT_SECS: u64 = 300;
/// Seconds before a single JSON-RPC request is abandoned.
pub static RPC_REQUEST_TIMEOUT_SECS: u64 = 30;
/// Seconds between receipt polls.
pub static RECEIPT_POLL_INTERVAL_SECS: u64 = 2;
/// Default ceiling on broadcast attempts for one logical call.
pub static DEFAULT_MAX_SEND_ATTEMPTS: usize = 25;

/// Seconds added to the latest block timestamp to form a router deadline.
pub static DEFAULT_DEADLINE_OFFSET_SECS: u64 = 300;
/// Default slippage tolerance in percent.
pub static DEFAULT_SLIPPAGE_PERCENT: f64 = 0.5;

/// Retries of the same account after a transient infrastructure failure.
pub static DEFAULT_MAX_INFRA_RETRIES: usize = 3;

/// Retrieves the value of an environment variable by key, or returns an empty string if not found.
///
/// # Parameters
/// * `key`: &str - The environment variable name.
///
/// # Returns
/// * `String` - The value of the environment variable, or an empty string if not set.
pub fn get_env(key: &str) -> String {
    std::env::var(key).unwrap_or(String::from(""))
}

fn get_env_or(key: &str, default: &str) -> String {
    let value = get_env(key);
    if value.trim().is_empty() {
        default.to_string()
    } else {
        value
    }
}

fn parse_flag(key: &str) -> Result<bool> {
    let value = get_env(key);
    if value.trim().is_empty() {
        return Ok(false);
    }
    value
        .trim()
        .to_ascii_lowercase()
        .parse::<bool>()
        .with_context(|| format!("{} must be true or false, got {:?}", key, value))
}

/// Holds all environment configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Env {
    /// HTTPS endpoint for RPC connections.
    pub rpc_url: Url,
    /// Chain id used for signing.
    pub chain_id: u64,
    /// Block explorer base URL.
    pub explorer_url: String,
    /// Comma-separated private keys, in configuration order.
    pub private_keys: Vec<String>,
    /// Telegram token for alerts.
    pub telegram_token: String,
    /// Telegram chat ID for alerts.
    pub telegram_chat_id: String,
    /// Whether to use alerts.
    pub use_alert: bool,
    /// Whether to enable debug logging.
    pub debug: bool,
}

impl Env {
    /// Loads environment variables and constructs an `Env` instance.
    ///
    /// # Returns
    /// * `Result<Env>` - Populated configuration, or an error naming the malformed variable.
    pub fn new() -> Result<Self> {
        let rpc_url = get_env_or("RPC_URL", DEFAULT_RPC_URL);
        let rpc_url =
            Url::parse(&rpc_url).with_context(|| format!("RPC_URL is not a valid URL: {}", rpc_url))?;

        let chain_id = get_env_or("CHAIN_ID", &DEFAULT_CHAIN_ID.to_string());
        let chain_id = chain_id
            .trim()
            .parse::<u64>()
            .with_context(|| format!("CHAIN_ID must be an integer, got {:?}", chain_id))?;

        Ok(Env {
            rpc_url,
            chain_id,
            explorer_url: get_env_or("EXPLORER_URL", DEFAULT_EXPLORER_URL)
                .trim_end_matches('/')
                .to_string(),
            private_keys: split_keys(&get_env("PRIVATE_KEYS")),
            telegram_token: get_env("TELEGRAM_TOKEN"),
            telegram_chat_id: get_env("TELEGRAM_CHAT_ID"),
            use_alert: parse_flag("USE_ALERT")?,
            debug: parse_flag("DEBUG")?,
        })
    }
}

/// Splits a comma-separated key list, dropping blanks but keeping order and duplicates.
pub fn split_keys(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}

/// Looks up a built-in token by symbol (case-insensitive).
///
/// # Returns
/// * `Result<(&str, &str, &str)>` - (symbol, token address, LP pair address).
pub fn find_token(symbol: &str) -> Result<(&'static str, &'static str, &'static str)> {
    TOKENS
        .iter()
        .find(|(s, _, _)| s.eq_ignore_ascii_case(symbol))
        .copied()
        .ok_or_else(|| {
            anyhow!(
                "unknown token {:?}, expected one of: {}",
                symbol,
                TOKENS.iter().map(|(s, _, _)| *s).join(", ")
            )
        })
}
