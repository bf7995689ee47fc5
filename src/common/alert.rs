/// Provides alerting and notification functionality for swapcycle.
///
/// Integrates with Telegram via the `teloxide` crate to report confirmed account cycles and run
/// summaries.
use anyhow::{Context, Result};
use ethers::types::H160;
use log::warn;
use teloxide::prelude::*;
use teloxide::types::ChatId;

use crate::common::constants::Env;
use crate::common::execution::Confirmed;
use crate::common::utils::explorer_tx_url;

/// Handles Telegram bot setup and sending alert messages.
///
/// `bot` is None when alerting is disabled; every send is then a no-op.
pub struct Alert {
    /// Optional Telegram bot and target chat.
    pub bot: Option<(Bot, ChatId)>,
    /// Block explorer base URL used for links.
    pub explorer_url: String,
}

impl Alert {
    /// Creates a new `Alert` from the environment.
    ///
    /// # Returns
    /// * `Result<Alert>` - Enabled when `USE_ALERT=true`; errors if the token or chat id is unusable.
    pub fn new(env: &Env) -> Result<Self> {
        if !env.use_alert {
            return Ok(Self::disabled(&env.explorer_url));
        }
        if env.telegram_token.trim().is_empty() {
            anyhow::bail!("USE_ALERT=true but TELEGRAM_TOKEN is empty");
        }
        let chat_id = env
            .telegram_chat_id
            .trim()
            .parse::<i64>()
            .with_context(|| format!("TELEGRAM_CHAT_ID must be an integer, got {:?}", env.telegram_chat_id))?;
        Ok(Self {
            bot: Some((Bot::new(env.telegram_token.trim()), ChatId(chat_id))),
            explorer_url: env.explorer_url.clone(),
        })
    }

    pub fn disabled(explorer_url: &str) -> Self {
        Self {
            bot: None,
            explorer_url: explorer_url.to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.bot.is_some()
    }

    /// Sends a message via Telegram if alerting is enabled.
    ///
    /// # Parameters
    /// * `message`: &str - The message to send.
    ///
    /// # Returns
    /// * `Result<()>` - Ok if sent or alerting is disabled, error if sending fails.
    pub async fn send(&self, message: &str) -> Result<()> {
        if let Some((bot, chat_id)) = &self.bot {
            bot.send_message(*chat_id, message).await?;
        }
        Ok(())
    }

    /// Reports a confirmed account cycle. Delivery failures are logged, never propagated.
    ///
    /// # Parameters
    /// * `task`: &str - Name of the operation that ran.
    /// * `account`: H160 - The account it ran for.
    /// * `confirmed`: &Confirmed - The final confirmed transaction.
    pub async fn send_confirmed(&self, task: &str, account: H160, confirmed: &Confirmed) {
        if !self.is_enabled() {
            return;
        }
        let mut message = format!("[{}] {:?} confirmed", task, account);
        if let Some(block) = confirmed.block_number {
            message = format!("{} in block #{}", message, block);
        }
        message = format!(
            "{}\n-Tx: {}",
            message,
            explorer_tx_url(&self.explorer_url, confirmed.hash)
        );
        message = format!("{}\n-Attempts: {}", message, confirmed.attempts);
        if let Err(e) = self.send(&message).await {
            warn!("Telegram alert failed: {:?}", e);
        }
    }

    /// Reports the end-of-run summary.
    pub async fn send_summary(&self, summary: &str) {
        if let Err(e) = self.send(summary).await {
            warn!("Telegram alert failed: {:?}", e);
        }
    }
}
