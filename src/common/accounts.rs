/// Funded accounts the scheduler cycles through.
use anyhow::{bail, Context, Result};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::H160;
use std::fmt;

/// An address and the wallet that signs for it.
#[derive(Clone)]
pub struct Account {
    /// Position in the configured key list.
    pub index: usize,
    /// Signing address.
    pub address: H160,
    /// Wallet bound to the configured chain id.
    pub wallet: LocalWallet,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never print key material
        f.debug_struct("Account")
            .field("index", &self.index)
            .field("address", &self.address)
            .finish()
    }
}

impl Account {
    /// Builds an account from a hex private key.
    ///
    /// # Parameters
    /// * `index`: usize - Position in the configured key list.
    /// * `private_key`: &str - Hex private key, with or without `0x`.
    /// * `chain_id`: u64 - Chain id the wallet signs for.
    pub fn from_private_key(index: usize, private_key: &str, chain_id: u64) -> Result<Self> {
        let key = private_key.trim().trim_start_matches("0x");
        let wallet = key
            .parse::<LocalWallet>()
            .with_context(|| format!("private key #{} is not a valid secp256k1 key", index + 1))?
            .with_chain_id(chain_id);
        Ok(Self {
            index,
            address: wallet.address(),
            wallet,
        })
    }
}

/// Loads all accounts in configuration order.
///
/// # Parameters
/// * `private_keys`: &[String] - Hex private keys.
/// * `chain_id`: u64 - Chain id the wallets sign for.
///
/// # Returns
/// * `Result<Vec<Account>>` - One account per key; duplicates are kept.
pub fn load_accounts(private_keys: &[String], chain_id: u64) -> Result<Vec<Account>> {
    if private_keys.is_empty() {
        bail!("PRIVATE_KEYS is empty, nothing to run");
    }
    private_keys
        .iter()
        .enumerate()
        .map(|(i, key)| Account::from_private_key(i, key, chain_id))
        .collect()
}
