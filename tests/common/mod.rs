#![allow(dead_code)]

use async_trait::async_trait;
use ethers::abi::{encode, Token};
use ethers::prelude::BaseContract;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Bytes, TransactionReceipt, H160, H256, U256, U64};
use ethers::utils::rlp::Rlp;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use swapcycle::common::accounts::Account;
use swapcycle::common::chain::{ChainClient, ChainError, ChainResult};
use swapcycle::common::execution::{SubmitterConfig, TransactionSubmitter};
use swapcycle::common::gas::gwei;

pub const KEY_0: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const KEY_1: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
pub const KEY_2: &str = "0x5de4111afa1a4b94908f83103eb1f1706367c2e68ca870fc3fb9a804cdab365a";
pub const CHAIN_ID: u64 = 3940;

pub fn account(key: &str, index: usize) -> Account {
    Account::from_private_key(index, key, CHAIN_ID).unwrap()
}

/// `whole` units plus `tenths` tenths, in 18-decimal base units.
pub fn units(whole: u64, tenths: u64) -> U256 {
    U256::exp10(18) * U256::from(whole) + U256::exp10(17) * U256::from(tenths)
}

pub fn hash(n: u64) -> H256 {
    H256::from_low_u64_be(n)
}

/// What `send_raw_transaction` should answer next.
#[derive(Debug, Clone)]
pub enum SendScript {
    Accept(H256),
    Reject(ChainError),
}

/// How a broadcast hash gets its receipt.
#[derive(Debug, Clone)]
pub enum ReceiptScript {
    /// Receipt with the given status, visible after `after` empty lookups.
    Mined { status: u64, after: usize },
    /// Successful receipt visible once this much time passed since the broadcast.
    MinedAfter(Duration),
    Never,
}

#[derive(Default)]
struct State {
    gas_price: U256,
    timestamp: U256,
    balances: HashMap<H160, U256>,
    next_nonce: U256,
    nonce_owners: Vec<H160>,
    calls: HashMap<(H160, [u8; 4]), ChainResult<Bytes>>,
    sends: VecDeque<SendScript>,
    receipts: HashMap<H256, ReceiptScript>,
    receipt_lookups: HashMap<H256, usize>,
    broadcasts: Vec<Bytes>,
    accepted_at: HashMap<H256, Instant>,
    nonce_reads: usize,
    stall_gas_price: bool,
    stall_balances: bool,
    call_log: Vec<(H160, [u8; 4])>,
}

/// Scripted in-memory chain.
#[derive(Clone, Default)]
pub struct MockChain {
    state: Arc<Mutex<State>>,
}

impl MockChain {
    pub fn new() -> Self {
        let chain = Self::default();
        {
            let mut state = chain.state.lock().unwrap();
            state.gas_price = gwei(1);
            state.timestamp = U256::from(1_700_000_000u64);
        }
        chain
    }

    pub fn set_gas_price(&self, price: U256) {
        self.state.lock().unwrap().gas_price = price;
    }

    /// Makes `gas_price` hang like a node that accepted the connection and never answered.
    pub fn stall_gas_price(&self) {
        self.state.lock().unwrap().stall_gas_price = true;
    }

    pub fn stall_balances(&self) {
        self.state.lock().unwrap().stall_balances = true;
    }

    pub fn set_balance(&self, owner: H160, balance: U256) {
        self.state.lock().unwrap().balances.insert(owner, balance);
    }

    /// Answers `name` on `to` with the ABI encoding of `output`.
    pub fn respond(&self, to: H160, contract: &BaseContract, name: &str, output: Vec<Token>) {
        let selector = contract.abi().function(name).unwrap().short_signature();
        self.state
            .lock()
            .unwrap()
            .calls
            .insert((to, selector), Ok(Bytes::from(encode(&output))));
    }

    pub fn fail_call(&self, to: H160, contract: &BaseContract, name: &str, err: ChainError) {
        let selector = contract.abi().function(name).unwrap().short_signature();
        self.state.lock().unwrap().calls.insert((to, selector), Err(err));
    }

    pub fn script_send(&self, script: SendScript) {
        self.state.lock().unwrap().sends.push_back(script);
    }

    /// Accepts the next broadcast as `hash` and mines it immediately.
    pub fn accept_mined(&self, hash: H256) {
        self.script_send(SendScript::Accept(hash));
        self.script_receipt(hash, ReceiptScript::Mined { status: 1, after: 0 });
    }

    pub fn script_receipt(&self, hash: H256, script: ReceiptScript) {
        self.state.lock().unwrap().receipts.insert(hash, script);
    }

    pub fn broadcasts(&self) -> Vec<TypedTransaction> {
        self.state
            .lock()
            .unwrap()
            .broadcasts
            .iter()
            .map(|raw| TypedTransaction::decode_signed(&Rlp::new(raw.as_ref())).unwrap().0)
            .collect()
    }

    pub fn broadcast_count(&self) -> usize {
        self.state.lock().unwrap().broadcasts.len()
    }

    pub fn nonce_reads(&self) -> usize {
        self.state.lock().unwrap().nonce_reads
    }

    pub fn receipt_lookups(&self, hash: H256) -> usize {
        self.state
            .lock()
            .unwrap()
            .receipt_lookups
            .get(&hash)
            .copied()
            .unwrap_or_default()
    }

    pub fn calls_to(&self, to: H160) -> usize {
        self.state
            .lock()
            .unwrap()
            .call_log
            .iter()
            .filter(|(target, _)| *target == to)
            .count()
    }

    pub fn submitter(&self, max_attempts: Option<usize>) -> Arc<TransactionSubmitter> {
        let mut config = SubmitterConfig::new(CHAIN_ID);
        config.max_attempts = max_attempts;
        Arc::new(TransactionSubmitter::new(Arc::new(self.clone()), config))
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn gas_price(&self) -> ChainResult<U256> {
        let (stalled, price) = {
            let state = self.state.lock().unwrap();
            (state.stall_gas_price, state.gas_price)
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(price)
    }

    async fn balance(&self, owner: H160) -> ChainResult<U256> {
        let stalled = self.state.lock().unwrap().stall_balances;
        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .balances
            .get(&owner)
            .copied()
            .unwrap_or_default())
    }

    async fn latest_timestamp(&self) -> ChainResult<U256> {
        Ok(self.state.lock().unwrap().timestamp)
    }

    async fn pending_nonce(&self, owner: H160) -> ChainResult<U256> {
        let mut state = self.state.lock().unwrap();
        state.nonce_reads += 1;
        state.nonce_owners.push(owner);
        Ok(state.next_nonce)
    }

    async fn call(&self, to: H160, data: Bytes) -> ChainResult<Bytes> {
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&data[..4]);
        let mut state = self.state.lock().unwrap();
        state.call_log.push((to, selector));
        state
            .calls
            .get(&(to, selector))
            .cloned()
            .unwrap_or_else(|| Err(ChainError::Unavailable(format!("no code at {:?}", to))))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> ChainResult<H256> {
        let mut state = self.state.lock().unwrap();
        state.broadcasts.push(raw);
        match state.sends.pop_front() {
            Some(SendScript::Accept(hash)) => {
                // an accepted transaction consumes the nonce
                state.next_nonce += U256::one();
                state.accepted_at.insert(hash, Instant::now());
                Ok(hash)
            }
            Some(SendScript::Reject(err)) => Err(err),
            None => Err(ChainError::Other("unexpected broadcast".to_string())),
        }
    }

    async fn receipt(&self, hash: H256) -> ChainResult<Option<TransactionReceipt>> {
        let mut state = self.state.lock().unwrap();
        let lookups = {
            let entry = state.receipt_lookups.entry(hash).or_default();
            *entry += 1;
            *entry
        };
        let status = match state.receipts.get(&hash) {
            Some(ReceiptScript::Mined { status, after }) if lookups > *after => Some(*status),
            Some(ReceiptScript::MinedAfter(delay)) => state
                .accepted_at
                .get(&hash)
                .filter(|at| at.elapsed() >= *delay)
                .map(|_| 1),
            _ => None,
        };
        Ok(status.map(|status| TransactionReceipt {
            transaction_hash: hash,
            block_number: Some(U64::from(100)),
            gas_used: Some(U256::from(21_000u64)),
            status: Some(U64::from(status)),
            ..Default::default()
        }))
    }
}
