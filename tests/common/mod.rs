#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use eth_subscription_indexer::blockchain::ChainClient;
use eth_subscription_indexer::error::{NetworkError, Result};
use eth_subscription_indexer::models::{Block, Transaction};

pub const ALICE: &str = "0x1111111111111111111111111111111111111111";
pub const BOB: &str = "0x2222222222222222222222222222222222222222";
pub const CAROL: &str = "0x3333333333333333333333333333333333333333";
pub const DAVE: &str = "0x4444444444444444444444444444444444444444";

/// In-process chain with a movable tip and scripted blocks
#[derive(Default)]
pub struct MockChain {
    tip: AtomicU64,
    blocks: Mutex<HashMap<u64, Vec<Transaction>>>,
    unavailable: Mutex<Vec<u64>>,
    fetched: Mutex<Vec<u64>>,
    pub fetch_delay: Option<Duration>,
}

impl MockChain {
    pub fn new(tip: u64) -> Self {
        let chain = Self::default();
        chain.set_tip(tip);
        chain
    }

    pub fn with_delay(tip: u64, delay: Duration) -> Self {
        Self {
            fetch_delay: Some(delay),
            ..Self::new(tip)
        }
    }

    pub fn set_tip(&self, tip: u64) {
        self.tip.store(tip, Ordering::SeqCst);
    }

    pub fn add_block(&self, number: u64, txs: Vec<Transaction>) {
        self.blocks.lock().unwrap().insert(number, txs);
    }

    pub fn make_unavailable(&self, number: u64) {
        self.unavailable.lock().unwrap().push(number);
    }

    pub fn make_available(&self, number: u64) {
        self.unavailable.lock().unwrap().retain(|n| *n != number);
    }

    pub fn fetched(&self) -> Vec<u64> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn get_current_block_number(&self, _cancel: &CancellationToken) -> Result<u64> {
        Ok(self.tip.load(Ordering::SeqCst))
    }

    async fn get_block_by_number(&self, _cancel: &CancellationToken, number: u64) -> Result<Block> {
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        self.fetched.lock().unwrap().push(number);

        if self.unavailable.lock().unwrap().contains(&number) {
            return Err(NetworkError::Status { status: 503 }.into());
        }

        let transactions = self
            .blocks
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .unwrap_or_default();
        Ok(Block {
            number,
            hash: format!("0x{:064x}", number),
            transactions,
            ..Default::default()
        })
    }
}

pub fn transfer(hash: &str, from: &str, to: Option<&str>) -> Transaction {
    Transaction {
        hash: hash.to_string(),
        from: from.to_string(),
        to: to.map(str::to_string),
        value: "0xde0b6b3a7640000".to_string(),
        gas: "0x5208".to_string(),
        gas_price: Some("0x3b9aca00".to_string()),
        nonce: "0x0".to_string(),
        input: "0x".to_string(),
        ..Default::default()
    }
}

pub fn hashes(txs: &[Transaction]) -> Vec<&str> {
    txs.iter().map(|tx| tx.hash.as_str()).collect()
}
