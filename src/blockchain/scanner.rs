use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::blockchain::ChainClient;
use crate::database::codec::append_records;
use crate::database::{Record, StoreError, SubscriptionStore, Updater};
use crate::error::{Result, ScanError};
use crate::logging::{LogContext, MetricsLogger};
use crate::models::{normalize_address, Block, Transaction};

/// What the scanner is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScannerState {
    Idle,
    Fetching,
    Indexing,
}

impl ScannerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ScannerState::Fetching,
            2 => ScannerState::Indexing,
            _ => ScannerState::Idle,
        }
    }
}

/// Outcome of one `scan_all` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub start_position: u64,
    pub end_position: u64,
    pub blocks_scanned: u64,
    pub transactions_indexed: usize,
    /// Another pass held the scanner, so this call did nothing
    pub skipped: bool,
}

/// Walks the chain one block at a time and appends every transaction that
/// touches a subscribed address to that address's log.
///
/// The scan position is the highest block fully indexed, or 0 before the
/// first pass. Only a completed block moves it, and it never moves backwards.
/// Passes are serialized: a `scan_all` issued while another is running
/// returns immediately with `skipped = true`.
pub struct Scanner {
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn SubscriptionStore>,
    position: AtomicU64,
    state: AtomicU8,
    pass_guard: Mutex<()>,
}

impl Scanner {
    pub fn new(chain: Arc<dyn ChainClient>, store: Arc<dyn SubscriptionStore>, initial_block: u64) -> Self {
        LogContext::new("scanner", "initialization")
            .with_metadata("initial_block", json!(initial_block))
            .info("Creating block scanner");

        Self {
            chain,
            store,
            position: AtomicU64::new(initial_block),
            state: AtomicU8::new(ScannerState::Idle as u8),
            pass_guard: Mutex::new(()),
        }
    }

    /// Highest fully indexed block, 0 if none yet
    pub fn current_block(&self) -> u64 {
        self.position.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ScannerState {
        ScannerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ScannerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// The next block to index, or 0 when caught up.
    ///
    /// An uninitialized scanner jumps straight to the tip instead of
    /// replaying history.
    pub async fn get_next_block(&self, cancel: &CancellationToken) -> Result<u64> {
        let tip = self.chain.get_current_block_number(cancel).await?;
        let position = self.current_block();

        let next = if position == 0 {
            tip
        } else if position >= tip {
            0
        } else {
            position + 1
        };

        LogContext::new("scanner", "get_next_block")
            .with_metadata("tip", json!(tip))
            .with_metadata("position", json!(position))
            .trace(&format!("Next block resolved to {}", next));

        Ok(next)
    }

    /// Fetch one block. Does not touch the scan position.
    pub async fn scan_block(&self, cancel: &CancellationToken, number: u64) -> Result<Block> {
        self.chain.get_block_by_number(cancel, number).await
    }

    /// Keep the transactions whose sender or recipient is subscribed, in their original order
    pub fn filter_subscribed_txs(&self, txs: Vec<Transaction>) -> Vec<Transaction> {
        txs.into_iter()
            .filter(|tx| tx.participants().any(|address| self.store.has(&normalize_address(address))))
            .collect()
    }

    /// Append each transaction to the log of every subscribed participant.
    ///
    /// A self-transfer lands in its address's log twice. Returns the number
    /// of log entries written.
    pub fn save_txs(&self, txs: &[Transaction]) -> Result<usize> {
        let mut order: Vec<String> = Vec::new();
        let mut grouped: HashMap<String, Vec<Transaction>> = HashMap::new();

        for tx in txs {
            for participant in tx.participants() {
                let address = normalize_address(participant);
                if !self.store.has(&address) {
                    continue;
                }
                grouped
                    .entry(address.clone())
                    .or_insert_with(|| {
                        order.push(address.clone());
                        Vec::new()
                    })
                    .push(tx.clone());
            }
        }

        let mut updates: Vec<(String, Updater<'_>)> = Vec::with_capacity(order.len());
        let mut counts: Vec<(String, usize)> = Vec::with_capacity(order.len());
        for address in order {
            let Some(batch) = grouped.remove(&address) else {
                continue;
            };
            counts.push((address.clone(), batch.len()));

            let updater: Updater<'_> = Box::new(move |existing: Vec<Record>| {
                append_records(existing, &batch).map_err(StoreError::from)
            });
            updates.push((address, updater));
        }

        if updates.is_empty() {
            return Ok(0);
        }

        // one block commits as a unit so a retried block cannot append twice
        self.store.update_many(updates)?;

        let mut written = 0;
        for (address, count) in counts {
            MetricsLogger::log_store_operation("append", &address, count);
            written += count;
        }

        Ok(written)
    }

    /// Filter then save
    pub fn save_txs_to_subscribers(&self, txs: Vec<Transaction>) -> Result<usize> {
        let matched = self.filter_subscribed_txs(txs);
        if matched.is_empty() {
            return Ok(0);
        }
        self.save_txs(&matched)
    }

    /// Index blocks until caught up with the tip.
    ///
    /// The position advances once per fully indexed block. On error the
    /// failing block is left unindexed and the position stays at the last
    /// completed block.
    pub async fn scan_all(&self, cancel: &CancellationToken) -> Result<ScanSummary> {
        let start_position = self.current_block();

        let Ok(_guard) = self.pass_guard.try_lock() else {
            LogContext::new("scanner", "scan_all")
                .with_metadata("position", json!(start_position))
                .debug("Scan pass already running, skipping");
            return Ok(ScanSummary {
                start_position,
                end_position: start_position,
                blocks_scanned: 0,
                transactions_indexed: 0,
                skipped: true,
            });
        };

        let started = Instant::now();
        let mut summary = ScanSummary {
            start_position,
            end_position: start_position,
            blocks_scanned: 0,
            transactions_indexed: 0,
            skipped: false,
        };

        let result = self.run_pass(cancel, &mut summary).await;
        self.set_state(ScannerState::Idle);

        summary.end_position = self.current_block();
        MetricsLogger::log_pass_completed(
            summary.blocks_scanned,
            summary.end_position,
            started.elapsed().as_millis() as u64,
        );

        result.map(|_| summary)
    }

    async fn run_pass(&self, cancel: &CancellationToken, summary: &mut ScanSummary) -> Result<()> {
        loop {
            self.set_state(ScannerState::Fetching);
            let next = self
                .get_next_block(cancel)
                .await
                .map_err(|e| ScanError::NextBlock(Box::new(e)))?;
            if next == 0 {
                return Ok(());
            }

            let started = Instant::now();
            let block = self.scan_block(cancel, next).await.map_err(|e| ScanError::Fetch {
                block_number: next,
                source: Box::new(e),
            })?;

            self.set_state(ScannerState::Indexing);
            let tx_count = block.transactions.len();
            let written = self
                .save_txs_to_subscribers(block.transactions)
                .map_err(|e| ScanError::Index {
                    block_number: next,
                    source: Box::new(e),
                })?;

            self.position.fetch_max(next, Ordering::SeqCst);
            summary.blocks_scanned += 1;
            summary.transactions_indexed += written;

            MetricsLogger::log_block_scanned(next, tx_count, written, started.elapsed().as_millis() as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::codec::decode_transactions;
    use crate::database::MemoryStore;
    use crate::error::{IndexerError, NetworkError};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeChain {
        tip: AtomicU64,
        blocks: StdMutex<HashMap<u64, Vec<Transaction>>>,
        failing_blocks: StdMutex<HashSet<u64>>,
        fetched: StdMutex<Vec<u64>>,
        fetch_delay: Option<Duration>,
    }

    impl FakeChain {
        fn with_tip(tip: u64) -> Self {
            let chain = FakeChain::default();
            chain.tip.store(tip, Ordering::SeqCst);
            chain
        }

        fn add_block(&self, number: u64, txs: Vec<Transaction>) {
            self.blocks.lock().unwrap().insert(number, txs);
        }

        fn fail_block(&self, number: u64) {
            self.failing_blocks.lock().unwrap().insert(number);
        }

        fn fetched(&self) -> Vec<u64> {
            self.fetched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChainClient for FakeChain {
        async fn get_current_block_number(&self, _cancel: &CancellationToken) -> Result<u64> {
            Ok(self.tip.load(Ordering::SeqCst))
        }

        async fn get_block_by_number(&self, _cancel: &CancellationToken, number: u64) -> Result<Block> {
            if let Some(delay) = self.fetch_delay {
                tokio::time::sleep(delay).await;
            }
            self.fetched.lock().unwrap().push(number);
            if self.failing_blocks.lock().unwrap().contains(&number) {
                return Err(NetworkError::Status { status: 502 }.into());
            }
            let transactions = self.blocks.lock().unwrap().get(&number).cloned().unwrap_or_default();
            Ok(Block {
                number,
                hash: format!("0xblock{}", number),
                transactions,
                ..Default::default()
            })
        }
    }

    fn tx(hash: &str, from: &str, to: Option<&str>) -> Transaction {
        Transaction {
            hash: hash.to_string(),
            from: from.to_string(),
            to: to.map(str::to_string),
            value: "0x1".to_string(),
            ..Default::default()
        }
    }

    fn subscribed_store(addresses: &[&str]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for address in addresses {
            store.put(address, Vec::new()).unwrap();
        }
        store
    }

    fn hashes(store: &MemoryStore, address: &str) -> Vec<String> {
        let records = store.get(address).unwrap();
        decode_transactions(&records)
            .unwrap()
            .into_iter()
            .map(|tx| tx.hash)
            .collect()
    }

    #[tokio::test]
    async fn test_get_next_block() {
        let chain = Arc::new(FakeChain::with_tip(100));
        let store = subscribed_store(&[]);
        let cancel = CancellationToken::new();

        // uninitialized jumps to the tip
        let scanner = Scanner::new(chain.clone(), store.clone(), 0);
        assert_eq!(scanner.get_next_block(&cancel).await.unwrap(), 100);

        // caught up
        let scanner = Scanner::new(chain.clone(), store.clone(), 100);
        assert_eq!(scanner.get_next_block(&cancel).await.unwrap(), 0);

        // behind the tip
        let scanner = Scanner::new(chain.clone(), store.clone(), 98);
        assert_eq!(scanner.get_next_block(&cancel).await.unwrap(), 99);

        // tip reported lower than position, e.g. a lagging node
        let scanner = Scanner::new(chain, store, 150);
        assert_eq!(scanner.get_next_block(&cancel).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_scan_block_leaves_position_alone() {
        let chain = Arc::new(FakeChain::with_tip(10));
        chain.add_block(5, vec![tx("0x1", "0xa", Some("0xb"))]);
        let scanner = Scanner::new(chain, subscribed_store(&[]), 3);

        let block = scanner.scan_block(&CancellationToken::new(), 5).await.unwrap();
        assert_eq!(block.number, 5);
        assert_eq!(block.transactions.len(), 1);
        assert_eq!(scanner.current_block(), 3);
    }

    #[test]
    fn test_filter_subscribed_txs() {
        let chain = Arc::new(FakeChain::with_tip(1));
        let scanner = Scanner::new(chain, subscribed_store(&["0xa", "0xc"]), 0);

        let txs = vec![
            tx("0x1", "0xa", Some("0xb")),
            tx("0x2", "0xd", Some("0xe")),
            tx("0x3", "0xf", Some("0xc")),
            tx("0x4", "0xd", None),
        ];

        let kept: Vec<String> = scanner
            .filter_subscribed_txs(txs)
            .into_iter()
            .map(|tx| tx.hash)
            .collect();
        assert_eq!(kept, vec!["0x1".to_string(), "0x3".to_string()]);
    }

    #[test]
    fn test_save_txs_appends_to_every_subscribed_role() {
        let chain = Arc::new(FakeChain::with_tip(1));
        let store = subscribed_store(&["0xa", "0xb"]);
        let scanner = Scanner::new(chain, store.clone(), 0);

        let txs = vec![
            tx("0x1", "0xa", Some("0xb")),
            tx("0x2", "0xb", Some("0xz")),
            tx("0x3", "0xa", None),
        ];

        let written = scanner.save_txs(&txs).unwrap();
        assert_eq!(written, 4);
        assert_eq!(hashes(&store, "0xa"), vec!["0x1", "0x3"]);
        assert_eq!(hashes(&store, "0xb"), vec!["0x1", "0x2"]);
        assert!(!store.has("0xz"));
    }

    #[test]
    fn test_save_txs_records_self_transfer_twice() {
        let chain = Arc::new(FakeChain::with_tip(1));
        let store = subscribed_store(&["0xa"]);
        let scanner = Scanner::new(chain, store.clone(), 0);

        scanner.save_txs(&[tx("0xself", "0xa", Some("0xa"))]).unwrap();
        assert_eq!(hashes(&store, "0xa"), vec!["0xself", "0xself"]);
    }

    #[test]
    fn test_save_txs_matches_mixed_case_participants() {
        let chain = Arc::new(FakeChain::with_tip(1));
        let store = subscribed_store(&["0xabcdef"]);
        let scanner = Scanner::new(chain, store.clone(), 0);

        let written = scanner
            .save_txs_to_subscribers(vec![tx("0x1", "0xABCDEF", Some("0x2"))])
            .unwrap();
        assert_eq!(written, 1);
        assert_eq!(hashes(&store, "0xabcdef"), vec!["0x1"]);
    }

    #[tokio::test]
    async fn test_scan_all_first_pass_indexes_tip_only() {
        let chain = Arc::new(FakeChain::with_tip(50));
        chain.add_block(50, vec![tx("0xtip", "0xa", Some("0xb"))]);
        let store = subscribed_store(&["0xa"]);
        let scanner = Scanner::new(chain.clone(), store.clone(), 0);

        let summary = scanner.scan_all(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.blocks_scanned, 1);
        assert_eq!(summary.end_position, 50);
        assert_eq!(scanner.current_block(), 50);
        assert_eq!(chain.fetched(), vec![50]);
        assert_eq!(hashes(&store, "0xa"), vec!["0xtip"]);
    }

    #[tokio::test]
    async fn test_scan_all_catches_up_in_order() {
        let chain = Arc::new(FakeChain::with_tip(13));
        chain.add_block(11, vec![tx("0x11", "0xa", Some("0xb"))]);
        chain.add_block(12, vec![tx("0x12", "0xc", Some("0xa"))]);
        chain.add_block(13, vec![tx("0x13", "0xa", None)]);
        let store = subscribed_store(&["0xa"]);
        let scanner = Scanner::new(chain.clone(), store.clone(), 10);

        let summary = scanner.scan_all(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.start_position, 10);
        assert_eq!(summary.end_position, 13);
        assert_eq!(summary.blocks_scanned, 3);
        assert_eq!(summary.transactions_indexed, 3);
        assert!(!summary.skipped);
        assert_eq!(chain.fetched(), vec![11, 12, 13]);
        assert_eq!(hashes(&store, "0xa"), vec!["0x11", "0x12", "0x13"]);
        assert_eq!(scanner.state(), ScannerState::Idle);

        // caught up: nothing fetched on the next pass
        let summary = scanner.scan_all(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.blocks_scanned, 0);
        assert_eq!(chain.fetched().len(), 3);
    }

    #[tokio::test]
    async fn test_scan_all_failure_keeps_position_and_retries_block() {
        let chain = Arc::new(FakeChain::with_tip(12));
        chain.add_block(11, vec![tx("0x11", "0xa", None)]);
        chain.add_block(12, vec![tx("0x12", "0xa", None)]);
        chain.fail_block(12);
        let store = subscribed_store(&["0xa"]);
        let scanner = Scanner::new(chain.clone(), store.clone(), 10);

        let err = scanner.scan_all(&CancellationToken::new()).await.unwrap_err();
        match &err {
            IndexerError::Scan(scan) => assert_eq!(scan.block_number(), Some(12)),
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(scanner.current_block(), 11);
        assert_eq!(scanner.state(), ScannerState::Idle);
        assert_eq!(hashes(&store, "0xa"), vec!["0x11"]);

        // the failed block is the first one tried next time
        chain.failing_blocks.lock().unwrap().clear();
        scanner.scan_all(&CancellationToken::new()).await.unwrap();
        assert_eq!(chain.fetched(), vec![11, 12, 12]);
        assert_eq!(scanner.current_block(), 12);
        assert_eq!(hashes(&store, "0xa"), vec!["0x11", "0x12"]);
    }

    /// Memory store whose next write to `fail_key` is rejected
    struct FlakyStore {
        inner: MemoryStore,
        fail_key: String,
        fail_next: AtomicBool,
    }

    impl SubscriptionStore for FlakyStore {
        fn has(&self, key: &str) -> bool {
            self.inner.has(key)
        }

        fn get(&self, key: &str) -> std::result::Result<Vec<Record>, StoreError> {
            self.inner.get(key)
        }

        fn put(&self, key: &str, value: Vec<Record>) -> std::result::Result<(), StoreError> {
            self.inner.put(key, value)
        }

        fn update_many(
            &self,
            updates: Vec<(String, Updater<'_>)>,
        ) -> std::result::Result<(), StoreError> {
            let updates = updates
                .into_iter()
                .map(|(key, updater)| {
                    if key == self.fail_key && self.fail_next.swap(false, Ordering::SeqCst) {
                        let rejected: Updater<'_> = Box::new(|_: Vec<Record>| {
                            Err(StoreError::Lock("database is locked".to_string()))
                        });
                        (key, rejected)
                    } else {
                        (key, updater)
                    }
                })
                .collect();
            self.inner.update_many(updates)
        }

        fn list(&self) -> std::result::Result<Vec<String>, StoreError> {
            self.inner.list()
        }

        fn delete(&self, key: &str) -> std::result::Result<(), StoreError> {
            self.inner.delete(key)
        }
    }

    #[tokio::test]
    async fn test_retry_after_failed_write_indexes_block_once() {
        let chain = Arc::new(FakeChain::with_tip(11));
        chain.add_block(11, vec![tx("0x1", "0xa", Some("0xb"))]);
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            fail_key: "0xb".to_string(),
            fail_next: AtomicBool::new(true),
        });
        store.put("0xa", Vec::new()).unwrap();
        store.put("0xb", Vec::new()).unwrap();
        let scanner = Scanner::new(chain.clone(), store.clone(), 10);

        let err = scanner.scan_all(&CancellationToken::new()).await.unwrap_err();
        match &err {
            IndexerError::Scan(scan) => assert_eq!(scan.block_number(), Some(11)),
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(scanner.current_block(), 10);
        // the write to 0xa was rolled back with the failed one
        assert_eq!(hashes(&store.inner, "0xa"), Vec::<String>::new());

        scanner.scan_all(&CancellationToken::new()).await.unwrap();
        assert_eq!(chain.fetched(), vec![11, 11]);
        assert_eq!(scanner.current_block(), 11);
        assert_eq!(hashes(&store.inner, "0xa"), vec!["0x1"]);
        assert_eq!(hashes(&store.inner, "0xb"), vec!["0x1"]);
    }

    #[tokio::test]
    async fn test_scan_all_skips_when_pass_in_flight() {
        let chain = Arc::new(FakeChain {
            fetch_delay: Some(Duration::from_millis(100)),
            ..FakeChain::with_tip(3)
        });
        chain.add_block(2, vec![tx("0x2", "0xa", None)]);
        chain.add_block(3, vec![tx("0x3", "0xa", None)]);
        let store = subscribed_store(&["0xa"]);
        let scanner = Arc::new(Scanner::new(chain.clone(), store.clone(), 1));

        let first = {
            let scanner = scanner.clone();
            tokio::spawn(async move { scanner.scan_all(&CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = scanner.scan_all(&CancellationToken::new()).await.unwrap();
        assert!(second.skipped);
        assert_eq!(second.blocks_scanned, 0);

        let first = first.await.unwrap().unwrap();
        assert_eq!(first.blocks_scanned, 2);
        assert_eq!(chain.fetched(), vec![2, 3]);
        assert_eq!(hashes(&store, "0xa"), vec!["0x2", "0x3"]);
    }

    #[tokio::test]
    async fn test_cancelled_pass_reports_error() {
        struct CancelAware;

        #[async_trait]
        impl ChainClient for CancelAware {
            async fn get_current_block_number(&self, cancel: &CancellationToken) -> Result<u64> {
                if cancel.is_cancelled() {
                    return Err(NetworkError::Cancelled.into());
                }
                Ok(5)
            }

            async fn get_block_by_number(&self, _cancel: &CancellationToken, _number: u64) -> Result<Block> {
                Ok(Block::default())
            }
        }

        let scanner = Scanner::new(Arc::new(CancelAware), subscribed_store(&[]), 4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = scanner.scan_all(&cancel).await.unwrap_err();
        assert!(matches!(err, IndexerError::Scan(ScanError::NextBlock(_))));
        assert_eq!(scanner.current_block(), 4);
    }
}
