use log::warn;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::blockchain::Scanner;
use crate::database::codec::decode_transactions;
use crate::database::SubscriptionStore;
use crate::error::{DecodeError, IndexerError, Result};
use crate::logging::{ErrorLogger, LogContext};
use crate::models::{normalize_address, Block, Transaction};

/// Query and subscription surface shared by the HTTP handlers.
///
/// Addresses are normalized (trimmed, lowercased) before they reach the
/// store, so checksummed and lowercase forms name the same subscription.
pub struct IndexingService {
    scanner: Arc<Scanner>,
    store: Arc<dyn SubscriptionStore>,
}

impl IndexingService {
    pub fn new(scanner: Arc<Scanner>, store: Arc<dyn SubscriptionStore>) -> Self {
        Self { scanner, store }
    }

    pub fn scanner(&self) -> &Arc<Scanner> {
        &self.scanner
    }

    /// Register an address with an empty log.
    ///
    /// Returns false if it was already subscribed or the store failed; an
    /// existing log is never reset.
    pub fn subscribe(&self, address: &str) -> bool {
        match self.try_subscribe(address) {
            Ok(created) => created,
            Err(e) => {
                ErrorLogger::log_error(
                    &e,
                    Some(LogContext::new("service", "subscribe").with_address(&normalize_address(address))),
                );
                false
            }
        }
    }

    /// Like [`IndexingService::subscribe`] but a store failure is returned
    /// instead of folded into `false`.
    pub fn try_subscribe(&self, address: &str) -> Result<bool> {
        let key = normalize_address(address);
        let created = self.store.put_if_absent(&key, Vec::new())?;

        LogContext::new("service", "subscribe")
            .with_address(&key)
            .with_metadata("created", serde_json::json!(created))
            .info(if created {
                "Address subscribed"
            } else {
                "Address already subscribed"
            });
        Ok(created)
    }

    pub fn get_current_block(&self) -> u64 {
        self.scanner.current_block()
    }

    /// Transactions recorded for `address`, oldest first. Errors, including
    /// "not subscribed", are logged and reported as an empty list.
    pub fn get_transactions(&self, address: &str) -> Vec<Transaction> {
        match self.lookup_transactions(address) {
            Ok(txs) => txs,
            Err(e) => {
                if e.is_not_found() {
                    warn!("Transactions requested for unsubscribed address {}", address);
                } else {
                    ErrorLogger::log_error(
                        &e,
                        Some(LogContext::new("service", "get_transactions").with_address(address)),
                    );
                }
                Vec::new()
            }
        }
    }

    /// Like `get_transactions`, but a missing subscription is `StoreError::NotFound`
    pub fn lookup_transactions(&self, address: &str) -> Result<Vec<Transaction>> {
        let key = normalize_address(address);
        let records = self.store.get(&key)?;
        decode_transactions(&records).map_err(|e| IndexerError::Decode(DecodeError::Json(e)))
    }

    /// All subscribed addresses, sorted
    pub fn get_subscriptions(&self) -> Result<Vec<String>> {
        let mut keys = self.store.list()?;
        keys.sort();
        Ok(keys)
    }

    /// Fetch a block straight from the chain without indexing it
    pub async fn scan_block(&self, cancel: &CancellationToken, number: u64) -> Result<Block> {
        self.scanner.scan_block(cancel, number).await
    }
}
