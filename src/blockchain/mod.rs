pub mod block_monitor;
pub mod rpc_client;
pub mod scanner;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::Block;

pub use block_monitor::{BlockMonitor, BlockMonitorConfig};
pub use rpc_client::RpcClient;
pub use scanner::{ScanSummary, Scanner, ScannerState};

/// Read-only view of a remote chain. Every call goes to the node; nothing is cached.
///
/// Implementations fail with `IndexerError::Network` on transport problems or
/// non-success responses, and `IndexerError::Decode` on malformed payloads.
/// A cancelled `cancel` token aborts the in-flight call with `NetworkError::Cancelled`.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current chain tip height
    async fn get_current_block_number(&self, cancel: &CancellationToken) -> Result<u64>;

    /// Full block including transaction objects
    async fn get_block_by_number(&self, cancel: &CancellationToken, number: u64) -> Result<Block>;
}
