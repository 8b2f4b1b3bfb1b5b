use log::{debug, info};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::blockchain::{ScanSummary, Scanner};
use crate::error::Result;
use crate::logging::{ErrorLogger, LogContext};

pub struct BlockMonitorConfig {
    pub scan_interval: Duration,
}

impl BlockMonitorConfig {
    pub fn from_seconds(seconds: u64) -> Self {
        Self {
            scan_interval: Duration::from_secs(seconds),
        }
    }
}

impl Default for BlockMonitorConfig {
    fn default() -> Self {
        Self::from_seconds(10)
    }
}

/// Periodic driver for `Scanner::scan_all`.
///
/// Each pass is awaited before the next tick is taken, so passes never
/// overlap. Shutdown is observed between passes; a pass already running is
/// allowed to finish.
pub struct BlockMonitor {
    scanner: Arc<Scanner>,
    pub config: BlockMonitorConfig,
}

impl BlockMonitor {
    pub fn new(scanner: Arc<Scanner>, config: Option<BlockMonitorConfig>) -> Self {
        Self {
            scanner,
            config: config.unwrap_or_default(),
        }
    }

    /// Run passes on every tick until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        LogContext::new("block_monitor", "start")
            .with_metadata("scan_interval_ms", json!(self.config.scan_interval.as_millis() as u64))
            .with_metadata("position", json!(self.scanner.current_block()))
            .info("Starting block monitor");

        let mut ticker = interval(self.config.scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.run_pass().await {
                let context = LogContext::new("block_monitor", "scan_pass")
                    .with_metadata("position", json!(self.scanner.current_block()));
                ErrorLogger::log_error(&e, Some(context));
            }
        }

        info!(
            "Block monitor stopped at block {}",
            self.scanner.current_block()
        );
    }

    /// One pass, detached from the shutdown token so it is never cut off mid-block
    pub async fn run_pass(&self) -> Result<ScanSummary> {
        let summary = self.scanner.scan_all(&CancellationToken::new()).await?;
        if summary.skipped {
            debug!("Scan pass skipped, another pass is in flight");
        }
        Ok(summary)
    }
}
