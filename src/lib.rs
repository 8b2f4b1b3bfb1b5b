pub mod api;
pub mod blockchain;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod service;

pub use blockchain::{BlockMonitor, ChainClient, RpcClient, ScanSummary, Scanner};
pub use config::{ApiConfig, AppConfig, LoggingConfig, RpcConfig, ScannerConfig, StorageConfig};
pub use database::{MemoryStore, SqliteStore, SubscriptionStore};
pub use error::{IndexerError, Result};
pub use logging::{ErrorLogger, LogContext, MetricsLogger, PerformanceMonitor};
pub use service::IndexingService;
