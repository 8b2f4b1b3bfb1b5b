use clap::Parser;
use eth_subscription_indexer::api::ApiServer;
use eth_subscription_indexer::blockchain::{BlockMonitor, BlockMonitorConfig, RpcClient, Scanner};
use eth_subscription_indexer::config::AppConfig;
use eth_subscription_indexer::database::open_store;
use eth_subscription_indexer::logging::init_logging;
use eth_subscription_indexer::service::IndexingService;
use log::{error, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Tracks transactions touching subscribed Ethereum addresses")]
#[command(version)]
struct Args {
    /// HTTP listen address, `host:port` or `:port`
    #[arg(long)]
    addr: Option<String>,

    /// Use the testnet RPC endpoint
    #[arg(long)]
    testnet: bool,

    /// Treat this block as already scanned (0 starts at the chain tip)
    #[arg(long)]
    initial_block: Option<u64>,

    /// Seconds between scan passes
    #[arg(long)]
    scan_interval: Option<u64>,

    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(addr) = &self.addr {
            config.api.set_listen_address(addr)?;
        }
        if self.testnet {
            config.rpc.use_testnet = true;
        }
        if let Some(initial_block) = self.initial_block {
            config.scanner.initial_block = initial_block;
        }
        if let Some(scan_interval) = self.scan_interval {
            config.scanner.scan_interval_seconds = scan_interval;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            let mut config = AppConfig::load_from_path(path)?;
            config.apply_env_overrides()?;
            config
        }
        None => AppConfig::load()?,
    };
    args.apply(&mut config)?;
    config.validate()?;

    init_logging(&config.logging)?;
    info!("Starting Ethereum subscription indexer");

    let store = open_store(&config.storage)?;
    let endpoint = config.rpc.active_endpoint().to_string();
    info!(
        "Using {} endpoint {}",
        if config.rpc.use_testnet { "testnet" } else { "mainnet" },
        endpoint
    );
    let chain = Arc::new(RpcClient::new_with_config(endpoint, config.rpc.timeout_seconds)?);

    let scanner = Arc::new(Scanner::new(chain, store.clone(), config.scanner.initial_block));
    let service = Arc::new(IndexingService::new(scanner.clone(), store));

    let shutdown = listen_for_shutdown_signal();

    let monitor = BlockMonitor::new(
        scanner,
        Some(BlockMonitorConfig::from_seconds(config.scanner.scan_interval_seconds)),
    );
    let monitor_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { monitor.run(shutdown).await })
    };

    let server = ApiServer::new(service, config.api.bind_address());
    let server_result = server.start(shutdown.clone()).await;

    // a failed server takes the scanner down with it
    shutdown.cancel();
    if let Err(e) = monitor_handle.await {
        warn!("Block monitor task ended abnormally: {}", e);
    }

    if let Err(e) = server_result {
        error!("Server failed: {}", e);
        return Err(e.into());
    }

    info!("Shutdown complete");
    Ok(())
}

fn listen_for_shutdown_signal() -> CancellationToken {
    let cancellation_token = CancellationToken::new();
    let cancellation_token_clone = cancellation_token.clone();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {},
                        _ = sigterm.recv() => {},
                    }
                }
                Err(err) => {
                    warn!("Failed to install SIGTERM handler: {}", err);
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        info!("Shutdown signal received");
        cancellation_token_clone.cancel();
    });

    cancellation_token
}
