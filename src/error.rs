use thiserror::Error;

/// Main error type for the subscription indexer
#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Transport-level failures talking to the remote node
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected HTTP status: {status}")]
    Status { status: u16 },

    #[error("RPC method error: code={code}, message={message}")]
    Rpc { code: i64, message: String },

    #[error("Timeout after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request cancelled")]
    Cancelled,
}

/// Malformed payloads from the remote node or the record store
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("JSON decoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid hex quantity '{value}': {reason}")]
    Hex { value: String, reason: String },

    #[error("Missing result for {method}")]
    MissingResult { method: String },
}

/// SubscriptionStore failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Record codec failed: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Backend failure: {0}")]
    Backend(#[from] rusqlite::Error),

    #[error("Lock acquisition failed: {0}")]
    Lock(String),
}

/// Failure of a scan pass; the block in question was not indexed
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("failed to resolve next block: {0}")]
    NextBlock(#[source] Box<IndexerError>),

    #[error("failed to fetch block {block_number}: {source}")]
    Fetch {
        block_number: u64,
        #[source]
        source: Box<IndexerError>,
    },

    #[error("failed to index block {block_number}: {source}")]
    Index {
        block_number: u64,
        #[source]
        source: Box<IndexerError>,
    },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Configuration parsing failed: {0}")]
    Parsing(String),

    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
}

/// Validation errors for caller-supplied input
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid Ethereum address: {0}")]
    InvalidAddress(String),

    #[error("Invalid block number: {0}")]
    InvalidBlockNumber(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, IndexerError>;

/// Error severity levels for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Errors that stop the service from doing useful work
    Critical,
    /// Errors that affect functionality
    High,
    /// Errors that are expected to clear up on the next pass
    Medium,
    /// Mostly informational
    Low,
}

impl IndexerError {
    /// Get the severity level of an error
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            IndexerError::Config(_) => ErrorSeverity::Critical,
            IndexerError::Store(StoreError::Backend(_)) => ErrorSeverity::Critical,
            IndexerError::Store(StoreError::Lock(_)) => ErrorSeverity::Critical,

            IndexerError::Store(StoreError::Codec(_)) => ErrorSeverity::High,
            IndexerError::Decode(_) => ErrorSeverity::High,
            IndexerError::Network(NetworkError::Rpc { .. }) => ErrorSeverity::High,

            IndexerError::Network(_) => ErrorSeverity::Medium,
            IndexerError::Scan(scan) => scan.source_error().severity(),

            IndexerError::Store(StoreError::NotFound(_)) => ErrorSeverity::Low,
            IndexerError::Validation(_) => ErrorSeverity::Low,
        }
    }

    /// Whether the error means the address was never subscribed
    pub fn is_not_found(&self) -> bool {
        matches!(self, IndexerError::Store(StoreError::NotFound(_)))
    }
}

impl ScanError {
    /// The underlying failure, unwrapped from the pass context
    pub fn source_error(&self) -> &IndexerError {
        match self {
            ScanError::NextBlock(source) => source,
            ScanError::Fetch { source, .. } => source,
            ScanError::Index { source, .. } => source,
        }
    }

    /// The block that failed, if the failure happened past tip resolution
    pub fn block_number(&self) -> Option<u64> {
        match self {
            ScanError::NextBlock(_) => None,
            ScanError::Fetch { block_number, .. } | ScanError::Index { block_number, .. } => {
                Some(*block_number)
            }
        }
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(err: serde_json::Error) -> Self {
        IndexerError::Decode(DecodeError::Json(err))
    }
}
