use thiserror::Error;

/// Order-path failures. `Transient` variants are retried by the exchange
/// client with backoff; rejections are surfaced without retry.
#[derive(Debug, Error, Clone)]
pub enum OrderError {
    #[error("rate limited on {endpoint} bucket")]
    RateLimited { endpoint: String },

    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("network error: {0}")]
    Network(String),

    #[error("exchange rejected order: {reason}")]
    Rejected { reason: String },

    #[error("insufficient margin: needed {needed}, free {free}")]
    InsufficientMargin { needed: String, free: String },

    #[error("exchange {0} is not connected")]
    Disconnected(String),

    #[error("unknown exchange id: {0}")]
    UnknownExchange(String),

    #[error("position {0} not found")]
    PositionNotFound(uuid::Uuid),

    #[error("position {0} is already closed")]
    AlreadyClosed(uuid::Uuid),

    #[error("fill fraction {filled} below minimum {minimum}; order cancelled")]
    InsufficientFill { filled: String, minimum: String },

    #[error("engine is shutting down; new orders refused")]
    ShuttingDown,
}

impl OrderError {
    /// Transient failures may be retried; rejections must not be.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OrderError::Network(_) | OrderError::Timeout { .. } | OrderError::Disconnected(_)
        )
    }
}

#[derive(Debug, Error, Clone)]
pub enum PredictionError {
    #[error("insufficient market data: {got} candles, need {need}")]
    InsufficientData { got: usize, need: usize },

    #[error("market data source error: {0}")]
    DataSource(String),

    #[error("predictor error: {0}")]
    Model(String),
}

/// Control-channel failures reported back on command reply channels.
#[derive(Debug, Error, Clone)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("command rejected: {0}")]
    Rejected(String),

    #[error("engine is shutting down")]
    ShuttingDown,
}

/// Startup-fatal configuration and wiring errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("exchange startup failure: {0}")]
    ExchangeStartup(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
