use thiserror::Error;

/// Failure taxonomy for the trading engine.
///
/// Each variant maps to one recovery policy in the cycle state
/// machine: `DataUnavailable` is fatal on the history fetch and reads
/// as zero on a balance fetch, `OrderRejected` suppresses the audit
/// record for the order that never executed, `WriteError` and
/// `Forecast` are contained within the cycle that raised them.
#[derive(Debug, Error)]
pub enum BotError {
    /// Market data or a balance query failed, or the returned history
    /// could not form a valid price window.
    #[error("market data unavailable: {0}")]
    DataUnavailable(String),

    /// The exchange refused an order, or submission failed outright.
    #[error("order rejected: {0}")]
    OrderRejected(String),

    /// The trade log could not be written.
    #[error("trade log write failed: {0}")]
    WriteError(#[from] csv::Error),

    /// The forecaster could not produce a finite prediction.
    #[error("forecast failed: {0}")]
    Forecast(String),
}

pub type Result<T> = std::result::Result<T, BotError>;
