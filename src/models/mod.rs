use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BotError, Result};

/// One bar of OHLC market history.
///
/// Only the close participates in decisions; the rest of the bar is
/// kept for logging and inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OhlcBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Fixed-length window of closing prices, most recent last.
///
/// Built fresh each cycle from raw history. The forecaster only ever
/// sees a validated window: exact length, positive finite prices.
#[derive(Debug, Clone)]
pub struct PriceWindow {
    closes: Vec<f64>,
}

impl PriceWindow {
    /// Take the most recent `lookback` closes from `bars`.
    ///
    /// A longer history is truncated from the front; a shorter one is
    /// an error, as is any non-positive or non-finite close.
    pub fn from_bars(bars: &[OhlcBar], lookback: usize) -> Result<Self> {
        if lookback == 0 {
            return Err(BotError::DataUnavailable(
                "lookback of zero yields an empty window".to_string(),
            ));
        }
        if bars.len() < lookback {
            return Err(BotError::DataUnavailable(format!(
                "exchange returned {} bars, need {}",
                bars.len(),
                lookback
            )));
        }
        let closes: Vec<f64> = bars[bars.len() - lookback..]
            .iter()
            .map(|bar| bar.close)
            .collect();
        if closes.iter().any(|close| !close.is_finite() || *close <= 0.0) {
            return Err(BotError::DataUnavailable(
                "price history contains a non-positive close".to_string(),
            ));
        }
        Ok(Self { closes })
    }

    pub fn closes(&self) -> &[f64] {
        &self.closes
    }

    /// Most recent close. The constructor guarantees a non-empty window.
    pub fn last_close(&self) -> f64 {
        self.closes[self.closes.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.closes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }
}

/// A one-step-ahead prediction paired with the close it was derived from.
#[derive(Debug, Clone, Copy)]
pub struct Forecast {
    pub predicted: f64,
    pub last_close: f64,
}

impl Forecast {
    pub fn new(predicted: f64, last_close: f64) -> Result<Self> {
        if !predicted.is_finite() || !last_close.is_finite() {
            return Err(BotError::Forecast(format!(
                "non-finite forecast: predicted={predicted}, last_close={last_close}"
            )));
        }
        Ok(Self {
            predicted,
            last_close,
        })
    }

    /// Expected move with its sign, as persisted in the trade log.
    pub fn signed_difference(&self) -> f64 {
        self.predicted - self.last_close
    }

    /// Magnitude of the expected move, compared against the signal threshold.
    pub fn difference(&self) -> f64 {
        self.signed_difference().abs()
    }
}

/// Direction decided for the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "buy",
            Action::Sell => "sell",
            Action::Hold => "hold",
        }
    }
}

/// Outcome of the signal policy: an action plus the absolute
/// forecast-to-close difference the threshold was compared against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeSignal {
    pub action: Action,
    pub difference: f64,
}

/// Order side as the exchange understands it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

/// Spot balances at a single point in time.
///
/// Always re-fetched immediately before use. A failed query reads as
/// zero, which suppresses sizing rather than guessing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AccountBalances {
    pub quote: f64,
    pub base: f64,
}

/// A sized order ready for submission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderIntent {
    pub side: TradeSide,
    pub volume: f64,
    /// Protective stop for buys; sells carry none.
    pub stop_price: Option<f64>,
}

/// Exchange-assigned transaction id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderId(pub String);

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One immutable audit row, appended after every executed order.
#[derive(Debug, Clone, Serialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub predicted_price: f64,
    pub close_price: f64,
    /// Signed move (predicted minus close), so direction survives in the log.
    pub difference: f64,
    pub action: Action,
    pub volume: f64,
    pub expenditure: f64,
    pub profit: f64,
    pub quote_balance: f64,
    pub base_balance: f64,
}
