use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context};

use crate::risk::RiskLimits;

/// Runtime configuration, loaded once at startup and read-only after.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Kraken pair code, e.g. XXBTZUSD.
    pub pair: String,
    /// Balance key for the quote currency.
    pub quote_asset: String,
    /// Balance key for the base asset.
    pub base_asset: String,
    /// Number of closes handed to the forecaster each cycle.
    pub lookback: usize,
    /// Bar interval of the history query, in minutes.
    pub ohlc_interval_minutes: u32,
    /// Minimum |predicted - close| (in quote units) worth acting on.
    pub signal_threshold: f64,
    /// Seconds between cycles.
    pub cycle_seconds: u64,
    pub risk: RiskLimits,
    pub trade_log_path: PathBuf,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            pair: "XXBTZUSD".to_string(),
            quote_asset: "ZUSD".to_string(),
            base_asset: "XXBT".to_string(),
            lookback: 50,
            ohlc_interval_minutes: 1,
            signal_threshold: 15.0,
            cycle_seconds: 3600,
            risk: RiskLimits::default(),
            trade_log_path: PathBuf::from("trading_log.csv"),
        }
    }
}

impl BotConfig {
    /// Load configuration from the environment.
    ///
    /// Every variable is optional and falls back to its default, but a
    /// variable that is present and malformed (or out of range) fails
    /// startup rather than silently defaulting.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let config = Self {
            pair: env::var("TRADING_PAIR").unwrap_or(defaults.pair),
            quote_asset: env::var("QUOTE_ASSET").unwrap_or(defaults.quote_asset),
            base_asset: env::var("BASE_ASSET").unwrap_or(defaults.base_asset),
            lookback: parse_env("LOOKBACK", defaults.lookback)?,
            ohlc_interval_minutes: parse_env(
                "OHLC_INTERVAL_MINUTES",
                defaults.ohlc_interval_minutes,
            )?,
            signal_threshold: parse_env("SIGNAL_THRESHOLD", defaults.signal_threshold)?,
            cycle_seconds: parse_env("CYCLE_SECONDS", defaults.cycle_seconds)?,
            risk: RiskLimits {
                max_usd_per_order: parse_env("MAX_USD_PER_ORDER", defaults.risk.max_usd_per_order)?,
                sell_percentage: parse_env("SELL_PERCENTAGE", defaults.risk.sell_percentage)?,
                stop_loss_pct: parse_env("STOP_LOSS_PCT", defaults.risk.stop_loss_pct)?,
            },
            trade_log_path: env::var("TRADE_LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.trade_log_path),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.pair.is_empty() {
            bail!("TRADING_PAIR must not be empty");
        }
        if self.lookback < 2 {
            bail!("LOOKBACK must be at least 2, got {}", self.lookback);
        }
        if self.ohlc_interval_minutes == 0 {
            bail!("OHLC_INTERVAL_MINUTES must be positive");
        }
        if !self.signal_threshold.is_finite() || self.signal_threshold < 0.0 {
            bail!(
                "SIGNAL_THRESHOLD must be a non-negative number, got {}",
                self.signal_threshold
            );
        }
        if self.cycle_seconds == 0 {
            bail!("CYCLE_SECONDS must be positive");
        }
        if !self.risk.max_usd_per_order.is_finite() || self.risk.max_usd_per_order <= 0.0 {
            bail!(
                "MAX_USD_PER_ORDER must be positive, got {}",
                self.risk.max_usd_per_order
            );
        }
        if !(self.risk.sell_percentage > 0.0 && self.risk.sell_percentage <= 1.0) {
            bail!(
                "SELL_PERCENTAGE must be in (0, 1], got {}",
                self.risk.sell_percentage
            );
        }
        if !(self.risk.stop_loss_pct > 0.0 && self.risk.stop_loss_pct < 1.0) {
            bail!(
                "STOP_LOSS_PCT must be in (0, 1), got {}",
                self.risk.stop_loss_pct
            );
        }
        Ok(())
    }
}

/// Parse an optional environment variable, keeping the default when it
/// is absent and erroring when it is present but unparseable.
fn parse_env<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(env::VarError::NotUnicode(_)) => bail!("{key} is not valid unicode"),
    }
}
