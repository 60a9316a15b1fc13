// Exchange access
pub mod kraken;

pub use kraken::{KrakenClient, KrakenCredentials};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{AccountBalances, OhlcBar, OrderId, TradeSide};

/// Everything the trading engine needs from an exchange.
///
/// The engine only depends on this trait, so tests can substitute a
/// stub and the Kraken specifics stay inside one module.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Fetch recent OHLC bars for a pair, oldest first.
    async fn price_history(&self, pair: &str, interval_minutes: u32) -> Result<Vec<OhlcBar>>;

    /// Fetch current account balances for the configured assets.
    async fn balances(&self) -> Result<AccountBalances>;

    /// Place a market order and return the exchange's order id.
    async fn market_order(&self, pair: &str, side: TradeSide, volume: f64) -> Result<OrderId>;

    /// Place a stop-loss order at the given trigger price.
    async fn stop_loss_order(
        &self,
        pair: &str,
        side: TradeSide,
        stop_price: f64,
        volume: f64,
    ) -> Result<OrderId>;
}

/// Shared gateways delegate to the inner implementation.
#[async_trait]
impl<T: ExchangeGateway + ?Sized> ExchangeGateway for std::sync::Arc<T> {
    async fn price_history(&self, pair: &str, interval_minutes: u32) -> Result<Vec<OhlcBar>> {
        self.as_ref().price_history(pair, interval_minutes).await
    }

    async fn balances(&self) -> Result<AccountBalances> {
        self.as_ref().balances().await
    }

    async fn market_order(&self, pair: &str, side: TradeSide, volume: f64) -> Result<OrderId> {
        self.as_ref().market_order(pair, side, volume).await
    }

    async fn stop_loss_order(
        &self,
        pair: &str,
        side: TradeSide,
        stop_price: f64,
        volume: f64,
    ) -> Result<OrderId> {
        self.as_ref()
            .stop_loss_order(pair, side, stop_price, volume)
            .await
    }
}
