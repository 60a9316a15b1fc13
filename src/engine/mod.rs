// Cycle orchestration
//
// One cycle runs fetch -> forecast -> classify -> trade -> record, then
// the engine sleeps until the next tick. Cycles never overlap and never
// retry; a failed step waits for the next scheduled cycle.

use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::api::ExchangeGateway;
use crate::config::BotConfig;
use crate::error::{BotError, Result};
use crate::forecast::Forecaster;
use crate::models::{
    AccountBalances, Action, Forecast, PriceWindow, TradeRecord, TradeSide, TradeSignal,
};
use crate::persistence::TradeLog;
use crate::strategy::classify;

/// What a single cycle did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    Bought { volume: f64 },
    Sold { volume: f64 },
    /// Signal was hold; nothing to do.
    Held,
    /// A trade was called for but not executed (no fundable volume, or
    /// the exchange rejected the order).
    Skipped,
}

pub struct TradingEngine<G> {
    gateway: G,
    forecaster: Box<dyn Forecaster>,
    trade_log: TradeLog,
    config: BotConfig,
}

impl<G: ExchangeGateway> TradingEngine<G> {
    pub fn new(
        gateway: G,
        forecaster: Box<dyn Forecaster>,
        trade_log: TradeLog,
        config: BotConfig,
    ) -> Self {
        Self {
            gateway,
            forecaster,
            trade_log,
            config,
        }
    }

    /// Run cycles forever on the configured cadence.
    ///
    /// The first cycle starts immediately. Only an unavailable market
    /// data feed halts the loop; everything else is logged and waits
    /// for the next tick.
    pub async fn run(&self) -> Result<()> {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.cycle_seconds));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            "🔄 Trading {} every {}s with {}",
            self.config.pair,
            self.config.cycle_seconds,
            self.forecaster.name()
        );
        loop {
            ticker.tick().await;
            match self.run_cycle().await {
                Ok(outcome) => info!("Cycle complete: {:?}", outcome),
                Err(err @ BotError::DataUnavailable(_)) => {
                    error!("✗ Market data unavailable, halting: {}", err);
                    return Err(err);
                }
                Err(err) => warn!("⚠️ Cycle failed: {}", err),
            }
        }
    }

    /// Execute exactly one trading cycle.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let bars = self
            .gateway
            .price_history(&self.config.pair, self.config.ohlc_interval_minutes)
            .await?;
        let window = PriceWindow::from_bars(&bars, self.config.lookback)?;
        let predicted = self.forecaster.predict(window.closes())?;
        let forecast = Forecast::new(predicted, window.last_close())?;
        let signal = classify(&forecast, self.config.signal_threshold);
        info!(
            "📊 {}: close={:.2} predicted={:.2} diff={:+.2} -> {}",
            self.config.pair,
            forecast.last_close,
            forecast.predicted,
            forecast.signed_difference(),
            signal.action.as_str()
        );

        let outcome = match signal.action {
            Action::Buy => self.buy_flow(&forecast, &signal).await,
            Action::Sell => self.sell_flow(&forecast, &signal).await,
            Action::Hold => CycleOutcome::Held,
        };
        Ok(outcome)
    }

    async fn buy_flow(&self, forecast: &Forecast, signal: &TradeSignal) -> CycleOutcome {
        let balances = self.fresh_balances().await;
        let intent = match self.config.risk.plan_buy(balances.quote, forecast.last_close) {
            Some(intent) => intent,
            None => {
                info!(
                    "Buy suppressed: quote balance {:.2} funds no tradable volume",
                    balances.quote
                );
                return CycleOutcome::Skipped;
            }
        };

        let order_id = match self
            .gateway
            .market_order(&self.config.pair, TradeSide::Buy, intent.volume)
            .await
        {
            Ok(id) => id,
            Err(err) => {
                warn!("✗ Market buy rejected: {}", err);
                return CycleOutcome::Skipped;
            }
        };
        info!(
            "✓ Market buy {} placed: {:.8} @ ~{:.2}",
            order_id, intent.volume, forecast.last_close
        );

        if let Some(stop_price) = intent.stop_price {
            match self
                .gateway
                .stop_loss_order(&self.config.pair, TradeSide::Sell, stop_price, intent.volume)
                .await
            {
                Ok(stop_id) => info!("✓ Stop-loss {} placed at {:.1}", stop_id, stop_price),
                // The filled buy stands either way; the position just
                // rides unprotected until the next cycle.
                Err(err) => warn!("⚠️ Stop-loss rejected, position unprotected: {}", err),
            }
        }

        let expenditure = intent.volume * forecast.last_close;
        self.record(forecast, signal, intent.volume, expenditure, 0.0)
            .await;
        CycleOutcome::Bought {
            volume: intent.volume,
        }
    }

    async fn sell_flow(&self, forecast: &Forecast, signal: &TradeSignal) -> CycleOutcome {
        let balances = self.fresh_balances().await;
        let intent = match self.config.risk.plan_sell(balances.base) {
            Some(intent) => intent,
            None => {
                info!(
                    "Sell suppressed: base balance {:.8} is below dust",
                    balances.base
                );
                return CycleOutcome::Skipped;
            }
        };

        let order_id = match self
            .gateway
            .market_order(&self.config.pair, TradeSide::Sell, intent.volume)
            .await
        {
            Ok(id) => id,
            Err(err) => {
                warn!("✗ Market sell rejected: {}", err);
                return CycleOutcome::Skipped;
            }
        };
        info!(
            "✓ Market sell {} placed: {:.8} @ ~{:.2}",
            order_id, intent.volume, forecast.last_close
        );

        let proceeds = intent.volume * forecast.last_close;
        self.record(forecast, signal, intent.volume, 0.0, proceeds)
            .await;
        CycleOutcome::Sold {
            volume: intent.volume,
        }
    }

    /// Current balances, or empty ones when the query fails. Sizing on
    /// zeros suppresses the trade, so an outage never places an order
    /// on stale numbers.
    async fn fresh_balances(&self) -> AccountBalances {
        match self.gateway.balances().await {
            Ok(balances) => balances,
            Err(err) => {
                warn!("⚠️ Balance fetch failed, treating balances as empty: {}", err);
                AccountBalances::default()
            }
        }
    }

    /// Append the audit row for an executed order. Balances are fetched
    /// again after the trade; the exchange settles asynchronously, so
    /// they show whatever it reports at that moment. A failed write is
    /// logged and the cycle carries on.
    async fn record(
        &self,
        forecast: &Forecast,
        signal: &TradeSignal,
        volume: f64,
        expenditure: f64,
        profit: f64,
    ) {
        let balances = self.fresh_balances().await;
        let record = TradeRecord {
            timestamp: Utc::now(),
            predicted_price: forecast.predicted,
            close_price: forecast.last_close,
            // The log keeps the sign even though the signal compared
            // magnitudes, so a row shows which way the call went.
            difference: forecast.signed_difference(),
            action: signal.action,
            volume,
            expenditure,
            profit,
            quote_balance: balances.quote,
            base_balance: balances.base,
        };
        if let Err(err) = self.trade_log.append(&record) {
            error!("✗ Failed to append trade record: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::ArForecaster;
    use crate::models::{OhlcBar, OrderId};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct StubGateway {
        closes: Vec<f64>,
        history_error: Option<String>,
        quote: f64,
        base: f64,
        balances_error: bool,
        reject_market: bool,
        reject_stop: bool,
        balance_calls: AtomicUsize,
        market_orders: Mutex<Vec<(TradeSide, f64)>>,
        stop_orders: Mutex<Vec<(f64, f64)>>,
    }

    fn bars(closes: &[f64]) -> Vec<OhlcBar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| OhlcBar {
                timestamp: Utc.timestamp_opt(1_700_000_000 + i as i64 * 60, 0).unwrap(),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1.0,
            })
            .collect()
    }

    #[async_trait]
    impl ExchangeGateway for StubGateway {
        async fn price_history(&self, _pair: &str, _interval: u32) -> Result<Vec<OhlcBar>> {
            match &self.history_error {
                Some(msg) => Err(BotError::DataUnavailable(msg.clone())),
                None => Ok(bars(&self.closes)),
            }
        }

        async fn balances(&self) -> Result<AccountBalances> {
            self.balance_calls.fetch_add(1, Ordering::SeqCst);
            if self.balances_error {
                return Err(BotError::DataUnavailable("balance endpoint down".into()));
            }
            Ok(AccountBalances {
                quote: self.quote,
                base: self.base,
            })
        }

        async fn market_order(&self, _pair: &str, side: TradeSide, volume: f64) -> Result<OrderId> {
            if self.reject_market {
                return Err(BotError::OrderRejected("insufficient funds".into()));
            }
            self.market_orders.lock().unwrap().push((side, volume));
            Ok(OrderId("TEST-MARKET".into()))
        }

        async fn stop_loss_order(
            &self,
            _pair: &str,
            _side: TradeSide,
            stop_price: f64,
            volume: f64,
        ) -> Result<OrderId> {
            if self.reject_stop {
                return Err(BotError::OrderRejected("stop rejected".into()));
            }
            self.stop_orders.lock().unwrap().push((stop_price, volume));
            Ok(OrderId("TEST-STOP".into()))
        }
    }

    fn test_config() -> BotConfig {
        BotConfig {
            lookback: 10,
            ..BotConfig::default()
        }
    }

    fn engine_with(
        stub: Arc<StubGateway>,
        log_path: PathBuf,
    ) -> TradingEngine<Arc<StubGateway>> {
        TradingEngine::new(
            stub,
            Box::new(ArForecaster::default()),
            TradeLog::new(log_path),
            test_config(),
        )
    }

    fn rising_closes() -> Vec<f64> {
        // Steady +20 steps; the forecaster extrapolates the next close
        // to 340 against a last close of 320.
        (0..12).map(|i| 100.0 + 20.0 * i as f64).collect()
    }

    fn falling_closes() -> Vec<f64> {
        (0..12).map(|i| 320.0 - 20.0 * i as f64).collect()
    }

    #[tokio::test]
    async fn test_hold_places_no_orders_and_writes_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("log.csv");
        let stub = Arc::new(StubGateway {
            closes: vec![100.0; 20],
            quote: 50.0,
            base: 2.0,
            ..StubGateway::default()
        });
        let engine = engine_with(Arc::clone(&stub), log_path.clone());

        let outcome = engine.run_cycle().await.unwrap();

        assert_eq!(outcome, CycleOutcome::Held);
        assert_eq!(stub.balance_calls.load(Ordering::SeqCst), 0);
        assert!(stub.market_orders.lock().unwrap().is_empty());
        assert!(!log_path.exists());
    }

    #[tokio::test]
    async fn test_buy_cycle_places_orders_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("log.csv");
        let stub = Arc::new(StubGateway {
            closes: rising_closes(),
            quote: 50.0,
            ..StubGateway::default()
        });
        let engine = engine_with(Arc::clone(&stub), log_path.clone());

        let outcome = engine.run_cycle().await.unwrap();

        let expected_volume = 33.0 / 320.0;
        assert_eq!(
            outcome,
            CycleOutcome::Bought {
                volume: expected_volume
            }
        );
        assert_eq!(
            *stub.market_orders.lock().unwrap(),
            vec![(TradeSide::Buy, expected_volume)]
        );
        assert_eq!(*stub.stop_orders.lock().unwrap(), vec![(288.0, expected_volume)]);
        // One fetch to size the buy, one for the audit row.
        assert_eq!(stub.balance_calls.load(Ordering::SeqCst), 2);

        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert!(contents.contains("340.00,320.00,20.00,buy,0.10312500,33.00,0.00,50.00,0.00000000"));
    }

    #[tokio::test]
    async fn test_sell_cycle_places_order_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("log.csv");
        let stub = Arc::new(StubGateway {
            closes: falling_closes(),
            quote: 10.0,
            base: 2.0,
            ..StubGateway::default()
        });
        let engine = engine_with(Arc::clone(&stub), log_path.clone());

        let outcome = engine.run_cycle().await.unwrap();

        assert_eq!(outcome, CycleOutcome::Sold { volume: 0.5 });
        assert_eq!(
            *stub.market_orders.lock().unwrap(),
            vec![(TradeSide::Sell, 0.5)]
        );
        assert!(stub.stop_orders.lock().unwrap().is_empty());
        assert_eq!(stub.balance_calls.load(Ordering::SeqCst), 2);

        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert!(contents.contains("80.00,100.00,-20.00,sell,0.50000000,0.00,50.00"));
    }

    #[tokio::test]
    async fn test_buy_with_no_funds_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("log.csv");
        let stub = Arc::new(StubGateway {
            closes: rising_closes(),
            quote: 0.0,
            ..StubGateway::default()
        });
        let engine = engine_with(Arc::clone(&stub), log_path.clone());

        let outcome = engine.run_cycle().await.unwrap();

        assert_eq!(outcome, CycleOutcome::Skipped);
        assert!(stub.market_orders.lock().unwrap().is_empty());
        assert!(!log_path.exists());
    }

    #[tokio::test]
    async fn test_balance_outage_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("log.csv");
        let stub = Arc::new(StubGateway {
            closes: rising_closes(),
            quote: 50.0,
            balances_error: true,
            ..StubGateway::default()
        });
        let engine = engine_with(Arc::clone(&stub), log_path.clone());

        let outcome = engine.run_cycle().await.unwrap();

        // No balance data means no order, never an order on stale data.
        assert_eq!(outcome, CycleOutcome::Skipped);
        assert!(stub.market_orders.lock().unwrap().is_empty());
        assert!(!log_path.exists());
    }

    #[tokio::test]
    async fn test_rejected_buy_writes_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("log.csv");
        let stub = Arc::new(StubGateway {
            closes: rising_closes(),
            quote: 50.0,
            reject_market: true,
            ..StubGateway::default()
        });
        let engine = engine_with(Arc::clone(&stub), log_path.clone());

        let outcome = engine.run_cycle().await.unwrap();

        assert_eq!(outcome, CycleOutcome::Skipped);
        assert!(stub.stop_orders.lock().unwrap().is_empty());
        assert!(!log_path.exists());
    }

    #[tokio::test]
    async fn test_rejected_stop_still_records_the_buy() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("log.csv");
        let stub = Arc::new(StubGateway {
            closes: rising_closes(),
            quote: 50.0,
            reject_stop: true,
            ..StubGateway::default()
        });
        let engine = engine_with(Arc::clone(&stub), log_path.clone());

        let outcome = engine.run_cycle().await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Bought { .. }));
        assert!(stub.stop_orders.lock().unwrap().is_empty());
        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert!(contents.contains(",buy,"));
    }

    #[tokio::test]
    async fn test_history_outage_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubGateway {
            history_error: Some("OHLC endpoint down".into()),
            ..StubGateway::default()
        });
        let engine = engine_with(Arc::clone(&stub), dir.path().join("log.csv"));

        let err = engine.run_cycle().await.unwrap_err();
        assert!(matches!(err, BotError::DataUnavailable(_)));
    }

    #[tokio::test]
    async fn test_short_history_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubGateway {
            closes: vec![100.0; 5],
            ..StubGateway::default()
        });
        let engine = engine_with(Arc::clone(&stub), dir.path().join("log.csv"));

        let err = engine.run_cycle().await.unwrap_err();
        assert!(matches!(err, BotError::DataUnavailable(_)));
    }

    #[tokio::test]
    async fn test_write_failure_does_not_abort_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("missing").join("log.csv");
        let stub = Arc::new(StubGateway {
            closes: rising_closes(),
            quote: 50.0,
            ..StubGateway::default()
        });
        let engine = engine_with(Arc::clone(&stub), log_path);

        let outcome = engine.run_cycle().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Bought { .. }));
    }

    #[tokio::test]
    async fn test_forecast_failure_places_no_orders() {
        struct FailingForecaster;

        impl Forecaster for FailingForecaster {
            fn predict(&self, _closes: &[f64]) -> Result<f64> {
                Err(BotError::Forecast("model exploded".into()))
            }

            fn name(&self) -> &str {
                "failing"
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubGateway {
            closes: rising_closes(),
            quote: 50.0,
            ..StubGateway::default()
        });
        let engine = TradingEngine::new(
            Arc::clone(&stub),
            Box::new(FailingForecaster),
            TradeLog::new(dir.path().join("log.csv")),
            test_config(),
        );

        let err = engine.run_cycle().await.unwrap_err();

        assert!(matches!(err, BotError::Forecast(_)));
        assert!(stub.market_orders.lock().unwrap().is_empty());
        assert_eq!(stub.balance_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_balances_are_refetched_every_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubGateway {
            closes: rising_closes(),
            quote: 50.0,
            ..StubGateway::default()
        });
        let engine = engine_with(Arc::clone(&stub), dir.path().join("log.csv"));

        engine.run_cycle().await.unwrap();
        engine.run_cycle().await.unwrap();

        // Two per executed cycle, nothing cached in between.
        assert_eq!(stub.balance_calls.load(Ordering::SeqCst), 4);
    }
}
