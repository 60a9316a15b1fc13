use anyhow::Context;

use krakenbot::{
    ArForecaster, BotConfig, Forecaster, KrakenClient, KrakenCredentials, TradeLog, TradingEngine,
};

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter("krakenbot=info")
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    tracing::info!("🚀 Kraken trading bot starting");

    let config = BotConfig::from_env().context("invalid configuration")?;
    let credentials = KrakenCredentials::from_env()?;

    let forecaster: Box<dyn Forecaster> = Box::new(ArForecaster::default());
    if config.lookback < forecaster.min_window() {
        anyhow::bail!(
            "LOOKBACK {} is below the {} closes {} needs",
            config.lookback,
            forecaster.min_window(),
            forecaster.name()
        );
    }

    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Pair: {}", config.pair);
    tracing::info!(
        "  Forecaster: {} over the last {} closes",
        forecaster.name(),
        config.lookback
    );
    tracing::info!("  Cycle: every {}s", config.cycle_seconds);
    tracing::info!(
        "  Signal threshold: {} {}",
        config.signal_threshold,
        config.quote_asset
    );
    tracing::info!(
        "  Max spend per buy: {} {}",
        config.risk.max_usd_per_order,
        config.quote_asset
    );
    tracing::info!(
        "  Sell slice: {}%, stop-loss {}% below entry",
        config.risk.sell_percentage * 100.0,
        config.risk.stop_loss_pct * 100.0
    );
    tracing::info!("  Trade log: {}", config.trade_log_path.display());

    let gateway = KrakenClient::new(credentials)
        .with_assets(config.quote_asset.clone(), config.base_asset.clone());

    let trade_log = TradeLog::new(config.trade_log_path.clone());
    trade_log
        .initialize()
        .context("could not initialize trade log")?;

    let engine = TradingEngine::new(gateway, forecaster, trade_log, config);

    tracing::info!("\nPress Ctrl+C to stop...\n");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
        }
        result = engine.run() => {
            result.context("trading engine halted")?;
        }
    }

    tracing::info!("👋 Kraken trading bot stopped");
    Ok(())
}
