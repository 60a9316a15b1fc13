// Core modules
pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod forecast;
pub mod models;
pub mod persistence;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use api::{ExchangeGateway, KrakenClient, KrakenCredentials};
pub use config::BotConfig;
pub use engine::{CycleOutcome, TradingEngine};
pub use error::{BotError, Result};
pub use forecast::{ArForecaster, Forecaster};
pub use models::*;
pub use persistence::TradeLog;
pub use risk::{RiskLimits, DUST_THRESHOLD};
