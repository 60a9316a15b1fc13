use serde::{Deserialize, Serialize};

use crate::models::{OrderIntent, TradeSide};

/// Smallest order volume worth sending, in base-currency units.
/// Anything at or below this is suppressed rather than submitted.
pub const DUST_THRESHOLD: f64 = 0.0001;

/// Sizing limits applied to every order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_usd_per_order: f64,
    pub sell_percentage: f64,
    pub stop_loss_pct: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_usd_per_order: 33.0, // quote units spent per buy, at most
            sell_percentage: 0.25,   // fraction of holdings sold per cycle
            stop_loss_pct: 0.10,     // stop distance below the entry close
        }
    }
}

impl RiskLimits {
    /// Volume for a market buy, bounded by the per-order cap and the
    /// available balance. `None` when there is nothing sensible to buy.
    pub fn size_buy(&self, quote_balance: f64, last_close: f64) -> Option<f64> {
        if quote_balance <= 0.0 {
            return None;
        }
        let capped = self.max_usd_per_order / last_close;
        let affordable = quote_balance / last_close;
        let volume = capped.min(affordable);
        if volume <= DUST_THRESHOLD {
            return None;
        }
        Some(volume)
    }

    /// Protective stop for a buy at `last_close`, rounded to the
    /// exchange's one-decimal price tick.
    pub fn stop_price(&self, last_close: f64) -> f64 {
        (last_close * (1.0 - self.stop_loss_pct) * 10.0).round() / 10.0
    }

    /// Volume for a market sell: a fixed fraction of holdings, clamped
    /// between the dust threshold and the full balance.
    pub fn size_sell(&self, base_balance: f64) -> Option<f64> {
        if base_balance <= DUST_THRESHOLD {
            return None;
        }
        let portion = base_balance * self.sell_percentage;
        let volume = portion.min(base_balance).max(DUST_THRESHOLD);
        if volume <= DUST_THRESHOLD {
            return None;
        }
        Some(volume)
    }

    /// Complete buy intent, market order plus stop, or `None` when
    /// sizing suppresses the trade.
    pub fn plan_buy(&self, quote_balance: f64, last_close: f64) -> Option<OrderIntent> {
        self.size_buy(quote_balance, last_close)
            .map(|volume| OrderIntent {
                side: TradeSide::Buy,
                volume,
                stop_price: Some(self.stop_price(last_close)),
            })
    }

    /// Complete sell intent, stop-free, or `None` when suppressed.
    pub fn plan_sell(&self, base_balance: f64) -> Option<OrderIntent> {
        self.size_sell(base_balance).map(|volume| OrderIntent {
            side: TradeSide::Sell,
            volume,
            stop_price: None,
        })
    }
}
