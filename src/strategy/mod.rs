// Signal generation
//
// Turns a forecast into a trade signal by comparing the predicted move
// against a flat threshold in quote-currency units.

use crate::models::{Action, Forecast, TradeSignal};

/// Classify a forecast into buy, sell, or hold.
///
/// Moves whose magnitude does not clear `threshold` are noise and map
/// to hold. A move exactly on the threshold also holds, so a zero
/// threshold still ignores a zero move. The returned signal carries
/// the magnitude that was compared.
pub fn classify(forecast: &Forecast, threshold: f64) -> TradeSignal {
    let difference = forecast.difference();
    let action = if difference <= threshold {
        Action::Hold
    } else if forecast.signed_difference() > 0.0 {
        Action::Buy
    } else {
        Action::Sell
    };
    TradeSignal { action, difference }
}
