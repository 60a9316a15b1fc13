// Price forecasting
//
// A forecaster takes a window of recent closes and predicts the next
// close. The engine only ever talks to the trait, so alternative models
// can be swapped in without touching the trading logic.

mod ar;

pub use ar::ArForecaster;

use crate::error::Result;

pub trait Forecaster: Send + Sync {
    /// Predict the next close from a window of historical closes,
    /// ordered oldest to newest.
    fn predict(&self, closes: &[f64]) -> Result<f64>;

    /// Smallest window `predict` accepts.
    fn min_window(&self) -> usize {
        2
    }

    fn name(&self) -> &str;
}
