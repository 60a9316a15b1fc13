use tracing::debug;

use crate::error::{BotError, Result};
use crate::forecast::Forecaster;

const DEFAULT_ORDER: usize = 5;

/// Autoregressive forecaster fitted on first differences.
///
/// Differencing the closes once removes the price level, so the model
/// only has to explain the step-to-step moves. The AR coefficients are
/// fitted with Levinson-Durbin on the autocovariance of the centered
/// differences, and the one-step-ahead difference is added back onto
/// the last close. Equivalent to an ARIMA(order, 1, 0) with drift.
pub struct ArForecaster {
    order: usize,
    name: String,
}

impl ArForecaster {
    pub fn new(order: usize) -> Self {
        let order = order.max(1);
        Self {
            order,
            name: format!("ar({order})"),
        }
    }
}

impl Default for ArForecaster {
    fn default() -> Self {
        Self::new(DEFAULT_ORDER)
    }
}

impl Forecaster for ArForecaster {
    fn predict(&self, closes: &[f64]) -> Result<f64> {
        if closes.len() < self.min_window() {
            return Err(BotError::Forecast(format!(
                "{} needs at least {} closes, got {}",
                self.name,
                self.min_window(),
                closes.len()
            )));
        }

        let last = closes[closes.len() - 1];
        let diffs: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
        let n = diffs.len();
        let mean = diffs.iter().sum::<f64>() / n as f64;
        let centered: Vec<f64> = diffs.iter().map(|d| d - mean).collect();

        let mut autocov = vec![0.0; self.order + 1];
        for (lag, r) in autocov.iter_mut().enumerate() {
            let mut sum = 0.0;
            for i in lag..n {
                sum += centered[i] * centered[i - lag];
            }
            *r = sum / n as f64;
        }

        // A (near-)zero variance means the differences carry no signal
        // beyond their mean, which covers both flat and perfectly linear
        // series. Fall back to pure drift.
        if autocov[0] <= f64::MIN_POSITIVE {
            return Ok(last + mean);
        }

        let phi = levinson_durbin(&autocov);
        let mut next_diff = mean;
        for (lag, coeff) in phi.iter().enumerate() {
            next_diff += coeff * centered[n - 1 - lag];
        }

        let predicted = last + next_diff;
        if !predicted.is_finite() {
            return Err(BotError::Forecast(format!(
                "{} produced a non-finite prediction",
                self.name
            )));
        }
        debug!(
            "{}: last={:.2} drift={:.4} next_diff={:.4} predicted={:.2}",
            self.name, last, mean, next_diff, predicted
        );
        Ok(predicted)
    }

    fn min_window(&self) -> usize {
        // One extra point beyond order + 1 differences so the highest
        // autocovariance lag has at least one term.
        self.order + 2
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Solve the Yule-Walker equations for the AR coefficients given the
/// autocovariance sequence `r[0..=order]`.
fn levinson_durbin(r: &[f64]) -> Vec<f64> {
    let order = r.len() - 1;
    let mut phi = vec![0.0; order];
    let mut prev = vec![0.0; order];
    let mut err = r[0];

    for m in 0..order {
        if err <= f64::MIN_POSITIVE {
            // Prediction error already vanished; higher lags add nothing.
            break;
        }
        let mut acc = r[m + 1];
        for j in 0..m {
            acc -= prev[j] * r[m - j];
        }
        let k = acc / err;
        for j in 0..m {
            phi[j] = prev[j] - k * prev[m - 1 - j];
        }
        phi[m] = k;
        err *= 1.0 - k * k;
        prev[..=m].copy_from_slice(&phi[..=m]);
    }

    phi
}
