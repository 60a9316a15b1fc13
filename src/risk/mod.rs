// Position sizing and stop-loss pricing
mod sizing;

pub use sizing::{RiskLimits, DUST_THRESHOLD};
