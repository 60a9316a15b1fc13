use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use csv::WriterBuilder;
use tracing::info;

use crate::error::Result;
use crate::models::TradeRecord;

const HEADER: [&str; 10] = [
    "timestamp",
    "predicted_price",
    "close_price",
    "difference",
    "action",
    "volume",
    "expenditure",
    "profit",
    "quote_balance",
    "base_balance",
];

/// Append-only CSV log of cycle outcomes.
///
/// One row per completed cycle. The file is the bot's only persistent
/// state and is never read back or rewritten, so restarts just keep
/// appending to whatever history is already there.
pub struct TradeLog {
    path: PathBuf,
}

impl TradeLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the log file with its header row if it does not exist yet.
    /// An existing file is left untouched.
    pub fn initialize(&self) -> Result<()> {
        if self.path.exists() {
            info!("Trade log {} already exists, appending", self.path.display());
            return Ok(());
        }
        let mut writer = csv::Writer::from_path(&self.path)?;
        writer.write_record(HEADER)?;
        writer.flush().map_err(csv::Error::from)?;
        info!("Created trade log {}", self.path.display());
        Ok(())
    }

    /// Append one record.
    ///
    /// Prices and quote amounts are written with two decimals, volumes
    /// and base balances with eight, matching the exchange's own
    /// precision for each.
    pub fn append(&self, record: &TradeRecord) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(csv::Error::from)?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        writer.write_record([
            record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            format!("{:.2}", record.predicted_price),
            format!("{:.2}", record.close_price),
            format!("{:.2}", record.difference),
            record.action.as_str().to_string(),
            format!("{:.8}", record.volume),
            format!("{:.2}", record.expenditure),
            format!("{:.2}", record.profit),
            format!("{:.2}", record.quote_balance),
            format!("{:.8}", record.base_balance),
        ])?;
        writer.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}
