//! Append-only CSV log of emitted signals.
//!
//! One line per emission: timestamp, symbol, per-timeframe states, risk,
//! entry, exit, RR. Append mode keeps interrupted writes from corrupting
//! earlier lines.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use aegis_core::{state_to_string, MarketState};

use crate::error::{PersistenceError, PersistenceResult};
use crate::fault::storage_fault_injected;

const HEADER: &str = "timestamp,symbol,state_1h,state_30m,state_15m,state_5m,risk,entry,exit,rr\n";

/// One signal log line.
#[derive(Debug, Clone)]
pub struct SignalLogEntry {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub state_1h: Option<MarketState>,
    pub state_30m: Option<MarketState>,
    pub state_15m: Option<MarketState>,
    pub state_5m: Option<MarketState>,
    pub risk: String,
    pub entry: Option<Decimal>,
    pub exit: Option<Decimal>,
    pub rr: Option<Decimal>,
}

/// The append-only writer.
pub struct SignalLogWriter {
    path: PathBuf,
}

impl SignalLogWriter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn append(&self, entry: &SignalLogEntry) -> PersistenceResult<()> {
        if storage_fault_injected() {
            return Err(PersistenceError::InjectedFault);
        }

        let needs_header = !self.path.exists();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if needs_header {
            file.write_all(HEADER.as_bytes())?;
        }

        let opt_dec = |v: &Option<Decimal>| v.map(|d| d.to_string()).unwrap_or_default();
        let line = format!(
            "{},{},{},{},{},{},{},{},{},{}\n",
            entry.timestamp.to_rfc3339(),
            entry.symbol,
            state_to_string(entry.state_1h),
            state_to_string(entry.state_30m),
            state_to_string(entry.state_15m),
            state_to_string(entry.state_5m),
            entry.risk,
            opt_dec(&entry.entry),
            opt_dec(&entry.exit),
            opt_dec(&entry.rr),
        );
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(symbol: &str) -> SignalLogEntry {
        SignalLogEntry {
            timestamp: Utc::now(),
            symbol: symbol.to_string(),
            state_1h: Some(MarketState::A),
            state_30m: Some(MarketState::A),
            state_15m: Some(MarketState::D),
            state_5m: None,
            risk: "LOW".to_string(),
            entry: Some(dec!(50000)),
            exit: Some(dec!(51000)),
            rr: Some(dec!(2)),
        }
    }

    #[test]
    fn test_append_writes_header_once() {
        let dir = std::env::temp_dir().join(format!("aegis-log-{}", std::process::id()));
        let path = dir.join("signals_log.csv");
        let _ = std::fs::remove_file(&path);

        let writer = SignalLogWriter::new(&path);
        writer.append(&entry("BTCUSDT")).unwrap();
        writer.append(&entry("ETHUSDT")).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp,symbol"));
        assert!(lines[1].contains("BTCUSDT"));
        assert!(lines[2].contains("ETHUSDT"));
        // Absent state renders as an empty column.
        assert!(lines[1].contains(",D,,LOW,"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
