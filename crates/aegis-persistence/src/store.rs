//! SQLite store for trades, decision traces, and state checkpoints.
//!
//! One connection behind a lock: writes serialize, reads share the same
//! path. Monetary values are stored as TEXT to keep decimal exactness.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, Row};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use aegis_state::StateCheckpoint;

use crate::error::{PersistenceError, PersistenceResult};
use crate::fault::storage_fault_injected;
use crate::trace::{BlockLevel, DecisionRecord};

/// Trade lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    Closed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "CLOSED" => Self::Closed,
            _ => Self::Open,
        }
    }
}

/// One paper trade row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub side: String,
    pub entry: Decimal,
    pub stop: Decimal,
    pub target: Decimal,
    pub status: TradeStatus,
    pub position_size: Decimal,
    pub leverage: Option<Decimal>,
    pub close_price: Option<Decimal>,
    pub close_reason: Option<String>,
    pub pnl: Option<Decimal>,
    /// Anchor market state when the signal fired.
    pub entry_state: Option<aegis_core::MarketState>,
    pub entry_confidence: f64,
    pub entry_entropy: f64,
}

/// Aggregated trade statistics over a window.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TradeStats {
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub total_pnl: f64,
    pub win_rate_pct: f64,
}

/// The store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (and migrate) a database file.
    pub fn open(path: impl AsRef<Path>) -> PersistenceResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an existing database strictly read-only (for the observer).
    pub fn open_read_only(path: impl AsRef<Path>) -> PersistenceResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn in_memory() -> PersistenceResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> PersistenceResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                entry TEXT NOT NULL,
                stop TEXT NOT NULL,
                target TEXT NOT NULL,
                status TEXT NOT NULL,
                position_size TEXT NOT NULL,
                leverage TEXT,
                close_price TEXT,
                close_reason TEXT,
                pnl TEXT,
                entry_state TEXT,
                entry_confidence REAL NOT NULL DEFAULT 0.5,
                entry_entropy REAL NOT NULL DEFAULT 0.5,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol);
            CREATE INDEX IF NOT EXISTS idx_trades_status ON trades(status);
            CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trades(timestamp);

            CREATE TABLE IF NOT EXISTS decision_trace (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                symbol TEXT NOT NULL,
                decision_source TEXT NOT NULL,
                allow_trading INTEGER NOT NULL,
                block_level TEXT NOT NULL,
                reason TEXT NOT NULL,
                context_snapshot TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_decision_trace_timestamp
                ON decision_trace(timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_decision_trace_symbol
                ON decision_trace(symbol);
            CREATE INDEX IF NOT EXISTS idx_decision_trace_source
                ON decision_trace(decision_source);
            CREATE INDEX IF NOT EXISTS idx_decision_trace_allow
                ON decision_trace(allow_trading);

            CREATE TABLE IF NOT EXISTS system_state_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                snapshot_data TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_snapshots_timestamp
                ON system_state_snapshots(timestamp DESC);",
        )?;
        Ok(())
    }

    fn guard_write(&self) -> PersistenceResult<()> {
        if storage_fault_injected() {
            return Err(PersistenceError::InjectedFault);
        }
        Ok(())
    }

    // ---- trades ----

    /// Insert an open paper trade, returning its id.
    #[allow(clippy::too_many_arguments)]
    pub fn open_trade(
        &self,
        symbol: &str,
        side: &str,
        entry: Decimal,
        stop: Decimal,
        target: Decimal,
        position_size: Decimal,
        leverage: Option<Decimal>,
        entry_state: Option<aegis_core::MarketState>,
        entry_confidence: f64,
        entry_entropy: f64,
    ) -> PersistenceResult<i64> {
        self.guard_write()?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO trades
             (timestamp, symbol, side, entry, stop, target, status, position_size, leverage,
              entry_state, entry_confidence, entry_entropy)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'OPEN', ?7, ?8, ?9, ?10, ?11)",
            params![
                Utc::now().to_rfc3339(),
                symbol,
                side,
                entry.to_string(),
                stop.to_string(),
                target.to_string(),
                position_size.to_string(),
                leverage.map(|l| l.to_string()),
                entry_state.map(|s| s.as_str()),
                entry_confidence,
                entry_entropy,
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(trade_id = id, symbol, "paper trade opened");
        Ok(id)
    }

    /// Close a trade with its realized outcome.
    pub fn close_trade(
        &self,
        trade_id: i64,
        close_price: Decimal,
        close_reason: &str,
        pnl: Decimal,
    ) -> PersistenceResult<()> {
        self.guard_write()?;
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE trades
             SET status = 'CLOSED', close_price = ?1, close_reason = ?2, pnl = ?3,
                 updated_at = ?4
             WHERE id = ?5 AND status = 'OPEN'",
            params![
                close_price.to_string(),
                close_reason,
                pnl.to_string(),
                Utc::now().to_rfc3339(),
                trade_id,
            ],
        )?;
        if changed == 0 {
            return Err(PersistenceError::NotFound(format!(
                "open trade {trade_id}"
            )));
        }
        Ok(())
    }

    pub fn open_trades(&self) -> PersistenceResult<Vec<TradeRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, symbol, side, entry, stop, target, status,
                    position_size, leverage, close_price, close_reason, pnl,
                    entry_state, entry_confidence, entry_entropy
             FROM trades WHERE status = 'OPEN' ORDER BY timestamp",
        )?;
        let rows = stmt.query_map([], row_to_trade)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn open_trades_for_symbol(&self, symbol: &str) -> PersistenceResult<Vec<TradeRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, symbol, side, entry, stop, target, status,
                    position_size, leverage, close_price, close_reason, pnl,
                    entry_state, entry_confidence, entry_entropy
             FROM trades WHERE status = 'OPEN' AND symbol = ?1 ORDER BY timestamp",
        )?;
        let rows = stmt.query_map([symbol], row_to_trade)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn recent_trades(&self, limit: usize) -> PersistenceResult<Vec<TradeRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, symbol, side, entry, stop, target, status,
                    position_size, leverage, close_price, close_reason, pnl,
                    entry_state, entry_confidence, entry_entropy
             FROM trades ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit], row_to_trade)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Closed-trade statistics over the trailing `days`.
    pub fn trade_stats(&self, days: i64) -> PersistenceResult<TradeStats> {
        let cutoff = (Utc::now() - ChronoDuration::days(days)).to_rfc3339();
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT pnl FROM trades
             WHERE status = 'CLOSED' AND timestamp >= ?1 AND pnl IS NOT NULL",
        )?;
        let pnls: Vec<f64> = stmt
            .query_map([cutoff], |row| {
                let text: String = row.get(0)?;
                Ok(Decimal::from_str(&text)
                    .ok()
                    .and_then(|d| d.to_f64())
                    .unwrap_or(0.0))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let total = pnls.len() as u64;
        let wins = pnls.iter().filter(|p| **p > 0.0).count() as u64;
        let losses = pnls.iter().filter(|p| **p < 0.0).count() as u64;
        let total_pnl: f64 = pnls.iter().sum();
        let win_rate_pct = if total > 0 {
            wins as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        Ok(TradeStats {
            total_trades: total,
            winning_trades: wins,
            losing_trades: losses,
            total_pnl,
            win_rate_pct,
        })
    }

    /// Balance derived from the initial balance plus realized PnL.
    pub fn current_balance(&self, initial_balance: Decimal) -> PersistenceResult<Decimal> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT pnl FROM trades WHERE status = 'CLOSED' AND pnl IS NOT NULL")?;
        let realized: Decimal = stmt
            .query_map([], |row| {
                let text: String = row.get(0)?;
                Ok(Decimal::from_str(&text).unwrap_or(Decimal::ZERO))
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .sum();
        Ok(initial_balance + realized)
    }

    // ---- decision trace ----

    /// Append one decision record. Append-only by construction.
    pub fn log_decision(&self, record: &DecisionRecord) -> PersistenceResult<i64> {
        self.guard_write()?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO decision_trace
             (timestamp, symbol, decision_source, allow_trading, block_level, reason,
              context_snapshot)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.timestamp.to_rfc3339(),
                record.symbol,
                record.decision_source,
                record.allow_trading as i64,
                record.block_level.as_str(),
                record.reason,
                serde_json::to_string(&record.context_snapshot)?,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn recent_decisions(
        &self,
        limit: usize,
        symbol: Option<&str>,
    ) -> PersistenceResult<Vec<DecisionRecord>> {
        let conn = self.conn.lock();
        let mut records = Vec::new();

        let map_row = |row: &Row<'_>| -> rusqlite::Result<DecisionRecord> {
            let timestamp: String = row.get(0)?;
            let block_level: String = row.get(4)?;
            let context: Option<String> = row.get(6)?;
            Ok(DecisionRecord {
                timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                symbol: row.get(1)?,
                decision_source: row.get(2)?,
                allow_trading: row.get::<_, i64>(3)? != 0,
                block_level: BlockLevel::parse(&block_level).unwrap_or(BlockLevel::None),
                reason: row.get(5)?,
                context_snapshot: context
                    .and_then(|c| serde_json::from_str(&c).ok())
                    .unwrap_or(serde_json::Value::Null),
            })
        };

        match symbol {
            Some(sym) => {
                let mut stmt = conn.prepare(
                    "SELECT timestamp, symbol, decision_source, allow_trading, block_level,
                            reason, context_snapshot
                     FROM decision_trace WHERE symbol = ?1
                     ORDER BY id DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![sym, limit], map_row)?;
                for row in rows {
                    records.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT timestamp, symbol, decision_source, allow_trading, block_level,
                            reason, context_snapshot
                     FROM decision_trace ORDER BY id DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![limit], map_row)?;
                for row in rows {
                    records.push(row?);
                }
            }
        }

        Ok(records)
    }

    // ---- system state checkpoints ----

    pub fn save_checkpoint(&self, checkpoint: &StateCheckpoint) -> PersistenceResult<i64> {
        self.guard_write()?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO system_state_snapshots (timestamp, snapshot_data) VALUES (?1, ?2)",
            params![
                checkpoint.timestamp.to_rfc3339(),
                serde_json::to_string(checkpoint)?,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn latest_checkpoint(&self) -> PersistenceResult<Option<StateCheckpoint>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT snapshot_data FROM system_state_snapshots ORDER BY id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        match rows.next() {
            Some(json) => Ok(Some(serde_json::from_str(&json?)?)),
            None => Ok(None),
        }
    }

    /// Drop all but the newest `keep` checkpoints.
    pub fn cleanup_old_checkpoints(&self, keep: usize) -> PersistenceResult<usize> {
        self.guard_write()?;
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM system_state_snapshots WHERE id NOT IN
             (SELECT id FROM system_state_snapshots ORDER BY id DESC LIMIT ?1)",
            params![keep],
        )?;
        Ok(deleted)
    }
}

fn row_to_trade(row: &Row<'_>) -> rusqlite::Result<TradeRecord> {
    let timestamp: String = row.get(1)?;
    let status: String = row.get(7)?;
    let dec = |idx: usize| -> rusqlite::Result<Decimal> {
        let text: String = row.get(idx)?;
        Ok(Decimal::from_str(&text).unwrap_or(Decimal::ZERO))
    };
    let opt_dec = |idx: usize| -> rusqlite::Result<Option<Decimal>> {
        let text: Option<String> = row.get(idx)?;
        Ok(text.and_then(|t| Decimal::from_str(&t).ok()))
    };

    let entry_state: Option<String> = row.get(13)?;

    Ok(TradeRecord {
        id: row.get(0)?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        symbol: row.get(2)?,
        side: row.get(3)?,
        entry: dec(4)?,
        stop: dec(5)?,
        target: dec(6)?,
        status: TradeStatus::parse(&status),
        position_size: dec(8)?,
        leverage: opt_dec(9)?,
        close_price: opt_dec(10)?,
        close_reason: row.get(11)?,
        pnl: opt_dec(12)?,
        entry_state: entry_state.as_deref().and_then(aegis_core::MarketState::parse),
        entry_confidence: row.get(14)?,
        entry_entropy: row.get(15)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn store() -> SqliteStore {
        SqliteStore::in_memory().unwrap()
    }

    fn open_sample_trade(store: &SqliteStore) -> i64 {
        store
            .open_trade(
                "BTCUSDT",
                "LONG",
                dec!(50000),
                dec!(49500),
                dec!(51000),
                dec!(100),
                Some(dec!(2)),
                Some(aegis_core::MarketState::D),
                0.7,
                0.3,
            )
            .unwrap()
    }

    #[test]
    fn test_trade_lifecycle() {
        let store = store();
        let id = open_sample_trade(&store);

        let open = store.open_trades().unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, id);
        assert_eq!(open[0].status, TradeStatus::Open);
        assert_eq!(open[0].entry, dec!(50000));

        store
            .close_trade(id, dec!(51000), "TP", dec!(2))
            .unwrap();
        assert!(store.open_trades().unwrap().is_empty());

        let recent = store.recent_trades(10).unwrap();
        assert_eq!(recent[0].status, TradeStatus::Closed);
        assert_eq!(recent[0].pnl, Some(dec!(2)));
    }

    #[test]
    fn test_close_missing_trade_fails() {
        let store = store();
        let result = store.close_trade(999, dec!(1), "TP", dec!(0));
        assert!(matches!(result, Err(PersistenceError::NotFound(_))));
    }

    #[test]
    fn test_trade_stats_and_balance() {
        let store = store();
        let a = open_sample_trade(&store);
        let b = open_sample_trade(&store);
        store.close_trade(a, dec!(51000), "TP", dec!(20)).unwrap();
        store.close_trade(b, dec!(49500), "SL", dec!(-10)).unwrap();

        let stats = store.trade_stats(7).unwrap();
        assert_eq!(stats.total_trades, 2);
        assert_eq!(stats.winning_trades, 1);
        assert_eq!(stats.losing_trades, 1);
        assert!((stats.total_pnl - 10.0).abs() < 1e-9);
        assert!((stats.win_rate_pct - 50.0).abs() < 1e-9);

        let balance = store.current_balance(dec!(10000)).unwrap();
        assert_eq!(balance, dec!(10010));
    }

    #[test]
    fn test_decision_trace_append_and_query() {
        let store = store();
        for i in 0..3 {
            store
                .log_decision(&DecisionRecord::new(
                    "BTCUSDT",
                    "RiskCore",
                    i % 2 == 0,
                    BlockLevel::None,
                    format!("check {i}"),
                    json!({"i": i}),
                ))
                .unwrap();
        }
        store
            .log_decision(&DecisionRecord::new(
                "ETHUSDT",
                "Gatekeeper",
                false,
                BlockLevel::Hard,
                "blocked",
                json!({}),
            ))
            .unwrap();

        let all = store.recent_decisions(10, None).unwrap();
        assert_eq!(all.len(), 4);
        // Newest first.
        assert_eq!(all[0].symbol, "ETHUSDT");
        assert_eq!(all[0].block_level, BlockLevel::Hard);

        let btc = store.recent_decisions(10, Some("BTCUSDT")).unwrap();
        assert_eq!(btc.len(), 3);
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let store = store();
        assert!(store.latest_checkpoint().unwrap().is_none());

        let checkpoint = StateCheckpoint {
            timestamp: Utc::now(),
            open_positions: vec![],
            performance_metrics: Default::default(),
            system_health: Default::default(),
            recent_signals: vec![],
            signal_cache: Default::default(),
        };
        store.save_checkpoint(&checkpoint).unwrap();

        let loaded = store.latest_checkpoint().unwrap().unwrap();
        assert_eq!(loaded.performance_metrics, checkpoint.performance_metrics);
    }

    #[test]
    fn test_checkpoint_cleanup_keeps_newest() {
        let store = store();
        for _ in 0..12 {
            let checkpoint = StateCheckpoint {
                timestamp: Utc::now(),
                open_positions: vec![],
                performance_metrics: Default::default(),
                system_health: Default::default(),
                recent_signals: vec![],
                signal_cache: Default::default(),
            };
            store.save_checkpoint(&checkpoint).unwrap();
        }

        let deleted = store.cleanup_old_checkpoints(10).unwrap();
        assert_eq!(deleted, 2);
        assert!(store.latest_checkpoint().unwrap().is_some());
    }
}
