//! Paper-trade ledger over the SQLite trade table.
//!
//! Opens a record after a signal goes out and closes it when a later 5m
//! close crosses the stop or target.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::info;

use aegis_core::{Price, SignalSnapshot};
use aegis_persistence::{PersistenceResult, SqliteStore, TradeRecord};
use aegis_state::{OpenPosition, PositionSide, SystemStateHandle};

use crate::intent::SignalIntent;

/// A trade closed during a TP/SL sweep.
#[derive(Debug, Clone)]
pub struct ClosedTrade {
    pub record: TradeRecord,
    pub close_price: Decimal,
    pub close_reason: String,
    pub pnl: Decimal,
}

/// The ledger.
pub struct PaperLedger {
    store: Arc<SqliteStore>,
}

impl PaperLedger {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }

    /// Open a paper position from a sent signal, carrying the snapshot's
    /// cognition into the row, and refresh the shared position cache.
    pub fn open_from_signal(
        &self,
        intent: &SignalIntent,
        snapshot: &SignalSnapshot,
        state: &SystemStateHandle,
    ) -> PersistenceResult<i64> {
        let trade_id = self.store.open_trade(
            &intent.symbol,
            intent.side.as_str(),
            intent.entry.inner(),
            intent.stop.inner(),
            intent.target.inner(),
            intent.position_size_usd.inner(),
            intent.leverage,
            snapshot.anchor_state(),
            snapshot.confidence(),
            snapshot.entropy(),
        )?;

        state.update_open_positions(self.open_positions()?);
        Ok(trade_id)
    }

    /// Sweep open trades of one symbol against the latest price.
    pub fn check_trades(
        &self,
        symbol: &str,
        price: Price,
        state: &SystemStateHandle,
    ) -> PersistenceResult<Vec<ClosedTrade>> {
        let open = self.store.open_trades_for_symbol(symbol)?;
        let mut closed = Vec::new();

        for trade in open {
            let Some((reason, close_price)) = hit_level(&trade, price.inner()) else {
                continue;
            };

            let pnl = realized_pnl(&trade, close_price);
            self.store
                .close_trade(trade.id, close_price, &reason, pnl)?;
            info!(
                trade_id = trade.id,
                symbol,
                reason,
                pnl = %pnl,
                "paper trade closed"
            );
            closed.push(ClosedTrade {
                record: trade,
                close_price,
                close_reason: reason,
                pnl,
            });
        }

        if !closed.is_empty() {
            state.update_open_positions(self.open_positions()?);
        }
        Ok(closed)
    }

    /// Current open positions as the shared-state cache representation.
    pub fn open_positions(&self) -> PersistenceResult<Vec<OpenPosition>> {
        let trades = self.store.open_trades()?;
        Ok(trades
            .into_iter()
            .map(|t| OpenPosition {
                trade_id: t.id,
                symbol: t.symbol,
                side: PositionSide::parse(&t.side).unwrap_or(PositionSide::Long),
                size_usd: aegis_core::Size::new(t.position_size),
                entry: Price::new(t.entry),
                stop: Price::new(t.stop),
                target: Price::new(t.target),
                state_at_entry: t.entry_state,
                confidence_at_entry: t.entry_confidence,
                entropy_at_entry: t.entry_entropy,
                opened_at: t.timestamp,
            })
            .collect())
    }
}

fn hit_level(trade: &TradeRecord, price: Decimal) -> Option<(String, Decimal)> {
    let is_long = trade.side == "LONG";
    if is_long {
        if price >= trade.target {
            return Some(("TP".to_string(), trade.target));
        }
        if price <= trade.stop {
            return Some(("SL".to_string(), trade.stop));
        }
    } else {
        if price <= trade.target {
            return Some(("TP".to_string(), trade.target));
        }
        if price >= trade.stop {
            return Some(("SL".to_string(), trade.stop));
        }
    }
    None
}

/// Realized PnL in USD on the notional, leverage included.
fn realized_pnl(trade: &TradeRecord, close_price: Decimal) -> Decimal {
    if trade.entry.is_zero() {
        return Decimal::ZERO;
    }
    let move_pct = (close_price - trade.entry) / trade.entry;
    let signed = if trade.side == "LONG" {
        move_pct
    } else {
        -move_pct
    };
    let leverage = trade.leverage.unwrap_or(Decimal::ONE);
    (signed * trade.position_size * leverage).round_dp(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::{MarketMode, MarketState, Size, SnapshotBuilder, Timeframe};
    use rust_decimal_macros::dec;

    fn intent(symbol: &str, side: PositionSide) -> SignalIntent {
        SignalIntent {
            symbol: symbol.to_string(),
            side,
            entry: Price::new(dec!(100)),
            stop: Price::new(dec!(95)),
            target: Price::new(dec!(110)),
            position_size_usd: Size::new(dec!(200)),
            leverage: Some(dec!(2)),
            rr_ratio: 2.0,
            volatility_pct: 1.0,
            score: 90,
            mode: MarketMode::Trade,
            risk_label: "LOW".to_string(),
            reasons: vec![],
        }
    }

    fn snapshot(symbol: &str) -> SignalSnapshot {
        SnapshotBuilder::new(symbol)
            .anchor(Timeframe::M15)
            .state(Timeframe::M15, Some(MarketState::D))
            .score(90, 125)
            .confidence(0.7)
            .entropy(0.3)
            .build()
            .unwrap()
    }

    #[test]
    fn test_open_and_tp_close() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let ledger = PaperLedger::new(store.clone());
        let state = SystemStateHandle::new();

        let snapshot = snapshot("BTCUSDT");
        let long = intent("BTCUSDT", PositionSide::Long);
        ledger.open_from_signal(&long, &snapshot, &state).unwrap();

        let cached = state.open_positions();
        assert_eq!(cached.len(), 1);
        // The row carries the snapshot's cognition at entry.
        assert_eq!(cached[0].state_at_entry, Some(MarketState::D));
        assert!((cached[0].confidence_at_entry - 0.7).abs() < 1e-9);

        // Price below target: nothing closes.
        let closed = ledger
            .check_trades("BTCUSDT", Price::new(dec!(105)), &state)
            .unwrap();
        assert!(closed.is_empty());

        // Target reached: TP close. 10% move x 200 x 2 = 40.
        let closed = ledger
            .check_trades("BTCUSDT", Price::new(dec!(111)), &state)
            .unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].close_reason, "TP");
        assert_eq!(closed[0].pnl, dec!(40));
        assert!(state.open_positions().is_empty());
    }

    #[test]
    fn test_short_sl_close() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let ledger = PaperLedger::new(store);
        let state = SystemStateHandle::new();

        let mut short = intent("ETHUSDT", PositionSide::Short);
        short.stop = Price::new(dec!(105));
        short.target = Price::new(dec!(90));
        ledger
            .open_from_signal(&short, &snapshot("ETHUSDT"), &state)
            .unwrap();

        let closed = ledger
            .check_trades("ETHUSDT", Price::new(dec!(106)), &state)
            .unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].close_reason, "SL");
        // Short against a +5% move on 200 x 2: -20.
        assert_eq!(closed[0].pnl, dec!(-20));
    }
}
