//! Inbound command handler.
//!
//! Long-polls `getUpdates` and renders read-only views of the system.
//! No control commands are accepted: every handler only reads.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, warn};

use aegis_brains::DecisionCore;
use aegis_gatekeeper::Gatekeeper;
use aegis_persistence::SqliteStore;
use aegis_runtime::SystemStateMachine;
use aegis_state::SystemStateHandle;

use crate::client::TelegramClient;
use crate::error::TelegramResult;

const POLL_TIMEOUT_SECS: u32 = 30;

/// Everything the read-only commands may look at.
pub struct CommandContext {
    pub state: SystemStateHandle,
    pub machine: Arc<SystemStateMachine>,
    pub store: Arc<SqliteStore>,
    pub gatekeeper: Arc<Gatekeeper>,
    pub decision_core: Arc<DecisionCore>,
    pub initial_balance_usd: Decimal,
    pub risk_percent: f64,
}

impl CommandContext {
    fn current_balance(&self) -> Option<Decimal> {
        self.store.current_balance(self.initial_balance_usd).ok()
    }
}

/// The long-polling handler.
pub struct CommandHandler {
    client: TelegramClient,
    ctx: CommandContext,
    offset: i64,
}

impl CommandHandler {
    pub fn new(client: TelegramClient, ctx: CommandContext) -> Self {
        Self {
            client,
            ctx,
            offset: 0,
        }
    }

    /// Run the polling loop until the shared health flag clears.
    pub async fn run(mut self) {
        while self.ctx.state.system_health().is_running {
            match self.poll_once().await {
                Ok(()) => {}
                Err(e) => {
                    warn!(?e, "command polling failed, backing off");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                }
            }
        }
        debug!("command handler stopped");
    }

    async fn poll_once(&mut self) -> TelegramResult<()> {
        let updates = self.client.get_updates(self.offset, POLL_TIMEOUT_SECS).await?;
        for update in updates {
            self.offset = self.offset.max(update.0 + 1);
            if let Some(text) = update.1 {
                let reply = self.dispatch(text.trim());
                if let Err(e) = self.client.send_text(&reply).await {
                    warn!(?e, "failed to send command reply");
                }
            }
        }
        Ok(())
    }

    /// Route one command to its renderer.
    fn dispatch(&self, text: &str) -> String {
        let mut parts = text.split_whitespace();
        let command = parts.next().unwrap_or("");
        let arg = parts.next();

        match command {
            "/start" | "/help" => self.render_help(),
            "/should_i_trade" => self.render_should_i_trade(arg),
            "/risk_status" | "/risk_exposure" => self.render_risk_status(),
            "/invest" => self.render_invest(arg),
            "/market_regime" => self.render_market_regime(),
            "/cognitive" => self.render_cognitive(),
            "/opportunities" => self.render_opportunities(),
            "/stats" => self.render_stats(arg),
            "/status" => self.render_status(),
            "/trades" => self.render_trades(),
            "/signals" => self.render_signals(arg),
            "/gatekeeper" => self.render_gatekeeper(),
            _ => "Unknown command. Send /help for the menu.".to_string(),
        }
    }

    fn render_help(&self) -> String {
        "Commands (read-only):\n\
         /should_i_trade [symbol] - current trading decision\n\
         /risk_status - risk exposure summary\n\
         /invest <amount> - advisory sizing at current risk budget\n\
         /market_regime - market regime picture\n\
         /cognitive - cognitive filter state\n\
         /opportunities - per-symbol opportunities\n\
         /stats [days] - trade statistics\n\
         /status - system status\n\
         /trades - recent trades\n\
         /signals [n] - recent signals\n\
         /gatekeeper - egress statistics"
            .to_string()
    }

    fn render_should_i_trade(&self, symbol: Option<&str>) -> String {
        let decision = self.ctx.decision_core.should_i_trade(&self.ctx.state, symbol);
        let mut out = format!(
            "Can trade: {}\nRisk: {}\nReason: {}",
            if decision.can_trade { "YES" } else { "NO" },
            decision.risk_level,
            decision.reason
        );
        if let Some(size) = decision.max_position_size {
            out += &format!("\nMax size: {size} USDT");
        }
        if let Some(lev) = decision.max_leverage {
            out += &format!("\nMax leverage: {lev}x");
        }
        for rec in &decision.recommendations {
            out += &format!("\n- {rec}");
        }
        out
    }

    fn render_risk_status(&self) -> String {
        match self.ctx.state.risk_exposure() {
            Some(exp) => format!(
                "Open risk: {:.2}% of balance\nActive positions: {}\nOverloaded: {}",
                exp.total_risk_pct,
                exp.active_positions,
                if exp.is_overloaded { "YES" } else { "no" }
            ),
            None => "No risk exposure analysis yet this session.".to_string(),
        }
    }

    fn render_invest(&self, arg: Option<&str>) -> String {
        let Some(amount) = arg.and_then(|a| a.parse::<f64>().ok()) else {
            return "Usage: /invest <amount>".to_string();
        };
        let per_trade = amount * self.ctx.risk_percent / 100.0;
        format!(
            "At the current risk budget ({:.1}% per trade), {amount:.2} USDT supports \
             about {per_trade:.2} USDT of risk per position.",
            self.ctx.risk_percent
        )
    }

    fn render_market_regime(&self) -> String {
        match self.ctx.state.market_regime() {
            Some(regime) => format!(
                "Trend: {}\nVolatility: {}\nSentiment: {}\nConfidence: {:.2}",
                regime.trend_type,
                regime.volatility_level,
                regime.risk_sentiment,
                regime.confidence
            ),
            None => "No market regime analysis yet this session.".to_string(),
        }
    }

    fn render_cognitive(&self) -> String {
        match self.ctx.state.cognitive_state() {
            Some(cognitive) => format!(
                "Overtrading score: {:.2}\nPause recommended: {}",
                cognitive.overtrading_score,
                if cognitive.should_pause { "YES" } else { "no" }
            ),
            None => "No cognitive analysis yet this session.".to_string(),
        }
    }

    fn render_opportunities(&self) -> String {
        let opportunities = self.ctx.state.opportunities();
        if opportunities.is_empty() {
            return "No opportunities recorded this cycle.".to_string();
        }
        let mut out = String::from("Opportunities:");
        for (symbol, opp) in opportunities {
            out += &format!("\n{symbol}: {} ({})", opp.score, opp.note);
        }
        out
    }

    fn render_stats(&self, arg: Option<&str>) -> String {
        let days = arg.and_then(|a| a.parse::<i64>().ok()).unwrap_or(7);
        match self.ctx.store.trade_stats(days) {
            Ok(stats) => format!(
                "Last {days}d: {} trades, {} wins / {} losses\nWin rate: {:.1}%\nPnL: {:.2} USDT",
                stats.total_trades,
                stats.winning_trades,
                stats.losing_trades,
                stats.win_rate_pct,
                stats.total_pnl
            ),
            Err(e) => format!("Stats unavailable: {e}"),
        }
    }

    fn render_status(&self) -> String {
        let info = self.ctx.machine.state_info();
        let health = self.ctx.state.system_health();
        let metrics = self.ctx.state.performance_metrics();
        let balance = self
            .ctx
            .current_balance()
            .map(|b| format!("{b} USDT"))
            .unwrap_or_else(|| "unavailable".to_string());
        format!(
            "State: {} ({:.0}s)\nTrading paused: {}\nConsecutive errors: {}\n\
             Cycles: {} total, {} ok, {} errors\nBalance: {balance}",
            info.state,
            info.seconds_in_state,
            if health.trading_paused { "YES" } else { "no" },
            health.consecutive_errors,
            metrics.total_cycles,
            metrics.successful_cycles,
            metrics.errors
        )
    }

    fn render_trades(&self) -> String {
        match self.ctx.store.recent_trades(10) {
            Ok(trades) if trades.is_empty() => "No trades recorded.".to_string(),
            Ok(trades) => {
                let mut out = String::from("Recent trades:");
                for t in trades {
                    out += &format!(
                        "\n{} {} {} @ {} [{}]{}",
                        t.symbol,
                        t.side,
                        t.position_size,
                        t.entry,
                        t.status.as_str(),
                        t.pnl.map(|p| format!(" pnl {p}")).unwrap_or_default()
                    );
                }
                out
            }
            Err(e) => format!("Trades unavailable: {e}"),
        }
    }

    fn render_signals(&self, arg: Option<&str>) -> String {
        let limit = arg.and_then(|a| a.parse::<usize>().ok()).unwrap_or(10);
        let signals = self.ctx.state.recent_signals();
        if signals.is_empty() {
            return "No signals this session.".to_string();
        }
        let mut out = String::from("Recent signals:");
        for s in signals.iter().rev().take(limit) {
            out += &format!(
                "\n{} {} {} conf {:.2} ent {:.2}",
                s.timestamp.format("%m-%d %H:%M"),
                s.symbol,
                s.decision,
                s.confidence,
                s.entropy
            );
        }
        out
    }

    fn render_gatekeeper(&self) -> String {
        let stats = self.ctx.gatekeeper.stats();
        format!(
            "Gatekeeper: {} approved, {} blocked, {} total",
            stats.approved,
            stats.blocked,
            stats.total()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::{CognitiveState, MarketRegime, TrendType};
    use aegis_gatekeeper::{GatekeeperConfig, NullSink};
    use aegis_persistence::SignalLogWriter;
    use aegis_registry::{ModuleRegistry, SystemGuardian};
    use aegis_risk::RiskCore;
    use rust_decimal_macros::dec;

    fn handler() -> CommandHandler {
        let state = SystemStateHandle::new();
        let machine = Arc::new(SystemStateMachine::default());
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let registry = Arc::new(ModuleRegistry::new());
        let guardian = Arc::new(SystemGuardian::new(
            registry,
            machine.clone(),
            state.clone(),
        ));
        let decision_core = Arc::new(DecisionCore::default());
        let gatekeeper = Arc::new(Gatekeeper::new(
            guardian,
            RiskCore::default(),
            decision_core.clone(),
            aegis_brains::PositionSizer::default(),
            store.clone(),
            SignalLogWriter::new(std::env::temp_dir().join("aegis-cmd-test.csv")),
            Arc::new(NullSink::new()),
            state.clone(),
            GatekeeperConfig::default(),
        ));

        let client = TelegramClient::new(
            "token".to_string(),
            crate::client::TelegramConfig {
                api_base: "https://api.telegram.org".to_string(),
                chat_id: "1".to_string(),
                request_timeout_secs: 5,
                chart_url_template: "x{symbol}".to_string(),
            },
        )
        .unwrap();

        CommandHandler::new(
            client,
            CommandContext {
                state,
                machine,
                store,
                gatekeeper,
                decision_core,
                initial_balance_usd: dec!(10000),
                risk_percent: 2.0,
            },
        )
    }

    #[test]
    fn test_help_lists_commands() {
        let h = handler();
        let help = h.dispatch("/help");
        assert!(help.contains("/should_i_trade"));
        assert!(help.contains("/gatekeeper"));
    }

    #[test]
    fn test_unknown_command() {
        let h = handler();
        assert!(h.dispatch("/explode").contains("Unknown command"));
    }

    #[test]
    fn test_market_regime_renders_state() {
        let h = handler();
        assert!(h.dispatch("/market_regime").contains("No market regime"));

        h.ctx.state.update_market_regime(MarketRegime {
            trend_type: TrendType::Trend,
            confidence: 0.8,
            ..Default::default()
        });
        let out = h.dispatch("/market_regime");
        assert!(out.contains("TREND"));
        assert!(out.contains("0.80"));
    }

    #[test]
    fn test_cognitive_renders_state() {
        let h = handler();
        h.ctx.state.update_cognitive_state(CognitiveState {
            overtrading_score: 0.9,
            should_pause: true,
        });
        let out = h.dispatch("/cognitive");
        assert!(out.contains("0.90"));
        assert!(out.contains("YES"));
    }

    #[test]
    fn test_invest_requires_amount() {
        let h = handler();
        assert!(h.dispatch("/invest").contains("Usage"));
        assert!(h.dispatch("/invest 1000").contains("20.00 USDT"));
    }

    #[test]
    fn test_status_renders_fsm() {
        let h = handler();
        let out = h.dispatch("/status");
        assert!(out.contains("RUNNING"));
    }
}
