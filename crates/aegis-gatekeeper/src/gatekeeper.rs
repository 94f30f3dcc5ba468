//! The validator-chain orchestrator.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use aegis_brains::{
    build_portfolio_state, DecisionCore, HealthStatus, MetaDecisionBrain, MetaInputs,
    PortfolioAnalysis, PortfolioBrain, PortfolioDecision, PortfolioState, PositionDirection,
    PositionSizer, PositionSnapshot,
};
use aegis_core::{SignalSnapshot, Size, Timeframe};
use aegis_persistence::{
    BlockLevel, DecisionRecord, SignalLogEntry, SignalLogWriter, SqliteStore,
};
use aegis_registry::SystemGuardian;
use aegis_risk::{
    CapitalSnapshot, ExposureSnapshot, PositionExposure, RiskCore, RollingActionCounters,
    SystemHealthFlags, TradingIntent, TradingPermission,
};
use aegis_state::{PositionSide, RecentSignal, SystemStateHandle};

use crate::intent::SignalIntent;
use crate::message::build_signal_message;
use crate::paper::PaperLedger;
use crate::sink::SignalSink;

fn decision_fault_injected() -> bool {
    std::env::var("FAULT_INJECT_DECISION_EXCEPTION")
        .map(|v| {
            let v = v.trim();
            !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false")
        })
        .unwrap_or(false)
}

/// Gatekeeper configuration.
#[derive(Debug, Clone)]
pub struct GatekeeperConfig {
    pub initial_balance_usd: Decimal,
    /// Base risk percent per trade, used for the portfolio risk budget.
    pub risk_percent: f64,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            initial_balance_usd: Decimal::from(10000),
            risk_percent: 2.0,
        }
    }
}

/// Egress counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct GatekeeperStats {
    pub approved: u64,
    pub blocked: u64,
}

impl GatekeeperStats {
    pub fn total(&self) -> u64 {
        self.approved + self.blocked
    }
}

/// Outcome of one `send_signal` call.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Message emitted and paper trade opened.
    Sent { final_size_usd: Size },
    /// A validator vetoed the signal.
    Blocked { stage: &'static str, reason: String },
    /// Anchor state unchanged since the last emission.
    Duplicate,
    /// The chain allowed but external delivery failed.
    SendFailed { reason: String },
}

/// The single egress.
pub struct Gatekeeper {
    guardian: Arc<SystemGuardian>,
    risk_core: RiskCore,
    counters: Mutex<RollingActionCounters>,
    meta: MetaDecisionBrain,
    decision_core: Arc<DecisionCore>,
    portfolio_brain: PortfolioBrain,
    sizer: PositionSizer,
    store: Arc<SqliteStore>,
    ledger: PaperLedger,
    signal_log: SignalLogWriter,
    sink: Arc<dyn SignalSink>,
    state: SystemStateHandle,
    config: GatekeeperConfig,
    stats: Mutex<GatekeeperStats>,
}

type TraceEntry = (&'static str, bool, String, BlockLevel);

impl Gatekeeper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        guardian: Arc<SystemGuardian>,
        risk_core: RiskCore,
        decision_core: Arc<DecisionCore>,
        sizer: PositionSizer,
        store: Arc<SqliteStore>,
        signal_log: SignalLogWriter,
        sink: Arc<dyn SignalSink>,
        state: SystemStateHandle,
        config: GatekeeperConfig,
    ) -> Self {
        Self {
            guardian,
            risk_core,
            counters: Mutex::new(RollingActionCounters::new()),
            meta: MetaDecisionBrain::new(),
            decision_core,
            portfolio_brain: PortfolioBrain::new(),
            sizer,
            ledger: PaperLedger::new(store.clone()),
            store,
            signal_log,
            sink,
            state,
            config,
            stats: Mutex::new(GatekeeperStats::default()),
        }
    }

    pub fn stats(&self) -> GatekeeperStats {
        *self.stats.lock()
    }

    pub fn ledger(&self) -> &PaperLedger {
        &self.ledger
    }

    /// Record a closed-trade outcome into the behavioral counters.
    pub fn record_outcome(&self, pnl_usd: f64) {
        self.counters.lock().record_outcome(pnl_usd);
    }

    /// Run the full validator chain for one signal. At most one external
    /// message is emitted per call.
    pub async fn send_signal(
        &self,
        snapshot: &SignalSnapshot,
        mut intent: SignalIntent,
    ) -> SendOutcome {
        let symbol = intent.symbol.clone();

        // Stage 0: per-instrument dedup on the anchor state.
        if !self.state.is_new_signal(&symbol, snapshot.anchor_state()) {
            info!(symbol, "anchor state unchanged since last emission, skipping");
            return SendOutcome::Duplicate;
        }

        // Stage 1: the global gate. A denial here precedes trace
        // collection; nothing has been decided about the signal itself.
        let permission = self.guardian.can_trade().await;
        if !permission.allowed {
            warn!(
                symbol,
                reason = %permission.reason,
                blocked_by = permission.blocked_by.as_deref().unwrap_or("-"),
                "signal blocked by SystemGuardian"
            );
            self.stats.lock().blocked += 1;
            return SendOutcome::Blocked {
                stage: "SystemGuardian",
                reason: permission.reason,
            };
        }

        let mut trace: Vec<TraceEntry> = Vec::new();

        // Stage 2: RiskCore veto, fail-closed on every anomaly.
        match self.evaluate_risk_core(&intent) {
            Ok(verdict) => {
                let allowed = verdict.permission != TradingPermission::Deny;
                let mut reason = format!("Risk state: {}", verdict.state);
                if !verdict.report.is_empty() {
                    reason += &format!(", violations: {}", verdict.report.violations.len());
                }
                let level = if allowed { BlockLevel::None } else { BlockLevel::Hard };
                trace.push(("RiskCore", allowed, reason.clone(), level));

                match verdict.permission {
                    TradingPermission::Deny => {
                        return self.block(&symbol, snapshot, trace, "RiskCore", reason);
                    }
                    TradingPermission::AllowLimited => {
                        intent.scale_size(verdict.limited_scale_factor);
                        info!(
                            symbol,
                            factor = %verdict.limited_scale_factor,
                            "risk core limited the position size"
                        );
                    }
                    TradingPermission::Allow => {}
                }
            }
            Err(reason) => {
                // Exception, malformed result, or injected fault: treat
                // exactly as HALTED + DENY and record the event.
                error!(symbol, reason, "risk core evaluation failed, enforcing DENY");
                trace.push(("RiskCore", false, reason.clone(), BlockLevel::Hard));
                return self.block(&symbol, snapshot, trace, "RiskCore", reason);
            }
        }

        // Stage 3: MetaDecisionBrain.
        let meta_result = self.meta.evaluate(&self.meta_inputs(snapshot));
        let meta_level = match meta_result.block_level {
            Some(aegis_brains::BlockLevel::Hard) => BlockLevel::Hard,
            Some(aegis_brains::BlockLevel::Soft) => BlockLevel::Soft,
            None => BlockLevel::None,
        };
        trace.push((
            "META",
            meta_result.allow_trading,
            meta_result.reason.clone(),
            meta_level,
        ));
        if !meta_result.allow_trading {
            return self.block(&symbol, snapshot, trace, "META", meta_result.reason);
        }

        // Stage 4: DecisionCore.
        let decision = self.decision_core.should_i_trade(&self.state, Some(&symbol));
        trace.push((
            "DecisionCore",
            decision.can_trade,
            decision.reason.clone(),
            BlockLevel::None,
        ));
        if !decision.can_trade {
            return self.block(&symbol, snapshot, trace, "DecisionCore", decision.reason);
        }
        if let Some(reason) = self.quality_violation(&intent, &decision) {
            trace.push(("DecisionCore", false, reason.clone(), BlockLevel::None));
            return self.block(&symbol, snapshot, trace, "DecisionCore", reason);
        }

        // Stage 5: PortfolioBrain.
        let (positions, portfolio_state) = match self.portfolio_inputs() {
            Ok(inputs) => inputs,
            Err(reason) => {
                trace.push(("PortfolioBrain", false, reason.clone(), BlockLevel::Hard));
                return self.block(&symbol, snapshot, trace, "PortfolioBrain", reason);
            }
        };

        let mut portfolio_analysis: Option<PortfolioAnalysis> = None;
        if positions.is_empty() {
            trace.push((
                "PortfolioBrain",
                true,
                "No open positions, portfolio analysis skipped".to_string(),
                BlockLevel::None,
            ));
        } else {
            let analysis = self
                .portfolio_brain
                .evaluate(snapshot, &positions, &portfolio_state);
            let allowed = analysis.decision != PortfolioDecision::Block;
            trace.push((
                "PortfolioBrain",
                allowed,
                analysis.reason.clone(),
                BlockLevel::None,
            ));

            if !allowed {
                let reason = analysis.reason.clone();
                return self.block(&symbol, snapshot, trace, "PortfolioBrain", reason);
            }

            if analysis.recommended_size_multiplier < 1.0 {
                let factor = Decimal::from_f64(analysis.recommended_size_multiplier)
                    .unwrap_or(Decimal::ONE);
                intent.scale_size(factor);
                info!(
                    symbol,
                    multiplier = analysis.recommended_size_multiplier,
                    "portfolio brain reduced the position size"
                );
            }
            portfolio_analysis = Some(analysis);
        }

        // Stage 6: PositionSizer, the last writer of size.
        let balance = match self.store.current_balance(self.config.initial_balance_usd) {
            Ok(balance) => balance,
            Err(e) => {
                let reason = format!("balance unavailable: {e}");
                trace.push(("PositionSizer", false, reason.clone(), BlockLevel::Hard));
                return self.block(&symbol, snapshot, trace, "PositionSizer", reason);
            }
        };
        let sizing = self.sizer.calculate(
            snapshot.confidence(),
            snapshot.entropy(),
            &portfolio_state,
            balance,
        );
        trace.push((
            "PositionSizer",
            sizing.position_allowed,
            sizing.reason.clone(),
            BlockLevel::None,
        ));
        if !sizing.position_allowed {
            return self.block(&symbol, snapshot, trace, "PositionSizer", sizing.reason);
        }
        if let Some(size) = sizing.position_size_usd {
            intent.position_size_usd = size;
        }

        // The chain allowed the signal: emit, then (and only then) open
        // the paper trade.
        let message = build_signal_message(
            snapshot,
            &intent,
            &decision,
            portfolio_analysis.as_ref(),
            &sizing.reason,
        );

        if let Err(e) = self.sink.send_message(&message).await {
            error!(symbol, ?e, "failed to deliver signal message");
            self.save_trace(&symbol, snapshot, &trace, "ERROR");
            return SendOutcome::SendFailed {
                reason: e.to_string(),
            };
        }
        if let Err(e) = self.sink.send_chart(&symbol).await {
            warn!(symbol, ?e, "failed to deliver chart link");
        }

        if let Err(e) = self
            .ledger
            .open_from_signal(&intent, snapshot, &self.state)
        {
            // The message is already out; the ledger failure is recorded
            // but does not undo the emission.
            error!(symbol, ?e, "failed to open paper trade");
        }

        self.append_signal_log(snapshot, &intent);
        self.state.add_signal(RecentSignal {
            timestamp: snapshot.timestamp(),
            symbol: symbol.clone(),
            anchor_state: snapshot.anchor_state(),
            decision: snapshot.decision().as_str().to_string(),
            confidence: snapshot.confidence(),
            entropy: snapshot.entropy(),
            outcome: None,
        });
        self.counters.lock().record_action();
        self.stats.lock().approved += 1;

        info!(symbol, size = %intent.position_size_usd, "signal sent");
        self.save_trace(&symbol, snapshot, &trace, "SEND");

        SendOutcome::Sent {
            final_size_usd: intent.position_size_usd,
        }
    }

    fn block(
        &self,
        symbol: &str,
        snapshot: &SignalSnapshot,
        trace: Vec<TraceEntry>,
        stage: &'static str,
        reason: String,
    ) -> SendOutcome {
        warn!(symbol, stage, reason, "signal blocked");
        self.stats.lock().blocked += 1;
        self.save_trace(symbol, snapshot, &trace, "BLOCK");
        SendOutcome::Blocked { stage, reason }
    }

    /// Assemble the risk-core inputs and evaluate, fail-closed.
    fn evaluate_risk_core(
        &self,
        intent: &SignalIntent,
    ) -> Result<aegis_risk::RiskVerdict, String> {
        if decision_fault_injected() {
            return Err("injected decision exception".to_string());
        }

        let balance = self
            .store
            .current_balance(self.config.initial_balance_usd)
            .map_err(|e| format!("balance unavailable: {e}"))?;

        let stats_24h = self
            .store
            .trade_stats(1)
            .map_err(|e| format!("24h stats unavailable: {e}"))?;
        let stats_7d = self
            .store
            .trade_stats(7)
            .map_err(|e| format!("7d stats unavailable: {e}"))?;

        let loss = |pnl: f64| {
            if pnl < 0.0 {
                Decimal::from_f64(-pnl).unwrap_or(Decimal::ZERO)
            } else {
                Decimal::ZERO
            }
        };

        let capital = CapitalSnapshot {
            current_balance_usd: balance,
            initial_balance_usd: self.config.initial_balance_usd,
            total_loss_usd: (self.config.initial_balance_usd - balance).max(Decimal::ZERO),
            loss_24h_usd: loss(stats_24h.total_pnl),
            loss_7d_usd: loss(stats_7d.total_pnl),
        };

        let open = self
            .store
            .open_trades()
            .map_err(|e| format!("open trades unavailable: {e}"))?;
        let positions: Vec<PositionExposure> = open
            .iter()
            .map(|t| PositionExposure {
                symbol: t.symbol.clone(),
                side: t.side.clone(),
                position_size_usd: Size::new(t.position_size),
            })
            .collect();
        let total: Decimal = positions.iter().map(|p| p.position_size_usd.inner()).sum();
        let max_single = positions
            .iter()
            .map(|p| p.position_size_usd.inner())
            .max()
            .unwrap_or(Decimal::ZERO);

        let exposure = ExposureSnapshot {
            open_positions: positions,
            total_exposure_usd: Size::new(total),
            max_single_position_usd: Size::new(max_single),
            correlation_groups: Default::default(),
        };

        let behavioral = self.counters.lock().snapshot();

        let health = self.state.system_health();
        let flags = SystemHealthFlags {
            runtime_healthy: !health.safe_mode && !health.trading_paused,
            critical_modules_available: true,
            consecutive_errors: health.consecutive_errors,
            is_safe_mode: health.safe_mode,
        };

        let risk_intent = TradingIntent {
            symbol: intent.symbol.clone(),
            side: intent.side.as_str().to_string(),
            position_size_usd: intent.position_size_usd,
            entry_price: intent.entry,
            stop_price: intent.stop,
            leverage: intent.leverage,
        };

        // A panic inside the risk core is treated exactly as HALTED+DENY.
        catch_unwind(AssertUnwindSafe(|| {
            self.risk_core
                .evaluate(&risk_intent, &capital, &exposure, &behavioral, &flags)
        }))
        .map_err(|_| "risk core panicked".to_string())
    }

    fn meta_inputs(&self, snapshot: &SignalSnapshot) -> MetaInputs {
        let health = self.state.system_health();
        let system_health = if health.safe_mode || health.consecutive_errors > 5 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ok
        };

        let exposure = self
            .store
            .open_trades()
            .ok()
            .and_then(|trades| {
                let total: Decimal = trades.iter().map(|t| t.position_size).sum();
                let balance = self
                    .store
                    .current_balance(self.config.initial_balance_usd)
                    .ok()?;
                if balance <= Decimal::ZERO {
                    return None;
                }
                (total / balance).to_f64()
            })
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);

        let recent = self.state.recent_signals();
        let recent_outcomes: Vec<f64> = recent.iter().filter_map(|s| s.outcome).collect();

        MetaInputs {
            market_regime: self.state.market_regime(),
            confidence: snapshot.confidence(),
            entropy: snapshot.entropy(),
            portfolio_exposure: exposure,
            recent_outcomes,
            signals_count_recent: recent.len(),
            system_health,
            time_context: snapshot.time_context(),
        }
    }

    fn quality_violation(
        &self,
        intent: &SignalIntent,
        decision: &aegis_brains::TradingDecision,
    ) -> Option<String> {
        if let Some(max_size) = decision.max_position_size {
            if intent.position_size_usd.inner() > max_size.inner() {
                return Some(format!(
                    "intended size {} exceeds cap {}",
                    intent.position_size_usd, max_size
                ));
            }
        }
        if let (Some(max_lev), Some(lev)) = (decision.max_leverage, intent.leverage) {
            if lev > max_lev {
                return Some(format!("intended leverage {lev} exceeds cap {max_lev}"));
            }
        }
        None
    }

    fn portfolio_inputs(&self) -> Result<(Vec<PositionSnapshot>, PortfolioState), String> {
        let open = self
            .ledger
            .open_positions()
            .map_err(|e| format!("open positions unavailable: {e}"))?;

        let balance = self
            .store
            .current_balance(self.config.initial_balance_usd)
            .map_err(|e| format!("balance unavailable: {e}"))?;
        let per_trade_budget =
            balance * Decimal::from_f64(self.config.risk_percent / 100.0).unwrap_or(Decimal::ZERO);

        if open.is_empty() {
            return Ok((Vec::new(), PortfolioState::empty(Size::new(per_trade_budget))));
        }

        let positions: Vec<PositionSnapshot> = open
            .iter()
            .map(|p| {
                let direction = match p.side {
                    PositionSide::Long => PositionDirection::Long,
                    PositionSide::Short => PositionDirection::Short,
                };
                PositionSnapshot::new(
                    p.symbol.clone(),
                    direction,
                    p.size_usd,
                    p.entry,
                    0.0,
                    p.state_at_entry,
                    p.confidence_at_entry,
                    p.entropy_at_entry,
                )
                .map_err(|e| e.to_string())
            })
            .collect::<Result<_, _>>()?;

        let risk_budget = per_trade_budget * Decimal::from(positions.len().max(1) as i64);
        let portfolio = build_portfolio_state(&positions, Size::new(risk_budget))
            .map_err(|e| e.to_string())?;

        Ok((positions, portfolio))
    }

    /// Write the collected trace strictly after the decision. Failures are
    /// logged and swallowed: the trace must never affect the verdict.
    fn save_trace(
        &self,
        symbol: &str,
        snapshot: &SignalSnapshot,
        trace: &[TraceEntry],
        final_decision: &str,
    ) {
        let context = json!({
            "confidence": snapshot.confidence(),
            "entropy": snapshot.entropy(),
            "score": snapshot.score(),
            "risk_level": snapshot.risk_level().as_str(),
            "final_decision": final_decision,
        });

        for (source, allow, reason, level) in trace {
            let record = DecisionRecord::new(
                symbol,
                *source,
                *allow,
                *level,
                reason.clone(),
                context.clone(),
            );
            if let Err(e) = self.store.log_decision(&record) {
                warn!(symbol, source, ?e, "failed to record decision trace entry");
            }
        }

        let final_allow = final_decision == "SEND";
        let final_record = DecisionRecord::new(
            symbol,
            "Gatekeeper",
            final_allow,
            if final_allow {
                BlockLevel::None
            } else {
                BlockLevel::Hard
            },
            format!("Final decision: {final_decision}"),
            json!({ "final_decision": final_decision, "trace_entries": trace.len() }),
        );
        if let Err(e) = self.store.log_decision(&final_record) {
            warn!(symbol, ?e, "failed to record final gatekeeper decision");
        }
    }

    fn append_signal_log(&self, snapshot: &SignalSnapshot, intent: &SignalIntent) {
        let state_at = |tf: Timeframe| snapshot.states().get(&tf).copied().flatten();
        let entry = SignalLogEntry {
            timestamp: snapshot.timestamp(),
            symbol: intent.symbol.clone(),
            state_1h: state_at(Timeframe::H1),
            state_30m: state_at(Timeframe::M30),
            state_15m: state_at(Timeframe::M15),
            state_5m: state_at(Timeframe::M5),
            risk: intent.risk_label.clone(),
            entry: Some(intent.entry.inner()),
            exit: Some(intent.target.inner()),
            rr: snapshot.rr_ratio(),
        };
        if let Err(e) = self.signal_log.append(&entry) {
            warn!(symbol = %intent.symbol, ?e, "failed to append signal log");
        }
    }
}
