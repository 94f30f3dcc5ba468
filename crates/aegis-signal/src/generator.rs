//! The per-cycle orchestrator: fetch, classify, score, snapshot, and hand
//! off to the gatekeeper.
//!
//! Every stage runs under an explicit timeout. A timed-out stage is a
//! health signal: it is logged and counted, never a termination. Analysis
//! brains are NON_CRITICAL: their failure leaves the previous slice
//! intact and the cycle continues.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use aegis_brains::{
    CognitiveFilter, DecisionCore, MarketRegimeBrain, OpportunityAwareness, RiskExposureBrain,
};
use aegis_core::{
    calculate_confidence, calculate_entropy, mode_to_decision, MarketMode, Price, Size,
    SnapshotBuilder, StatesByTimeframe, Timeframe,
};
use aegis_feed::{
    adx, atr, bollinger_bands, check_price_spike, determine_state, ema_crossover, fetch_all_candles,
    is_flat, macd, market_direction, rsi, stochastic, trend_strength, volume_analysis,
    calculate_volatility_metrics, calculate_volatility_pct, volatility_score, CandleSet,
    FetchConfig, KlineClient, VolumeTrend,
};
use aegis_gatekeeper::{Gatekeeper, SendOutcome, SignalIntent, SignalSink};
use aegis_persistence::SqliteStore;
use aegis_state::{PositionSide, SystemStateHandle};

use crate::correlation::{analyze_market_correlations, correlation_score};
use crate::error::{SignalError, SignalResult};
use crate::leverage::recommended_leverage;
use crate::risk::{calculate_stop_distance, enhanced_risk_level};
use crate::rr::calculate_adaptive_rr;
use crate::scoring::{calculate_score, entry_conditions, market_mode, MomentumData};
use crate::timefilter::{is_good_time, session_context, TradingWindow};

fn synthetic_tick_enabled() -> bool {
    std::env::var("ENABLE_SYNTHETIC_DECISION_TICK")
        .map(|v| {
            let v = v.trim();
            !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false")
        })
        .unwrap_or(false)
}

/// Generator configuration.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub symbols: Vec<String>,
    pub candle_limit: u32,
    pub fetch_concurrency: usize,
    pub initial_balance_usd: Decimal,
    /// Base risk percent per trade.
    pub risk_percent: f64,
    pub min_position_usd: Decimal,
    pub max_position_usd: Decimal,
    pub trading_window: TradingWindow,
    pub brain_timeout: Duration,
    pub fetch_timeout: Duration,
    pub correlation_timeout: Duration,
    pub signal_pass_timeout: Duration,
    /// Persist a state checkpoint every N cycles.
    pub checkpoint_every: u64,
    pub spike_threshold_pct: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            candle_limit: 120,
            fetch_concurrency: 20,
            initial_balance_usd: Decimal::from(10000),
            risk_percent: 2.0,
            min_position_usd: Decimal::from(10),
            max_position_usd: Decimal::from(1000),
            trading_window: TradingWindow::default(),
            brain_timeout: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(60),
            correlation_timeout: Duration::from_secs(30),
            signal_pass_timeout: Duration::from_secs(120),
            checkpoint_every: 5,
            spike_threshold_pct: 2.0,
        }
    }
}

/// Per-cycle statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub good_time: bool,
    pub processed: u32,
    pub signals_sent: u32,
    pub signals_blocked: u32,
    pub skipped: u32,
    pub errors: u32,
}

/// The orchestrator.
pub struct SignalGenerator {
    client: KlineClient,
    config: GeneratorConfig,
    regime_brain: MarketRegimeBrain,
    exposure_brain: RiskExposureBrain,
    cognitive_filter: CognitiveFilter,
    opportunity: OpportunityAwareness,
    decision_core: Arc<DecisionCore>,
    gatekeeper: Arc<Gatekeeper>,
    sink: Arc<dyn SignalSink>,
    store: Arc<SqliteStore>,
    state: SystemStateHandle,
}

impl SignalGenerator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: KlineClient,
        config: GeneratorConfig,
        decision_core: Arc<DecisionCore>,
        gatekeeper: Arc<Gatekeeper>,
        sink: Arc<dyn SignalSink>,
        store: Arc<SqliteStore>,
        state: SystemStateHandle,
    ) -> Self {
        Self {
            client,
            config,
            regime_brain: MarketRegimeBrain::new(),
            exposure_brain: RiskExposureBrain::default(),
            cognitive_filter: CognitiveFilter::new(),
            opportunity: OpportunityAwareness::new(),
            decision_core,
            gatekeeper,
            sink,
            store,
            state,
        }
    }

    /// Run one full analysis cycle.
    pub async fn run_cycle(&self) -> SignalResult<CycleStats> {
        let mut stats = CycleStats::default();

        if !is_good_time(&self.config.trading_window, Utc::now()) {
            debug!("outside the trading window, skipping cycle");
            return Ok(stats);
        }
        stats.good_time = true;

        // 1. Fetch all candles under the global budget.
        let fetch_config = FetchConfig {
            limit: self.config.candle_limit,
            max_concurrency: self.config.fetch_concurrency,
        };
        let candles = tokio::time::timeout(
            self.config.fetch_timeout,
            fetch_all_candles(&self.client, &self.config.symbols, &Timeframe::ALL, &fetch_config),
        )
        .await
        .map_err(|_| SignalError::StageTimeout("candle fetch"))?;
        info!(symbols = candles.len(), "candles fetched");

        // 2. Analysis brains, each bounded and each NON_CRITICAL.
        self.run_analysis_brains(&candles).await;

        // 3. The global go/no-go from the decision core.
        let global = self.decision_core.should_i_trade(&self.state, None);
        if !global.can_trade {
            info!(reason = %global.reason, "decision core blocks this cycle");
            let note = format!("Decision Core: {}", global.reason);
            if let Err(e) = self.sink.send_message(&note).await {
                warn!(?e, "failed to send decision notice");
            }
            return Ok(stats);
        }

        // 4. Spike alerts and correlations, best-effort.
        self.check_spikes(&candles).await;
        let correlations = match tokio::time::timeout(self.config.correlation_timeout, async {
            analyze_market_correlations(&self.config.symbols, &candles)
        })
        .await
        {
            Ok(correlations) => {
                self.state.update_market_correlations(correlations.clone());
                correlations
            }
            Err(_) => {
                warn!("correlation analysis timed out");
                BTreeMap::new()
            }
        };

        if synthetic_tick_enabled() {
            self.run_synthetic_tick(&mut stats).await;
        }

        // 5. Per-symbol pass.
        for symbol in self.config.symbols.clone() {
            stats.processed += 1;
            let pass = tokio::time::timeout(
                self.config.signal_pass_timeout,
                self.process_symbol(&symbol, &candles, &correlations),
            )
            .await;

            match pass {
                Ok(Ok(Some(SendOutcome::Sent { .. }))) => stats.signals_sent += 1,
                Ok(Ok(Some(SendOutcome::Blocked { .. }))) => stats.signals_blocked += 1,
                Ok(Ok(Some(SendOutcome::Duplicate))) => stats.skipped += 1,
                Ok(Ok(Some(SendOutcome::SendFailed { .. }))) => stats.errors += 1,
                Ok(Ok(None)) => stats.skipped += 1,
                Ok(Err(e)) => {
                    warn!(symbol, ?e, "symbol pass failed");
                    stats.errors += 1;
                }
                Err(_) => {
                    warn!(symbol, "symbol pass timed out");
                    stats.errors += 1;
                }
            }
        }

        // 6. Periodic checkpoint.
        self.state.record_cycle(stats.errors == 0);
        let total_cycles = self.state.performance_metrics().total_cycles;
        if self.config.checkpoint_every > 0 && total_cycles % self.config.checkpoint_every == 0 {
            let checkpoint = self.state.create_checkpoint();
            match self.store.save_checkpoint(&checkpoint) {
                Ok(_) => {
                    if let Err(e) = self.store.cleanup_old_checkpoints(10) {
                        warn!(?e, "checkpoint cleanup failed");
                    }
                }
                Err(e) => warn!(?e, "checkpoint save failed"),
            }
        }

        info!(
            processed = stats.processed,
            sent = stats.signals_sent,
            blocked = stats.signals_blocked,
            skipped = stats.skipped,
            errors = stats.errors,
            "cycle complete"
        );
        Ok(stats)
    }

    /// Run the three analysis brains, each under its own timeout. A
    /// failure leaves the previous slice intact.
    async fn run_analysis_brains(&self, candles: &CandleSet) {
        let symbols = self.config.symbols.clone();

        let regime = {
            let brain = self.regime_brain.clone();
            let state = self.state.clone();
            let candles = candles.clone();
            let symbols = symbols.clone();
            tokio::time::timeout(
                self.config.brain_timeout,
                tokio::task::spawn_blocking(move || brain.analyze(&symbols, &candles, &state)),
            )
            .await
        };
        match regime {
            Ok(Ok(regime)) => {
                info!(
                    trend = %regime.trend_type,
                    volatility = %regime.volatility_level,
                    sentiment = %regime.risk_sentiment,
                    "market regime updated"
                );
            }
            _ => warn!("market regime brain failed or timed out, keeping previous slice"),
        }

        let balance = self
            .store
            .current_balance(self.config.initial_balance_usd)
            .unwrap_or(self.config.initial_balance_usd);
        let exposure = {
            let brain = self.exposure_brain.clone();
            let state = self.state.clone();
            tokio::time::timeout(
                self.config.brain_timeout,
                tokio::task::spawn_blocking(move || brain.analyze(&state, balance)),
            )
            .await
        };
        match exposure {
            Ok(Ok(exposure)) => debug!(
                risk_pct = exposure.total_risk_pct,
                positions = exposure.active_positions,
                "risk exposure updated"
            ),
            _ => warn!("risk exposure brain failed or timed out, keeping previous slice"),
        }

        let cognitive = {
            let filter = self.cognitive_filter.clone();
            let state = self.state.clone();
            tokio::time::timeout(
                self.config.brain_timeout,
                tokio::task::spawn_blocking(move || filter.analyze(&state)),
            )
            .await
        };
        match cognitive {
            Ok(Ok(cognitive)) => debug!(
                overtrading = cognitive.overtrading_score,
                pause = cognitive.should_pause,
                "cognitive state updated"
            ),
            _ => warn!("cognitive filter failed or timed out, keeping previous slice"),
        }
    }

    /// Spike alerts, best-effort.
    async fn check_spikes(&self, candles: &CandleSet) {
        for symbol in &self.config.symbols {
            let Some(m5) = candles.get(symbol).and_then(|tf| tf.get(&Timeframe::M5)) else {
                continue;
            };
            let spike = check_price_spike(m5, self.config.spike_threshold_pct);
            if spike.has_spike {
                let direction = spike
                    .direction
                    .map(|d| format!("{d:?}").to_uppercase())
                    .unwrap_or_default();
                let cause = spike.cause.as_deref().unwrap_or("UNKNOWN");
                let note = format!(
                    "Spike alert {symbol}: {direction} {:.2}% ({cause})",
                    spike.spike_pct
                );
                warn!(symbol, pct = spike.spike_pct, cause, "price spike");
                if let Err(e) = self.sink.send_message(&note).await {
                    warn!(?e, "failed to send spike alert");
                }
            }
        }
    }

    /// Deterministic pipeline exercise for runtime tests.
    async fn run_synthetic_tick(&self, stats: &mut CycleStats) {
        let symbol = "SYNTHUSDT";
        // Always treated as fresh so the chain runs every cycle.
        self.state.reset_signal_cache(Some(symbol));

        let snapshot = SnapshotBuilder::new(symbol)
            .anchor(Timeframe::ANCHOR)
            .state(Timeframe::M15, Some(aegis_core::MarketState::D))
            .score(90, 125)
            .confidence(0.7)
            .entropy(0.3)
            .decision(aegis_core::SignalDecision::Enter, "synthetic decision tick")
            .time_context(session_context(&self.config.trading_window, Utc::now()))
            .entry_zone(
                Some(Price::new(Decimal::from(100))),
                Some(Price::new(Decimal::from(104))),
                Some(Price::new(Decimal::from(98))),
            )
            .build();

        let Ok(snapshot) = snapshot else {
            return;
        };

        let intent = SignalIntent {
            symbol: symbol.to_string(),
            side: PositionSide::Long,
            entry: Price::new(Decimal::from(100)),
            stop: Price::new(Decimal::from(98)),
            target: Price::new(Decimal::from(104)),
            position_size_usd: Size::new(Decimal::from(50)),
            leverage: None,
            rr_ratio: 2.0,
            volatility_pct: 1.0,
            score: 90,
            mode: MarketMode::Trade,
            risk_label: "LOW".to_string(),
            reasons: vec!["synthetic decision tick".to_string()],
        };

        match self.gatekeeper.send_signal(&snapshot, intent).await {
            SendOutcome::Sent { .. } => stats.signals_sent += 1,
            SendOutcome::Blocked { .. } => stats.signals_blocked += 1,
            _ => {}
        }
    }

    /// Full per-symbol analysis. `None` means no signal candidate this
    /// cycle; `Some(outcome)` is the gatekeeper's verdict.
    async fn process_symbol(
        &self,
        symbol: &str,
        candles: &CandleSet,
        correlations: &BTreeMap<String, f64>,
    ) -> SignalResult<Option<SendOutcome>> {
        let Some(per_tf) = candles.get(symbol) else {
            debug!(symbol, "no candle data, skipping");
            return Ok(None);
        };
        let Some(m15) = per_tf.get(&Timeframe::M15) else {
            debug!(symbol, "no 15m data, skipping");
            return Ok(None);
        };

        // Classify states and directions per timeframe.
        let mut states = StatesByTimeframe::new();
        let mut directions = BTreeMap::new();
        for tf in Timeframe::ALL {
            if let Some(series) = per_tf.get(&tf) {
                let tf_atr = atr(series, 14);
                states.insert(tf, determine_state(series, tf_atr));
                if matches!(tf, Timeframe::M30 | Timeframe::H1 | Timeframe::H4) {
                    directions.insert(tf, market_direction(series));
                }
            }
        }

        let atr_15m = atr(m15, 14);
        let flat = is_flat(m15, atr_15m);

        // Volatility filter.
        let volatility = calculate_volatility_metrics(m15, 20);
        if !volatility.is_tradeable {
            debug!(
                symbol,
                level = %volatility.level,
                atr_pct = volatility.atr_pct,
                "volatility out of range, skipping"
            );
            return Ok(None);
        }
        let (vol_score, vol_reasons) = volatility_score(&volatility);

        // Momentum indicators.
        let momentum = MomentumData {
            rsi_15m: Some(rsi(m15, 14)),
            macd_15m: Some(macd(m15, 12, 26, 9)),
            bb_15m: bollinger_bands(m15, 20, 2.0),
            stoch_15m: stochastic(m15, 14),
            adx_15m: Some(adx(m15, 14)),
            ema_cross_15m: Some(ema_crossover(m15, 12, 26)),
            trend_strength_30m: per_tf.get(&Timeframe::M30).map(|c| trend_strength(c, 20)),
            volume_15m: Some(volume_analysis(m15, 20)),
        };

        // Score: base + volatility + correlation bonuses.
        let mut breakdown = calculate_score(&states, &directions, flat, true, Some(&momentum));
        breakdown.score += vol_score;
        breakdown.reasons.extend(vol_reasons);
        let (corr_score, corr_reasons) = correlation_score(correlations, symbol);
        breakdown.score += corr_score;
        breakdown.reasons.extend(corr_reasons);
        let score = breakdown.score.min(125);

        let mode = market_mode(score);
        self.opportunity.observe(&self.state, symbol, score, mode);
        debug!(symbol, score, mode = mode.as_str(), "symbol scored");

        if mode == MarketMode::Stop {
            return Ok(None);
        }

        // Manage open paper trades against the latest 5m close.
        if let Some(m5) = per_tf.get(&Timeframe::M5) {
            if let Some(last) = m5.last() {
                self.settle_paper_trades(symbol, last.close).await;
            }
        }

        // Entry conditions.
        let conditions = entry_conditions(&states, &directions, score, breakdown.trend_strength_30m);
        if conditions.is_empty() {
            return Ok(None);
        }

        // Liquidity floor.
        if momentum
            .volume_15m
            .map(|v| v.volume_trend == VolumeTrend::Low)
            .unwrap_or(false)
        {
            debug!(symbol, "low liquidity, skipping signal");
            return Ok(None);
        }

        // Entry zone from the latest 5m bar and the 30m bias.
        let Some(m5) = per_tf.get(&Timeframe::M5) else {
            return Ok(None);
        };
        let Some(last_5m) = m5.last() else {
            return Ok(None);
        };
        let entry = last_5m.close;
        let bias = directions
            .get(&Timeframe::M30)
            .copied()
            .unwrap_or(aegis_core::Direction::Flat);

        let (side, stop) = match bias {
            aegis_core::Direction::Up => (PositionSide::Long, last_5m.low),
            aegis_core::Direction::Down => (PositionSide::Short, last_5m.high),
            aegis_core::Direction::Flat => {
                debug!(symbol, "flat bias, no entry direction");
                return Ok(None);
            }
        };

        let stop_info = calculate_stop_distance(entry.to_f64(), stop.to_f64(), atr_15m);
        if !stop_info.is_valid {
            debug!(
                symbol,
                distance_pct = stop_info.stop_distance_pct,
                "stop distance out of range, skipping"
            );
            return Ok(None);
        }

        let risk = enhanced_risk_level(
            &states,
            Some(&directions),
            Some(&stop_info),
            Some(&momentum),
            Some(volatility.atr_pct),
        );

        let volatility_pct = calculate_volatility_pct(m15, 20);
        let rr = calculate_adaptive_rr(
            entry.to_f64(),
            stop.to_f64(),
            volatility_pct,
            breakdown.trend_strength_30m,
            risk,
        );
        let Some(target) = Decimal::from_f64(rr.target) else {
            return Ok(None);
        };

        let leverage = recommended_leverage(
            &states,
            Some(&directions),
            atr_15m,
            entry.to_f64(),
            stop.to_f64(),
        );

        let position_size = self.initial_position_size(entry, stop)?;

        // Build the snapshot and stamp its own cognition.
        let snapshot = SnapshotBuilder::new(symbol)
            .timestamp(Utc::now())
            .anchor(Timeframe::ANCHOR)
            .states(states)
            .directions(directions)
            .market_regime(self.state.market_regime())
            .volatility_level(Some(volatility.level))
            .correlation_level(correlations.get(symbol).map(|c| c.clamp(0.0, 1.0)))
            .score(score, 125)
            .risk_level(risk)
            .recommended_leverage(Some(Decimal::from(leverage)))
            .entry_zone(Some(entry), Some(Price::new(target)), Some(stop))
            .decision(mode_to_decision(mode), rr.reason.clone())
            .time_context(session_context(&self.config.trading_window, Utc::now()))
            .reasons(breakdown.reasons.clone())
            .build()?;
        let confidence = calculate_confidence(&snapshot);
        let entropy = calculate_entropy(&snapshot);
        let snapshot = snapshot.with_cognition(confidence, entropy);

        let intent = SignalIntent {
            symbol: symbol.to_string(),
            side,
            entry,
            stop,
            target: Price::new(target),
            position_size_usd: position_size,
            leverage: Some(Decimal::from(leverage)),
            rr_ratio: rr.rr_ratio,
            volatility_pct,
            score,
            mode,
            risk_label: risk.as_str().to_string(),
            reasons: breakdown.reasons,
        };

        Ok(Some(self.gatekeeper.send_signal(&snapshot, intent).await))
    }

    /// Close paper trades whose TP/SL the price crossed, and report.
    async fn settle_paper_trades(&self, symbol: &str, price: Price) {
        let closed = match self.gatekeeper.ledger().check_trades(symbol, price, &self.state) {
            Ok(closed) => closed,
            Err(e) => {
                warn!(symbol, ?e, "paper trade sweep failed");
                return;
            }
        };

        for trade in closed {
            use rust_decimal::prelude::ToPrimitive;
            self.gatekeeper
                .record_outcome(trade.pnl.to_f64().unwrap_or(0.0));
            let report = format!(
                "Trade closed {symbol} {} @ {} ({}) PnL {} USDT",
                trade.record.side, trade.close_price, trade.close_reason, trade.pnl
            );
            if let Err(e) = self.sink.send_message(&report).await {
                warn!(?e, "failed to send trade report");
            }
        }
    }

    /// Risk-based starting size, clamped to the configured bounds. The
    /// sizer downstream remains the final writer.
    fn initial_position_size(&self, entry: Price, stop: Price) -> SignalResult<Size> {
        let balance = self
            .store
            .current_balance(self.config.initial_balance_usd)
            .unwrap_or(self.config.initial_balance_usd);

        let risk_amount = balance
            * Decimal::from_f64(self.config.risk_percent / 100.0).unwrap_or(Decimal::ZERO);
        let risk_per_unit = (entry.inner() - stop.inner()).abs();

        let size = if risk_per_unit.is_zero() {
            self.config.min_position_usd
        } else {
            (risk_amount / risk_per_unit * entry.inner())
                .round_dp(2)
                .clamp(self.config.min_position_usd, self.config.max_position_usd)
        };

        Ok(Size::new(size))
    }
}
