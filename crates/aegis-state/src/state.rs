//! The shared state handle and its slices.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use aegis_core::{
    CognitiveState, MarketRegime, MarketState, Opportunity, Price, RiskExposure, Size,
};

use crate::checkpoint::StateCheckpoint;
use crate::health::{PerformanceMetrics, SystemHealth};

/// Maximum recent signals kept in memory.
const RECENT_SIGNALS_CAP: usize = 50;

/// Recent signals carried into a checkpoint.
const CHECKPOINT_SIGNALS: usize = 20;

/// Side of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "LONG" => Some(Self::Long),
            "SHORT" => Some(Self::Short),
            _ => None,
        }
    }
}

/// Cached view of one open paper position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub trade_id: i64,
    pub symbol: String,
    pub side: PositionSide,
    pub size_usd: Size,
    pub entry: Price,
    pub stop: Price,
    pub target: Price,
    pub state_at_entry: Option<MarketState>,
    pub confidence_at_entry: f64,
    pub entropy_at_entry: f64,
    pub opened_at: DateTime<Utc>,
}

/// Lightweight record of an emitted or evaluated signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentSignal {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub anchor_state: Option<MarketState>,
    pub decision: String,
    pub confidence: f64,
    pub entropy: f64,
    /// Realized outcome in USD once the paper trade closes, if any.
    pub outcome: Option<f64>,
}

#[derive(Debug, Default)]
struct AnalysisSlice {
    market_regime: Option<MarketRegime>,
    risk_exposure: Option<RiskExposure>,
    cognitive_state: Option<CognitiveState>,
    opportunities: BTreeMap<String, Opportunity>,
    market_correlations: BTreeMap<String, f64>,
    last_analysis_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct DecisionSlice {
    can_trade: bool,
    last_decision_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct SignalsSlice {
    recent: VecDeque<RecentSignal>,
    /// Last emitted anchor-timeframe state per symbol, for dedup.
    cache: BTreeMap<String, MarketState>,
}

#[derive(Debug, Default)]
struct Inner {
    analysis: RwLock<AnalysisSlice>,
    decision: RwLock<DecisionSlice>,
    positions: RwLock<Vec<OpenPosition>>,
    signals: Mutex<SignalsSlice>,
    metrics: Mutex<PerformanceMetrics>,
    health: Mutex<SystemHealth>,
}

/// Cheaply clonable handle over the shared system state.
///
/// Read-many / single-writer-per-slice: each brain updates its own slice,
/// validators read. Atomicity is guaranteed at slice granularity only.
#[derive(Debug, Clone, Default)]
pub struct SystemStateHandle {
    inner: Arc<Inner>,
}

impl SystemStateHandle {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- analysis slice (writers: analysis brains) ----

    pub fn update_market_regime(&self, regime: MarketRegime) {
        let mut slice = self.inner.analysis.write();
        slice.market_regime = Some(regime);
        slice.last_analysis_time = Some(Utc::now());
    }

    pub fn update_risk_exposure(&self, exposure: RiskExposure) {
        let mut slice = self.inner.analysis.write();
        slice.risk_exposure = Some(exposure);
        slice.last_analysis_time = Some(Utc::now());
    }

    pub fn update_cognitive_state(&self, cognitive: CognitiveState) {
        let mut slice = self.inner.analysis.write();
        slice.cognitive_state = Some(cognitive);
        slice.last_analysis_time = Some(Utc::now());
    }

    pub fn update_opportunity(&self, opportunity: Opportunity) {
        let mut slice = self.inner.analysis.write();
        slice
            .opportunities
            .insert(opportunity.symbol.clone(), opportunity);
        slice.last_analysis_time = Some(Utc::now());
    }

    pub fn update_market_correlations(&self, correlations: BTreeMap<String, f64>) {
        let mut slice = self.inner.analysis.write();
        slice.market_correlations = correlations;
        slice.last_analysis_time = Some(Utc::now());
    }

    pub fn market_regime(&self) -> Option<MarketRegime> {
        self.inner.analysis.read().market_regime.clone()
    }

    pub fn risk_exposure(&self) -> Option<RiskExposure> {
        self.inner.analysis.read().risk_exposure.clone()
    }

    pub fn cognitive_state(&self) -> Option<CognitiveState> {
        self.inner.analysis.read().cognitive_state.clone()
    }

    pub fn opportunities(&self) -> BTreeMap<String, Opportunity> {
        self.inner.analysis.read().opportunities.clone()
    }

    pub fn market_correlations(&self) -> BTreeMap<String, f64> {
        self.inner.analysis.read().market_correlations.clone()
    }

    pub fn last_analysis_time(&self) -> Option<DateTime<Utc>> {
        self.inner.analysis.read().last_analysis_time
    }

    // ---- decision slice (writer: DecisionCore) ----

    pub fn set_can_trade(&self, can_trade: bool) {
        let mut slice = self.inner.decision.write();
        slice.can_trade = can_trade;
        slice.last_decision_time = Some(Utc::now());
    }

    pub fn can_trade(&self) -> bool {
        self.inner.decision.read().can_trade
    }

    pub fn last_decision_time(&self) -> Option<DateTime<Utc>> {
        self.inner.decision.read().last_decision_time
    }

    // ---- positions slice ----

    pub fn update_open_positions(&self, positions: Vec<OpenPosition>) {
        *self.inner.positions.write() = positions;
    }

    pub fn open_positions(&self) -> Vec<OpenPosition> {
        self.inner.positions.read().clone()
    }

    // ---- signals slice ----

    pub fn add_signal(&self, signal: RecentSignal) {
        let mut slice = self.inner.signals.lock();
        slice.recent.push_back(signal);
        while slice.recent.len() > RECENT_SIGNALS_CAP {
            slice.recent.pop_front();
        }
    }

    pub fn recent_signals(&self) -> Vec<RecentSignal> {
        self.inner.signals.lock().recent.iter().cloned().collect()
    }

    pub fn recent_signal_count(&self) -> usize {
        self.inner.signals.lock().recent.len()
    }

    /// Dedup check: true when the anchor-timeframe state changed since the
    /// last emission for this symbol. Updates the cache on change.
    pub fn is_new_signal(&self, symbol: &str, anchor_state: Option<MarketState>) -> bool {
        let Some(state) = anchor_state else {
            return false;
        };

        let mut slice = self.inner.signals.lock();
        if slice.cache.get(symbol) == Some(&state) {
            return false;
        }
        slice.cache.insert(symbol.to_string(), state);
        true
    }

    pub fn reset_signal_cache(&self, symbol: Option<&str>) {
        let mut slice = self.inner.signals.lock();
        match symbol {
            Some(s) => {
                slice.cache.remove(s);
            }
            None => slice.cache.clear(),
        }
    }

    // ---- metrics slice ----

    pub fn record_cycle(&self, success: bool) {
        let mut metrics = self.inner.metrics.lock();
        metrics.total_cycles += 1;
        if success {
            metrics.successful_cycles += 1;
        } else {
            metrics.errors += 1;
        }
    }

    pub fn record_error(&self, error: impl Into<String>) {
        {
            let mut metrics = self.inner.metrics.lock();
            metrics.errors += 1;
            metrics.last_error = Some(error.into());
        }
        self.inner.health.lock().consecutive_errors += 1;
    }

    pub fn reset_errors(&self) {
        self.inner.health.lock().consecutive_errors = 0;
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        self.inner.metrics.lock().clone()
    }

    // ---- health slice ----

    pub fn update_heartbeat(&self) {
        self.inner.health.lock().last_heartbeat = Some(Utc::now());
    }

    pub fn set_running(&self, running: bool) {
        self.inner.health.lock().is_running = running;
    }

    pub fn system_health(&self) -> SystemHealth {
        self.inner.health.lock().clone()
    }

    /// Applies the state machine's derived flags.
    ///
    /// Contract: called only from `SystemStateMachine::sync_to_system_state`.
    /// Writing these flags from anywhere else breaks the derived-state
    /// invariant.
    pub fn sync_flags_from_state_machine(&self, safe_mode: bool, trading_paused: bool) {
        let mut health = self.inner.health.lock();
        health.safe_mode = safe_mode;
        health.trading_paused = trading_paused;
    }

    // ---- checkpoints ----

    /// Checkpoint of the durable subset of state.
    ///
    /// Ephemeral analysis (regime, risk, cognition, opportunities,
    /// correlations, can_trade) is intentionally excluded; it goes stale
    /// within one cycle.
    pub fn create_checkpoint(&self) -> StateCheckpoint {
        let signals = self.inner.signals.lock();
        let recent: Vec<RecentSignal> = signals
            .recent
            .iter()
            .rev()
            .take(CHECKPOINT_SIGNALS)
            .rev()
            .cloned()
            .collect();

        StateCheckpoint {
            timestamp: Utc::now(),
            open_positions: self.inner.positions.read().clone(),
            performance_metrics: self.inner.metrics.lock().clone(),
            system_health: self.inner.health.lock().clone(),
            recent_signals: recent,
            signal_cache: signals.cache.clone(),
        }
    }

    /// Restore the durable subset from a checkpoint. Ephemeral slices are
    /// left untouched (empty on a fresh handle).
    pub fn restore_checkpoint(&self, checkpoint: StateCheckpoint) {
        *self.inner.positions.write() = checkpoint.open_positions;
        *self.inner.metrics.lock() = checkpoint.performance_metrics;
        *self.inner.health.lock() = checkpoint.system_health;

        let mut signals = self.inner.signals.lock();
        signals.recent = checkpoint.recent_signals.into();
        signals.cache = checkpoint.signal_cache;
    }
}
