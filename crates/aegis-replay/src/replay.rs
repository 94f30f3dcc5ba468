//! Replay: recorded snapshots through the current validator logic.
//!
//! The engine runs MetaDecisionBrain, DecisionCore, PortfolioBrain, and
//! PositionSizer in the live chain's order, against a detached throwaway
//! state handle. The live `SystemState` is never touched: the decision
//! core's `can_trade` write lands in the detached handle and dies with it.

use rust_decimal::Decimal;

use aegis_brains::{
    DecisionCore, MetaDecisionBrain, MetaInputs, PortfolioBrain, PortfolioDecision, PortfolioState,
    PositionSizer, PositionSnapshot,
};
use aegis_core::{SignalSnapshot, Size};
use aegis_state::SystemStateHandle;

use crate::report::ReplayReport;

/// The replay engine.
pub struct ReplayEngine {
    meta: MetaDecisionBrain,
    decision_core: DecisionCore,
    portfolio_brain: PortfolioBrain,
    sizer: PositionSizer,
    /// Book context the snapshots are replayed against.
    open_positions: Vec<PositionSnapshot>,
    balance_usd: Decimal,
    risk_budget: Size,
}

impl ReplayEngine {
    pub fn new(balance_usd: Decimal, risk_budget: Size) -> Self {
        Self {
            meta: MetaDecisionBrain::new(),
            decision_core: DecisionCore::default(),
            portfolio_brain: PortfolioBrain::new(),
            sizer: PositionSizer::default(),
            open_positions: Vec::new(),
            balance_usd,
            risk_budget,
        }
    }

    /// Replay against a fixed book of positions.
    pub fn with_positions(mut self, positions: Vec<PositionSnapshot>) -> Self {
        self.open_positions = positions;
        self
    }

    /// Run every snapshot through the current chain and aggregate.
    pub fn replay_snapshots(&self, snapshots: &[SignalSnapshot]) -> ReplayReport {
        let mut report = ReplayReport::default();
        report.total_snapshots = snapshots.len();

        for snapshot in snapshots {
            self.replay_one(snapshot, &mut report);
        }

        report.finalize();
        report
    }

    fn replay_one(&self, snapshot: &SignalSnapshot, report: &mut ReplayReport) {
        // Meta stage, from the snapshot's own metrics.
        let meta_result = self.meta.evaluate(&MetaInputs {
            market_regime: snapshot.market_regime().cloned(),
            confidence: snapshot.confidence(),
            entropy: snapshot.entropy(),
            time_context: snapshot.time_context(),
            ..Default::default()
        });
        if !meta_result.allow_trading {
            report.meta_blocked += 1;
            *report
                .meta_block_reasons
                .entry(meta_result.reason)
                .or_default() += 1;
            return;
        }

        // Decision stage against a detached, throwaway state. The
        // can_trade write is reproduced only there, never into any shared
        // handle.
        let detached = SystemStateHandle::new();
        let decision = self.decision_core.should_i_trade(&detached, Some(snapshot.symbol()));
        if !decision.can_trade {
            report.decision_blocked += 1;
            *report
                .decision_block_reasons
                .entry(decision.reason)
                .or_default() += 1;
            return;
        }

        // Portfolio stage against the configured book.
        let portfolio_state = match aegis_brains::build_portfolio_state(
            &self.open_positions,
            self.risk_budget,
        ) {
            Ok(state) => state,
            Err(_) => PortfolioState::empty(self.risk_budget),
        };

        if !self.open_positions.is_empty() {
            let analysis =
                self.portfolio_brain
                    .evaluate(snapshot, &self.open_positions, &portfolio_state);
            if analysis.decision == PortfolioDecision::Block {
                report.portfolio_blocked += 1;
                *report
                    .portfolio_block_reasons
                    .entry(analysis.reason)
                    .or_default() += 1;
                return;
            }
            if analysis.recommended_size_multiplier < 1.0 {
                report.size_reduced_count += 1;
                report.size_multiplier_sum += analysis.recommended_size_multiplier;
            }
        }

        // Sizer stage.
        let sizing = self.sizer.calculate(
            snapshot.confidence(),
            snapshot.entropy(),
            &portfolio_state,
            self.balance_usd,
        );
        if !sizing.position_allowed {
            report.sizer_blocked += 1;
            return;
        }

        report.allowed_trades += 1;
        report.final_risk_sum += sizing.final_risk_pct;
    }
}
