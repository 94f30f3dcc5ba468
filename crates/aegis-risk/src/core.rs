//! The risk evaluation itself.

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{
    BehavioralCounters, CapitalSnapshot, ExposureSnapshot, PositionExposure, RiskState,
    RiskVerdict, SystemHealthFlags, TradingIntent, TradingPermission, Violation, ViolationReport,
};

fn default_max_total_loss_pct() -> Decimal {
    Decimal::from(10)
}

fn default_max_loss_24h_pct() -> Decimal {
    Decimal::from(5)
}

fn default_max_loss_7d_pct() -> Decimal {
    Decimal::from(8)
}

fn default_max_single_position_pct() -> Decimal {
    Decimal::from(20)
}

fn default_max_total_exposure_pct() -> Decimal {
    Decimal::from(60)
}

fn default_max_group_exposure_pct() -> Decimal {
    Decimal::from(30)
}

fn default_max_actions_per_hour() -> u32 {
    6
}

fn default_max_actions_per_24h() -> u32 {
    20
}

fn default_loss_cooldown_minutes() -> i64 {
    30
}

fn default_min_action_interval_minutes() -> i64 {
    5
}

fn default_max_consecutive_errors() -> u32 {
    5
}

fn default_limited_scale_factor() -> Decimal {
    Decimal::new(5, 1) // 0.5
}

/// Risk limits. Percentages are of balance unless stated otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Cumulative loss cap as % of initial balance.
    #[serde(default = "default_max_total_loss_pct")]
    pub max_total_loss_pct: Decimal,
    #[serde(default = "default_max_loss_24h_pct")]
    pub max_loss_24h_pct: Decimal,
    #[serde(default = "default_max_loss_7d_pct")]
    pub max_loss_7d_pct: Decimal,
    #[serde(default = "default_max_single_position_pct")]
    pub max_single_position_pct: Decimal,
    #[serde(default = "default_max_total_exposure_pct")]
    pub max_total_exposure_pct: Decimal,
    #[serde(default = "default_max_group_exposure_pct")]
    pub max_group_exposure_pct: Decimal,
    #[serde(default = "default_max_actions_per_hour")]
    pub max_actions_per_hour: u32,
    #[serde(default = "default_max_actions_per_24h")]
    pub max_actions_per_24h: u32,
    #[serde(default = "default_loss_cooldown_minutes")]
    pub loss_cooldown_minutes: i64,
    #[serde(default = "default_min_action_interval_minutes")]
    pub min_action_interval_minutes: i64,
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    /// Size factor published for ALLOW_LIMITED.
    #[serde(default = "default_limited_scale_factor")]
    pub limited_scale_factor: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_total_loss_pct: default_max_total_loss_pct(),
            max_loss_24h_pct: default_max_loss_24h_pct(),
            max_loss_7d_pct: default_max_loss_7d_pct(),
            max_single_position_pct: default_max_single_position_pct(),
            max_total_exposure_pct: default_max_total_exposure_pct(),
            max_group_exposure_pct: default_max_group_exposure_pct(),
            max_actions_per_hour: default_max_actions_per_hour(),
            max_actions_per_24h: default_max_actions_per_24h(),
            loss_cooldown_minutes: default_loss_cooldown_minutes(),
            min_action_interval_minutes: default_min_action_interval_minutes(),
            max_consecutive_errors: default_max_consecutive_errors(),
            limited_scale_factor: default_limited_scale_factor(),
        }
    }
}

/// The risk core. Deterministic: holds only its limits, so
/// `evaluate(x) == evaluate(x)` for equal inputs.
#[derive(Debug, Clone, Default)]
pub struct RiskCore {
    limits: RiskLimits,
}

impl RiskCore {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Evaluate an intent against all invariant groups.
    ///
    /// All groups are checked even after a violation is found so the
    /// report is complete; the worst severity wins. Malformed input maps
    /// straight to HALTED + DENY.
    pub fn evaluate(
        &self,
        intent: &TradingIntent,
        capital: &CapitalSnapshot,
        exposure: &ExposureSnapshot,
        behavioral: &BehavioralCounters,
        health: &SystemHealthFlags,
    ) -> RiskVerdict {
        let mut report = ViolationReport::default();

        if let Some(violation) = self.validate_inputs(intent, capital) {
            report.violations.push(violation);
            return self.verdict_from(report);
        }

        self.check_capital(capital, &mut report);
        self.check_exposure(intent, capital, exposure, &mut report);
        self.check_behavioral(behavioral, &mut report);
        self.check_systemic(health, &mut report);

        self.verdict_from(report)
    }

    fn verdict_from(&self, report: ViolationReport) -> RiskVerdict {
        let state = report.worst_severity();
        let permission = match state {
            RiskState::Safe => TradingPermission::Allow,
            RiskState::Limited => TradingPermission::AllowLimited,
            RiskState::Locked | RiskState::Halted => TradingPermission::Deny,
        };

        if permission == TradingPermission::Deny {
            warn!(
                state = state.as_str(),
                violations = report.violations.len(),
                "risk core veto"
            );
        }

        RiskVerdict {
            permission,
            state,
            report,
            limited_scale_factor: self.limits.limited_scale_factor,
        }
    }

    /// Malformed input is itself a HALTED condition.
    fn validate_inputs(
        &self,
        intent: &TradingIntent,
        capital: &CapitalSnapshot,
    ) -> Option<Violation> {
        let bad = |msg: String| {
            Some(Violation {
                code: "INPUT".to_string(),
                severity: RiskState::Halted,
                message: msg,
            })
        };

        if intent.symbol.is_empty() {
            return bad("intent symbol is empty".to_string());
        }
        if intent.side != "LONG" && intent.side != "SHORT" {
            return bad(format!("unknown intent side: {}", intent.side));
        }
        if !intent.position_size_usd.is_positive() {
            return bad(format!(
                "intent position size {} must be > 0",
                intent.position_size_usd
            ));
        }
        if !intent.entry_price.is_positive() || !intent.stop_price.is_positive() {
            return bad("intent entry/stop must be > 0".to_string());
        }
        if capital.initial_balance_usd <= Decimal::ZERO {
            return bad(format!(
                "initial balance {} must be > 0",
                capital.initial_balance_usd
            ));
        }
        if capital.current_balance_usd <= Decimal::ZERO {
            return bad(format!(
                "current balance {} must be > 0",
                capital.current_balance_usd
            ));
        }
        // Losses are magnitudes and can only grow; negative means the
        // caller's accounting broke.
        if capital.total_loss_usd < Decimal::ZERO
            || capital.loss_24h_usd < Decimal::ZERO
            || capital.loss_7d_usd < Decimal::ZERO
        {
            return bad("negative loss magnitude".to_string());
        }

        None
    }

    fn check_capital(&self, capital: &CapitalSnapshot, report: &mut ViolationReport) {
        let pct_of = |loss: Decimal, base: Decimal| {
            if base <= Decimal::ZERO {
                Decimal::from(100)
            } else {
                loss / base * Decimal::from(100)
            }
        };

        let total_pct = pct_of(capital.total_loss_usd, capital.initial_balance_usd);
        if total_pct >= self.limits.max_total_loss_pct {
            report.violations.push(Violation {
                code: "CAP-TOTAL".to_string(),
                severity: RiskState::Halted,
                message: format!(
                    "cumulative loss {total_pct:.2}% >= {}% of initial balance",
                    self.limits.max_total_loss_pct
                ),
            });
        }

        let pct_24h = pct_of(capital.loss_24h_usd, capital.current_balance_usd);
        if pct_24h >= self.limits.max_loss_24h_pct {
            report.violations.push(Violation {
                code: "CAP-24H".to_string(),
                severity: RiskState::Locked,
                message: format!(
                    "24h loss {pct_24h:.2}% >= {}% of balance",
                    self.limits.max_loss_24h_pct
                ),
            });
        }

        let pct_7d = pct_of(capital.loss_7d_usd, capital.current_balance_usd);
        if pct_7d >= self.limits.max_loss_7d_pct {
            report.violations.push(Violation {
                code: "CAP-7D".to_string(),
                severity: RiskState::Locked,
                message: format!(
                    "7d loss {pct_7d:.2}% >= {}% of balance",
                    self.limits.max_loss_7d_pct
                ),
            });
        }
    }

    fn check_exposure(
        &self,
        intent: &TradingIntent,
        capital: &CapitalSnapshot,
        exposure: &ExposureSnapshot,
        report: &mut ViolationReport,
    ) {
        let balance = capital.current_balance_usd;
        let pct = |usd: Decimal| usd / balance * Decimal::from(100);

        let single = exposure
            .max_single_position_usd
            .inner()
            .max(intent.position_size_usd.inner());
        if pct(single) > self.limits.max_single_position_pct {
            report.violations.push(Violation {
                code: "EXP-SINGLE".to_string(),
                severity: RiskState::Locked,
                message: format!(
                    "single position {:.2}% > {}% cap",
                    pct(single),
                    self.limits.max_single_position_pct
                ),
            });
        }

        let total = exposure.total_exposure_usd.inner() + intent.position_size_usd.inner();
        if pct(total) > self.limits.max_total_exposure_pct {
            report.violations.push(Violation {
                code: "EXP-TOTAL".to_string(),
                severity: RiskState::Locked,
                message: format!(
                    "aggregate exposure {:.2}% > {}% cap",
                    pct(total),
                    self.limits.max_total_exposure_pct
                ),
            });
        }

        // Correlated-group cap: the group definition is opaque here; any
        // group containing the intent symbol is checked against the sum of
        // its members' open exposure plus the intent.
        for (group, symbols) in &exposure.correlation_groups {
            if !symbols.iter().any(|s| s == &intent.symbol) {
                continue;
            }
            let group_usd: Decimal = exposure
                .open_positions
                .iter()
                .filter(|p| symbols.contains(&p.symbol))
                .map(|p| p.position_size_usd.inner())
                .sum::<Decimal>()
                + intent.position_size_usd.inner();
            if pct(group_usd) > self.limits.max_group_exposure_pct {
                report.violations.push(Violation {
                    code: "EXP-GROUP".to_string(),
                    severity: RiskState::Limited,
                    message: format!(
                        "correlated group {group} exposure {:.2}% > {}% cap",
                        pct(group_usd),
                        self.limits.max_group_exposure_pct
                    ),
                });
            }
        }
    }

    fn check_behavioral(&self, behavioral: &BehavioralCounters, report: &mut ViolationReport) {
        if behavioral.actions_last_hour >= self.limits.max_actions_per_hour {
            report.violations.push(Violation {
                code: "BEH-HOUR".to_string(),
                severity: RiskState::Limited,
                message: format!(
                    "{} actions in the last hour >= {} cap",
                    behavioral.actions_last_hour, self.limits.max_actions_per_hour
                ),
            });
        }

        if behavioral.actions_last_24h >= self.limits.max_actions_per_24h {
            report.violations.push(Violation {
                code: "BEH-24H".to_string(),
                severity: RiskState::Locked,
                message: format!(
                    "{} actions in 24h >= {} cap",
                    behavioral.actions_last_24h, self.limits.max_actions_per_24h
                ),
            });
        }

        let now = Utc::now();

        if let Some(last_loss) = behavioral.last_loss_at {
            let cooldown = ChronoDuration::minutes(self.limits.loss_cooldown_minutes);
            if now - last_loss < cooldown {
                report.violations.push(Violation {
                    code: "BEH-LOSS-COOLDOWN".to_string(),
                    severity: RiskState::Locked,
                    message: format!(
                        "loss-retry cooldown active ({} min after a loss)",
                        self.limits.loss_cooldown_minutes
                    ),
                });
            }
        }

        if let Some(last_action) = behavioral.last_action_at {
            let interval = ChronoDuration::minutes(self.limits.min_action_interval_minutes);
            if now - last_action < interval {
                report.violations.push(Violation {
                    code: "BEH-INTERVAL".to_string(),
                    severity: RiskState::Limited,
                    message: format!(
                        "minimum inter-action cooldown {} min not elapsed",
                        self.limits.min_action_interval_minutes
                    ),
                });
            }
        }
    }

    fn check_systemic(&self, health: &SystemHealthFlags, report: &mut ViolationReport) {
        if health.is_safe_mode {
            report.violations.push(Violation {
                code: "SYS-SAFE-MODE".to_string(),
                severity: RiskState::Halted,
                message: "system is in safe mode".to_string(),
            });
        }
        if !health.runtime_healthy {
            report.violations.push(Violation {
                code: "SYS-RUNTIME".to_string(),
                severity: RiskState::Halted,
                message: "runtime unhealthy".to_string(),
            });
        }
        if !health.critical_modules_available {
            report.violations.push(Violation {
                code: "SYS-MODULES".to_string(),
                severity: RiskState::Halted,
                message: "critical modules unavailable".to_string(),
            });
        }
        if health.consecutive_errors >= self.limits.max_consecutive_errors {
            report.violations.push(Violation {
                code: "SYS-ERRORS".to_string(),
                severity: RiskState::Locked,
                message: format!(
                    "{} consecutive errors >= {} budget",
                    health.consecutive_errors, self.limits.max_consecutive_errors
                ),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::{Price, Size};
    use rust_decimal_macros::dec;

    fn intent() -> TradingIntent {
        TradingIntent {
            symbol: "BTCUSDT".to_string(),
            side: "LONG".to_string(),
            position_size_usd: Size::new(dec!(100)),
            entry_price: Price::new(dec!(50000)),
            stop_price: Price::new(dec!(49500)),
            leverage: Some(dec!(2)),
        }
    }

    fn capital() -> CapitalSnapshot {
        CapitalSnapshot {
            current_balance_usd: dec!(10000),
            initial_balance_usd: dec!(10000),
            total_loss_usd: dec!(0),
            loss_24h_usd: dec!(0),
            loss_7d_usd: dec!(0),
        }
    }

    fn core() -> RiskCore {
        RiskCore::default()
    }

    #[test]
    fn test_clean_inputs_allow() {
        let verdict = core().evaluate(
            &intent(),
            &capital(),
            &ExposureSnapshot::default(),
            &BehavioralCounters::default(),
            &SystemHealthFlags::default(),
        );
        assert_eq!(verdict.permission, TradingPermission::Allow);
        assert_eq!(verdict.state, RiskState::Safe);
        assert!(verdict.report.is_empty());
    }

    #[test]
    fn test_deterministic_for_equal_inputs() {
        let c = core();
        let (i, cap, exp, beh, h) = (
            intent(),
            capital(),
            ExposureSnapshot::default(),
            BehavioralCounters::default(),
            SystemHealthFlags::default(),
        );
        assert_eq!(
            c.evaluate(&i, &cap, &exp, &beh, &h),
            c.evaluate(&i, &cap, &exp, &beh, &h)
        );
    }

    #[test]
    fn test_24h_loss_cap_denies() {
        let mut cap = capital();
        // 6% of balance lost in 24h, cap is 5%.
        cap.loss_24h_usd = dec!(600);
        let verdict = core().evaluate(
            &intent(),
            &cap,
            &ExposureSnapshot::default(),
            &BehavioralCounters::default(),
            &SystemHealthFlags::default(),
        );
        assert_eq!(verdict.permission, TradingPermission::Deny);
        assert_eq!(verdict.state, RiskState::Locked);
        assert!(verdict.report.violations.iter().any(|v| v.code == "CAP-24H"));
    }

    #[test]
    fn test_total_loss_cap_halts() {
        let mut cap = capital();
        cap.total_loss_usd = dec!(1500); // 15% of initial
        let verdict = core().evaluate(
            &intent(),
            &cap,
            &ExposureSnapshot::default(),
            &BehavioralCounters::default(),
            &SystemHealthFlags::default(),
        );
        assert_eq!(verdict.state, RiskState::Halted);
        assert_eq!(verdict.permission, TradingPermission::Deny);
    }

    #[test]
    fn test_exposure_caps() {
        let exposure = ExposureSnapshot {
            total_exposure_usd: Size::new(dec!(5950)),
            max_single_position_usd: Size::new(dec!(1000)),
            ..Default::default()
        };
        // 5950 + 100 = 6050 > 60% of 10000.
        let verdict = core().evaluate(
            &intent(),
            &capital(),
            &exposure,
            &BehavioralCounters::default(),
            &SystemHealthFlags::default(),
        );
        assert_eq!(verdict.permission, TradingPermission::Deny);
        assert!(verdict
            .report
            .violations
            .iter()
            .any(|v| v.code == "EXP-TOTAL"));
    }

    #[test]
    fn test_group_cap_limits() {
        let exposure = ExposureSnapshot {
            open_positions: vec![PositionExposure {
                symbol: "ETHUSDT".to_string(),
                side: "LONG".to_string(),
                position_size_usd: Size::new(dec!(2950)),
            }],
            total_exposure_usd: Size::new(dec!(2950)),
            max_single_position_usd: Size::new(dec!(1950)),
            correlation_groups: std::collections::BTreeMap::from([(
                "majors".to_string(),
                vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            )]),
        };
        // Group: 2950 + 100 = 3050 > 30% of 10000.
        let verdict = core().evaluate(
            &intent(),
            &capital(),
            &exposure,
            &BehavioralCounters::default(),
            &SystemHealthFlags::default(),
        );
        assert_eq!(verdict.permission, TradingPermission::AllowLimited);
        assert_eq!(verdict.state, RiskState::Limited);
        assert_eq!(verdict.limited_scale_factor, dec!(0.5));
    }

    #[test]
    fn test_loss_cooldown_locks() {
        let behavioral = BehavioralCounters {
            last_loss_at: Some(Utc::now() - ChronoDuration::minutes(10)),
            ..Default::default()
        };
        let verdict = core().evaluate(
            &intent(),
            &capital(),
            &ExposureSnapshot::default(),
            &behavioral,
            &SystemHealthFlags::default(),
        );
        assert_eq!(verdict.permission, TradingPermission::Deny);
        assert!(verdict
            .report
            .violations
            .iter()
            .any(|v| v.code == "BEH-LOSS-COOLDOWN"));
    }

    #[test]
    fn test_action_rate_limits() {
        let behavioral = BehavioralCounters {
            actions_last_hour: 6,
            ..Default::default()
        };
        let verdict = core().evaluate(
            &intent(),
            &capital(),
            &ExposureSnapshot::default(),
            &behavioral,
            &SystemHealthFlags::default(),
        );
        assert_eq!(verdict.permission, TradingPermission::AllowLimited);
    }

    #[test]
    fn test_safe_mode_halts() {
        let health = SystemHealthFlags {
            is_safe_mode: true,
            ..Default::default()
        };
        let verdict = core().evaluate(
            &intent(),
            &capital(),
            &ExposureSnapshot::default(),
            &BehavioralCounters::default(),
            &health,
        );
        assert_eq!(verdict.state, RiskState::Halted);
        assert_eq!(verdict.permission, TradingPermission::Deny);
    }

    #[test]
    fn test_malformed_intent_halts() {
        let mut bad = intent();
        bad.position_size_usd = Size::ZERO;
        let verdict = core().evaluate(
            &bad,
            &capital(),
            &ExposureSnapshot::default(),
            &BehavioralCounters::default(),
            &SystemHealthFlags::default(),
        );
        assert_eq!(verdict.state, RiskState::Halted);
        assert_eq!(verdict.permission, TradingPermission::Deny);
        assert_eq!(verdict.report.violations[0].code, "INPUT");
    }

    #[test]
    fn test_unknown_side_halts() {
        let mut bad = intent();
        bad.side = "SIDEWAYS".to_string();
        let verdict = core().evaluate(
            &bad,
            &capital(),
            &ExposureSnapshot::default(),
            &BehavioralCounters::default(),
            &SystemHealthFlags::default(),
        );
        assert_eq!(verdict.state, RiskState::Halted);
    }

    #[test]
    fn test_worst_severity_wins() {
        // Both a Limited (group/hour) and a Halted (safe mode) condition:
        // the verdict must carry HALTED.
        let behavioral = BehavioralCounters {
            actions_last_hour: 10,
            ..Default::default()
        };
        let health = SystemHealthFlags {
            is_safe_mode: true,
            ..Default::default()
        };
        let verdict = core().evaluate(
            &intent(),
            &capital(),
            &ExposureSnapshot::default(),
            &behavioral,
            &health,
        );
        assert_eq!(verdict.state, RiskState::Halted);
        assert!(verdict.report.violations.len() >= 2);
    }
}
