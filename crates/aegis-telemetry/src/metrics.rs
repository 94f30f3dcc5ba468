//! Prometheus metrics for the decision pipeline.

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use crate::error::TelemetryResult;

/// Metric handles, registered against one registry.
pub struct Metrics {
    registry: Registry,
    pub cycles_total: IntCounter,
    pub cycle_errors_total: IntCounter,
    pub signals_emitted_total: IntCounter,
    pub signals_blocked_total: IntCounterVec,
    pub fsm_transitions_total: IntCounterVec,
    pub consecutive_errors: IntGauge,
    pub open_positions: IntGauge,
}

impl Metrics {
    pub fn new() -> TelemetryResult<Self> {
        let registry = Registry::new();

        let cycles_total = IntCounter::with_opts(Opts::new(
            "aegis_cycles_total",
            "Completed analysis cycles",
        ))?;
        let cycle_errors_total = IntCounter::with_opts(Opts::new(
            "aegis_cycle_errors_total",
            "Cycles that ended in an error",
        ))?;
        let signals_emitted_total = IntCounter::with_opts(Opts::new(
            "aegis_signals_emitted_total",
            "Signals emitted to the external channel",
        ))?;
        let signals_blocked_total = IntCounterVec::new(
            Opts::new(
                "aegis_signals_blocked_total",
                "Signals blocked by validator stage",
            ),
            &["stage"],
        )?;
        let fsm_transitions_total = IntCounterVec::new(
            Opts::new("aegis_fsm_transitions_total", "FSM transitions by target"),
            &["to"],
        )?;
        let consecutive_errors = IntGauge::with_opts(Opts::new(
            "aegis_consecutive_errors",
            "Current consecutive error counter",
        ))?;
        let open_positions = IntGauge::with_opts(Opts::new(
            "aegis_open_positions",
            "Open paper positions",
        ))?;

        registry.register(Box::new(cycles_total.clone()))?;
        registry.register(Box::new(cycle_errors_total.clone()))?;
        registry.register(Box::new(signals_emitted_total.clone()))?;
        registry.register(Box::new(signals_blocked_total.clone()))?;
        registry.register(Box::new(fsm_transitions_total.clone()))?;
        registry.register(Box::new(consecutive_errors.clone()))?;
        registry.register(Box::new(open_positions.clone()))?;

        Ok(Self {
            registry,
            cycles_total,
            cycle_errors_total,
            signals_emitted_total,
            signals_blocked_total,
            fsm_transitions_total,
            consecutive_errors,
            open_positions,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the registry in the text exposition format.
    pub fn render(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buf = Vec::new();
        if encoder.encode(&self.registry.gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_render() {
        let metrics = Metrics::new().unwrap();
        metrics.cycles_total.inc();
        metrics
            .signals_blocked_total
            .with_label_values(&["RiskCore"])
            .inc();

        let rendered = metrics.render();
        assert!(rendered.contains("aegis_cycles_total 1"));
        assert!(rendered.contains("aegis_signals_blocked_total"));
    }
}
