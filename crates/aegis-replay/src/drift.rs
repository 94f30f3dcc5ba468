//! Drift detection over recorded snapshot statistics.
//!
//! Drift is a change in the system's own decision distribution, distinct
//! from drawdown (a change in PnL). Confidence and entropy lead the
//! detection: a recent window (24h) is compared against a baseline
//! window (7 days) on mean, variance, and percentile shifts, plus the
//! coupling between the two metrics. The result is advisory only and
//! never blocks trading directly.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use tracing::warn;

/// One recorded observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotStat {
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
    pub entropy: f64,
}

/// Drift severity, advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum DriftSeverity {
    Low,
    Medium,
    High,
}

/// Drift verdict for one metric.
#[derive(Debug, Clone, Serialize)]
pub struct MetricDrift {
    pub detected: bool,
    pub severity: Option<DriftSeverity>,
    pub mean_recent: f64,
    pub mean_baseline: f64,
    pub variance_recent: f64,
    pub variance_baseline: f64,
    pub p90_recent: f64,
    pub p90_baseline: f64,
    pub reason: String,
}

/// Full drift picture.
#[derive(Debug, Clone, Serialize)]
pub struct DriftState {
    pub confidence: MetricDrift,
    pub entropy: MetricDrift,
    /// Correlation between confidence and entropy per window.
    pub coupling_recent: f64,
    pub coupling_baseline: f64,
    pub decoupling_detected: bool,
    pub overall_detected: bool,
    pub overall_severity: Option<DriftSeverity>,
    pub recent_samples: usize,
    pub baseline_samples: usize,
}

/// The detector.
#[derive(Debug, Clone)]
pub struct DriftDetector {
    recent_window: ChronoDuration,
    baseline_window: ChronoDuration,
}

impl Default for DriftDetector {
    fn default() -> Self {
        Self {
            recent_window: ChronoDuration::hours(24),
            baseline_window: ChronoDuration::hours(168),
        }
    }
}

impl DriftDetector {
    pub fn new(recent_hours: i64, baseline_hours: i64) -> Self {
        Self {
            recent_window: ChronoDuration::hours(recent_hours),
            baseline_window: ChronoDuration::hours(baseline_hours),
        }
    }

    /// Detect drift. `None` without enough data in either window.
    pub fn detect(&self, stats: &[SnapshotStat], end_time: DateTime<Utc>) -> Option<DriftState> {
        let recent_start = end_time - self.recent_window;
        let baseline_start = end_time - self.baseline_window;

        let recent: Vec<&SnapshotStat> = stats
            .iter()
            .filter(|s| s.timestamp >= recent_start && s.timestamp <= end_time)
            .collect();
        let baseline: Vec<&SnapshotStat> = stats
            .iter()
            .filter(|s| s.timestamp >= baseline_start && s.timestamp < recent_start)
            .collect();

        if recent.len() < 5 || baseline.len() < 5 {
            warn!(
                recent = recent.len(),
                baseline = baseline.len(),
                "insufficient data for drift detection"
            );
            return None;
        }

        let recent_conf: Vec<f64> = recent.iter().map(|s| s.confidence).collect();
        let recent_ent: Vec<f64> = recent.iter().map(|s| s.entropy).collect();
        let baseline_conf: Vec<f64> = baseline.iter().map(|s| s.confidence).collect();
        let baseline_ent: Vec<f64> = baseline.iter().map(|s| s.entropy).collect();

        let confidence = metric_drift("confidence", &recent_conf, &baseline_conf);
        let entropy = metric_drift("entropy", &recent_ent, &baseline_ent);

        let coupling_recent = correlation(&recent_conf, &recent_ent);
        let coupling_baseline = correlation(&baseline_conf, &baseline_ent);
        // Decoupling: the relationship between confidence and entropy
        // flipped sign or moved substantially.
        let decoupling_detected = (coupling_recent - coupling_baseline).abs() > 0.5
            || (coupling_recent.signum() != coupling_baseline.signum()
                && coupling_recent.abs() > 0.2
                && coupling_baseline.abs() > 0.2);

        let mut severities = Vec::new();
        if let Some(s) = confidence.severity {
            severities.push(s);
        }
        if let Some(s) = entropy.severity {
            severities.push(s);
        }
        if decoupling_detected {
            severities.push(DriftSeverity::Medium);
        }

        let overall_severity = severities.into_iter().max();

        Some(DriftState {
            overall_detected: overall_severity.is_some(),
            overall_severity,
            confidence,
            entropy,
            coupling_recent,
            coupling_baseline,
            decoupling_detected,
            recent_samples: recent.len(),
            baseline_samples: baseline.len(),
        })
    }
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn variance(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / xs.len() as f64
}

fn percentile_90(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let mut sorted = xs.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((sorted.len() as f64) * 0.9).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let (ma, mb) = (mean(&a[..n]), mean(&b[..n]));
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for i in 0..n {
        let da = a[i] - ma;
        let db = b[i] - mb;
        cov += da * db;
        va += da * da;
        vb += db * db;
    }
    if va == 0.0 || vb == 0.0 {
        return 0.0;
    }
    cov / (va.sqrt() * vb.sqrt())
}

fn metric_drift(name: &str, recent: &[f64], baseline: &[f64]) -> MetricDrift {
    let mean_recent = mean(recent);
    let mean_baseline = mean(baseline);
    let variance_recent = variance(recent);
    let variance_baseline = variance(baseline);
    let p90_recent = percentile_90(recent);
    let p90_baseline = percentile_90(baseline);

    let mean_shift = if mean_baseline.abs() > f64::EPSILON {
        (mean_recent - mean_baseline).abs() / mean_baseline.abs()
    } else {
        0.0
    };
    let variance_shift = if variance_baseline > f64::EPSILON {
        (variance_recent - variance_baseline).abs() / variance_baseline
    } else {
        0.0
    };
    let p90_shift = (p90_recent - p90_baseline).abs();

    let mut severity = None;
    let mut reasons = Vec::new();

    if mean_shift > 0.25 {
        severity = Some(DriftSeverity::High);
        reasons.push(format!("{name} mean shifted {:.0}%", mean_shift * 100.0));
    } else if mean_shift > 0.10 {
        severity = Some(DriftSeverity::Medium);
        reasons.push(format!("{name} mean shifted {:.0}%", mean_shift * 100.0));
    }

    if variance_shift > 0.5 {
        severity = Some(severity.map_or(DriftSeverity::Medium, |s: DriftSeverity| {
            s.max(DriftSeverity::Medium)
        }));
        reasons.push(format!(
            "{name} variance shifted {:.0}%",
            variance_shift * 100.0
        ));
    }

    if p90_shift > 0.15 {
        severity = Some(severity.map_or(DriftSeverity::Low, |s: DriftSeverity| {
            s.max(DriftSeverity::Low)
        }));
        reasons.push(format!("{name} p90 shifted {p90_shift:.2}"));
    }

    MetricDrift {
        detected: severity.is_some(),
        severity,
        mean_recent,
        mean_baseline,
        variance_recent,
        variance_baseline,
        p90_recent,
        p90_baseline,
        reason: if reasons.is_empty() {
            format!("{name} stable")
        } else {
            reasons.join("; ")
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(values: &[(i64, f64, f64)], now: DateTime<Utc>) -> Vec<SnapshotStat> {
        values
            .iter()
            .map(|(hours_ago, confidence, entropy)| SnapshotStat {
                timestamp: now - ChronoDuration::hours(*hours_ago),
                confidence: *confidence,
                entropy: *entropy,
            })
            .collect()
    }

    #[test]
    fn test_insufficient_data_is_none() {
        let now = Utc::now();
        let detector = DriftDetector::default();
        let data = stats(&[(1, 0.7, 0.3), (2, 0.7, 0.3)], now);
        assert!(detector.detect(&data, now).is_none());
    }

    #[test]
    fn test_stable_distribution_no_drift() {
        let now = Utc::now();
        let detector = DriftDetector::default();

        let mut data = Vec::new();
        // Baseline: 7 days of consistent values, slight alternation so
        // variance is non-degenerate.
        for h in 25..170 {
            let wiggle = if h % 2 == 0 { 0.02 } else { -0.02 };
            data.push(SnapshotStat {
                timestamp: now - ChronoDuration::hours(h),
                confidence: 0.7 + wiggle,
                entropy: 0.3 - wiggle,
            });
        }
        // Recent: same distribution.
        for h in 1..24 {
            let wiggle = if h % 2 == 0 { 0.02 } else { -0.02 };
            data.push(SnapshotStat {
                timestamp: now - ChronoDuration::hours(h),
                confidence: 0.7 + wiggle,
                entropy: 0.3 - wiggle,
            });
        }

        let state = detector.detect(&data, now).unwrap();
        assert!(!state.confidence.detected, "{}", state.confidence.reason);
        assert!(!state.overall_detected);
    }

    #[test]
    fn test_confidence_collapse_detected() {
        let now = Utc::now();
        let detector = DriftDetector::default();

        let mut data = Vec::new();
        for h in 25..170 {
            let wiggle = if h % 2 == 0 { 0.02 } else { -0.02 };
            data.push(SnapshotStat {
                timestamp: now - ChronoDuration::hours(h),
                confidence: 0.7 + wiggle,
                entropy: 0.3 - wiggle,
            });
        }
        // Recent confidence collapsed to 0.4.
        for h in 1..24 {
            let wiggle = if h % 2 == 0 { 0.02 } else { -0.02 };
            data.push(SnapshotStat {
                timestamp: now - ChronoDuration::hours(h),
                confidence: 0.4 + wiggle,
                entropy: 0.3 - wiggle,
            });
        }

        let state = detector.detect(&data, now).unwrap();
        assert!(state.confidence.detected);
        assert_eq!(state.confidence.severity, Some(DriftSeverity::High));
        assert!(state.overall_detected);
    }
}
