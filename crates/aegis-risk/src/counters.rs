//! Rolling behavioral counters.
//!
//! The risk core itself is pure; these counters live with the caller and
//! are snapshotted into `BehavioralCounters` for each evaluation. Windows
//! reset lazily on wall-clock boundaries, checked at every access.

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::types::BehavioralCounters;

#[derive(Debug, Clone, Default)]
pub struct RollingActionCounters {
    hour_window_start: Option<DateTime<Utc>>,
    actions_this_hour: u32,
    day_window_start: Option<DateTime<Utc>>,
    actions_this_day: u32,
    consecutive_losses: u32,
    last_loss_at: Option<DateTime<Utc>>,
    last_action_at: Option<DateTime<Utc>>,
}

impl RollingActionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one emitted action (signal sent).
    pub fn record_action(&mut self) {
        self.record_action_at(Utc::now());
    }

    pub fn record_action_at(&mut self, now: DateTime<Utc>) {
        self.roll_windows(now);
        self.actions_this_hour += 1;
        self.actions_this_day += 1;
        self.last_action_at = Some(now);
    }

    /// Record a closed trade outcome.
    pub fn record_outcome(&mut self, pnl_usd: f64) {
        self.record_outcome_at(pnl_usd, Utc::now());
    }

    pub fn record_outcome_at(&mut self, pnl_usd: f64, now: DateTime<Utc>) {
        if pnl_usd < 0.0 {
            self.consecutive_losses += 1;
            self.last_loss_at = Some(now);
        } else {
            self.consecutive_losses = 0;
        }
    }

    /// Snapshot for a risk evaluation. Rolls windows first.
    pub fn snapshot(&mut self) -> BehavioralCounters {
        self.snapshot_at(Utc::now())
    }

    pub fn snapshot_at(&mut self, now: DateTime<Utc>) -> BehavioralCounters {
        self.roll_windows(now);
        BehavioralCounters {
            actions_last_hour: self.actions_this_hour,
            actions_last_24h: self.actions_this_day,
            consecutive_losses: self.consecutive_losses,
            last_loss_at: self.last_loss_at,
            last_action_at: self.last_action_at,
        }
    }

    fn roll_windows(&mut self, now: DateTime<Utc>) {
        let same_hour = |a: DateTime<Utc>, b: DateTime<Utc>| {
            a.date_naive() == b.date_naive() && a.hour() == b.hour()
        };
        let same_day = |a: DateTime<Utc>, b: DateTime<Utc>| {
            a.year() == b.year() && a.ordinal() == b.ordinal()
        };

        match self.hour_window_start {
            Some(start) if same_hour(start, now) => {}
            _ => {
                self.hour_window_start = Some(now);
                self.actions_this_hour = 0;
            }
        }

        match self.day_window_start {
            Some(start) if same_day(start, now) => {}
            _ => {
                self.day_window_start = Some(now);
                self.actions_this_day = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_actions_accumulate_within_hour() {
        let mut counters = RollingActionCounters::new();
        counters.record_action_at(at(10, 5));
        counters.record_action_at(at(10, 40));

        let snap = counters.snapshot_at(at(10, 55));
        assert_eq!(snap.actions_last_hour, 2);
        assert_eq!(snap.actions_last_24h, 2);
    }

    #[test]
    fn test_hour_window_resets_lazily() {
        let mut counters = RollingActionCounters::new();
        counters.record_action_at(at(10, 5));
        counters.record_action_at(at(10, 40));

        // No call in between: the reset happens on the next access.
        let snap = counters.snapshot_at(at(11, 1));
        assert_eq!(snap.actions_last_hour, 0);
        assert_eq!(snap.actions_last_24h, 2);
    }

    #[test]
    fn test_day_window_resets() {
        let mut counters = RollingActionCounters::new();
        counters.record_action_at(at(10, 0));

        let next_day = Utc.with_ymd_and_hms(2025, 6, 2, 0, 5, 0).unwrap();
        let snap = counters.snapshot_at(next_day);
        assert_eq!(snap.actions_last_24h, 0);
    }

    #[test]
    fn test_loss_tracking() {
        let mut counters = RollingActionCounters::new();
        counters.record_outcome_at(-50.0, at(9, 0));
        counters.record_outcome_at(-20.0, at(9, 30));
        assert_eq!(counters.snapshot_at(at(10, 0)).consecutive_losses, 2);

        counters.record_outcome_at(30.0, at(10, 30));
        let snap = counters.snapshot_at(at(11, 0));
        assert_eq!(snap.consecutive_losses, 0);
        // Last loss timestamp is retained for the cooldown check.
        assert_eq!(snap.last_loss_at, Some(at(9, 30)));
    }
}
