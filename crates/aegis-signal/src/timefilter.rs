//! Trading-time predicate and session context.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use aegis_core::TimeContext;

fn default_start_hour() -> u32 {
    0
}

fn default_end_hour() -> u32 {
    24
}

/// UTC hour window in which signals may be emitted. Equal bounds mean
/// always-on (the market itself never closes).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TradingWindow {
    #[serde(default = "default_start_hour")]
    pub start_hour: u32,
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,
}

impl Default for TradingWindow {
    fn default() -> Self {
        Self {
            start_hour: default_start_hour(),
            end_hour: default_end_hour(),
        }
    }
}

/// Is `now` inside the trading window?
pub fn is_good_time(window: &TradingWindow, now: DateTime<Utc>) -> bool {
    if window.start_hour == window.end_hour || window.end_hour >= 24 && window.start_hour == 0 {
        return true;
    }
    let hour = now.hour();
    if window.start_hour < window.end_hour {
        (window.start_hour..window.end_hour).contains(&hour)
    } else {
        // Window wraps midnight.
        hour >= window.start_hour || hour < window.end_hour
    }
}

/// Session phase relative to the window, for the meta brain.
pub fn session_context(window: &TradingWindow, now: DateTime<Utc>) -> TimeContext {
    if !is_good_time(window, now) {
        return TimeContext::AfterHours;
    }
    if window.start_hour == window.end_hour || (window.start_hour == 0 && window.end_hour >= 24) {
        return TimeContext::SessionMid;
    }

    let hour = now.hour();
    let span = if window.start_hour < window.end_hour {
        window.end_hour - window.start_hour
    } else {
        24 - window.start_hour + window.end_hour
    };
    let into = if hour >= window.start_hour {
        hour - window.start_hour
    } else {
        24 - window.start_hour + hour
    };

    if into == 0 {
        TimeContext::SessionStart
    } else if into + 1 >= span {
        TimeContext::SessionEnd
    } else {
        TimeContext::SessionMid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, hour, 30, 0).unwrap()
    }

    #[test]
    fn test_default_window_always_good() {
        let window = TradingWindow::default();
        for hour in 0..24 {
            assert!(is_good_time(&window, at(hour)));
        }
    }

    #[test]
    fn test_bounded_window() {
        let window = TradingWindow {
            start_hour: 6,
            end_hour: 22,
        };
        assert!(!is_good_time(&window, at(5)));
        assert!(is_good_time(&window, at(6)));
        assert!(is_good_time(&window, at(21)));
        assert!(!is_good_time(&window, at(22)));
    }

    #[test]
    fn test_wrapping_window() {
        let window = TradingWindow {
            start_hour: 22,
            end_hour: 4,
        };
        assert!(is_good_time(&window, at(23)));
        assert!(is_good_time(&window, at(2)));
        assert!(!is_good_time(&window, at(12)));
    }

    #[test]
    fn test_session_context() {
        let window = TradingWindow {
            start_hour: 6,
            end_hour: 22,
        };
        assert_eq!(session_context(&window, at(6)), TimeContext::SessionStart);
        assert_eq!(session_context(&window, at(12)), TimeContext::SessionMid);
        assert_eq!(session_context(&window, at(21)), TimeContext::SessionEnd);
        assert_eq!(session_context(&window, at(3)), TimeContext::AfterHours);
    }
}
