//! Per-timeframe market regime tags and the IO/runtime boundary.
//!
//! `MarketState` is the runtime type. Strings exist only at the IO edges
//! (feed parsing, persistence rows, user-facing rendering); parsers return
//! `Option<MarketState>` and unknown values become `None` with a logged
//! warning, never a crash and never a silent default.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

use crate::error::CoreError;

/// Market state classified from recent candle structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MarketState {
    /// Impulse: strong directional bodies.
    A,
    /// Acceptance: narrow consolidation range.
    B,
    /// Loss of control: dominant wicks, erratic range.
    C,
    /// Rejection: strong counter-trend body.
    D,
}

impl MarketState {
    pub const ALL: [MarketState; 4] = [Self::A, Self::B, Self::C, Self::D];

    /// Canonical one-letter tag used in persistence and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        }
    }

    /// Human-readable label for user-facing rendering.
    pub fn label(&self) -> &'static str {
        match self {
            Self::A => "Impulse",
            Self::B => "Acceptance",
            Self::C => "Loss of control",
            Self::D => "Rejection",
        }
    }

    /// Parse an IO-edge string. Unknown values yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "A" => Some(Self::A),
            "B" => Some(Self::B),
            "C" => Some(Self::C),
            "D" => Some(Self::D),
            _ => None,
        }
    }
}

impl fmt::Display for MarketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render an optional state for persistence rows: absent becomes "".
pub fn state_to_string(state: Option<MarketState>) -> &'static str {
    state.map(|s| s.as_str()).unwrap_or("")
}

/// Normalize an IO-edge string map into the runtime representation.
///
/// Unknown strings become `None` with a logged warning. After this point
/// the enum-only invariant holds.
pub fn normalize_states(raw: &BTreeMap<Timeframe, Option<String>>) -> StatesByTimeframe {
    let mut normalized = BTreeMap::new();
    for (tf, value) in raw {
        let state = match value.as_deref() {
            None | Some("") => None,
            Some(s) => {
                let parsed = MarketState::parse(s);
                if parsed.is_none() {
                    warn!(timeframe = %tf, value = s, "unknown market state at IO boundary, treating as absent");
                }
                parsed
            }
        };
        normalized.insert(*tf, state);
    }
    normalized
}

/// Runtime representation of per-timeframe states.
pub type StatesByTimeframe = BTreeMap<Timeframe, Option<MarketState>>;

/// Analysis timeframes, ordered from fastest to slowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M5,
    M15,
    M30,
    H1,
    H4,
}

impl Timeframe {
    pub const ALL: [Timeframe; 5] = [Self::M5, Self::M15, Self::M30, Self::H1, Self::H4];

    /// The timeframe whose state anchors signal decisions and dedup.
    pub const ANCHOR: Timeframe = Self::M15;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H4 => "4h",
        }
    }

    /// Exchange kline interval code.
    pub fn interval_code(&self) -> &'static str {
        match self {
            Self::M5 => "5",
            Self::M15 => "15",
            Self::M30 => "30",
            Self::H1 => "60",
            Self::H4 => "240",
        }
    }

    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value {
            "5m" => Ok(Self::M5),
            "15m" => Ok(Self::M15),
            "30m" => Ok(Self::M30),
            "1h" => Ok(Self::H1),
            "4h" => Ok(Self::H4),
            other => Err(CoreError::InvalidTimeframe(other.to_string())),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directional bias read from swing structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Flat => "FLAT",
        }
    }

    pub fn is_directional(&self) -> bool {
        !matches!(self, Self::Flat)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
