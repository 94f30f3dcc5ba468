//! Application configuration.

use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use aegis_brains::{DecisionCoreConfig, SizerConfig};
use aegis_feed::KlineClientConfig;
use aegis_risk::RiskLimits;
use aegis_signal::TradingWindow;
use aegis_telegram::TelegramConfig;

use crate::error::{AppError, AppResult};

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "SOLUSDT".to_string(),
        "BNBUSDT".to_string(),
        "XRPUSDT".to_string(),
    ]
}

fn default_interval_secs() -> u64 {
    300
}

fn default_initial_balance_usd() -> Decimal {
    Decimal::from(10000)
}

fn default_risk_percent() -> f64 {
    2.0
}

fn default_min_position_usd() -> Decimal {
    Decimal::from(10)
}

fn default_max_position_usd() -> Decimal {
    Decimal::from(1000)
}

fn default_safe_mode_ttl_secs() -> u64 {
    600
}

fn default_heartbeat_interval_secs() -> u64 {
    60
}

fn default_db_path() -> String {
    "aegis.db".to_string()
}

fn default_signal_log_path() -> String {
    "signals_log.csv".to_string()
}

fn default_checkpoint_every() -> u64 {
    5
}

/// Engine pacing and sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    /// Seconds between analysis cycles.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_initial_balance_usd")]
    pub initial_balance_usd: Decimal,
    /// Base risk percent per trade.
    #[serde(default = "default_risk_percent")]
    pub risk_percent: f64,
    #[serde(default = "default_min_position_usd")]
    pub min_position_usd: Decimal,
    #[serde(default = "default_max_position_usd")]
    pub max_position_usd: Decimal,
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: u64,
    #[serde(default)]
    pub trading_window: TradingWindow,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            interval_secs: default_interval_secs(),
            initial_balance_usd: default_initial_balance_usd(),
            risk_percent: default_risk_percent(),
            min_position_usd: default_min_position_usd(),
            max_position_usd: default_max_position_usd(),
            checkpoint_every: default_checkpoint_every(),
            trading_window: TradingWindow::default(),
        }
    }
}

/// Safety runtime timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_safe_mode_ttl_secs")]
    pub safe_mode_ttl_secs: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            safe_mode_ttl_secs: default_safe_mode_ttl_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

/// Persistence paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_signal_log_path")]
    pub signal_log_path: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            signal_log_path: default_signal_log_path(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub feed: KlineClientConfig,
    /// Telegram transport; absent means signals go to the null sink.
    /// The bot token itself comes from `AEGIS_TELEGRAM_TOKEN`.
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub risk: RiskLimits,
    #[serde(default)]
    pub decision: DecisionCoreConfig,
    #[serde(default)]
    pub sizer: SizerConfig,
}

impl AppConfig {
    /// Load from `AEGIS_CONFIG` or the default path; fall back to
    /// defaults when no file exists.
    pub fn load() -> AppResult<Self> {
        let path =
            std::env::var("AEGIS_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());
        if Path::new(&path).exists() {
            Self::from_file(&path)
        } else {
            tracing::warn!(path = %path, "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("failed to read config: {e}")))?;
        toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("failed to parse config: {e}")))
    }
}
