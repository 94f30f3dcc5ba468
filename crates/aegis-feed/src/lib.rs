//! Market data: exchange REST candle client, indicators, and the
//! per-timeframe state classifier.
//!
//! Everything downstream of the client works on chronological candle
//! slices; the client reverses exchange order at the boundary.

pub mod classify;
pub mod client;
pub mod error;
pub mod fetch;
pub mod indicators;
pub mod volatility;

pub use classify::{determine_state, entry_trigger_5m, is_flat, market_direction, EntryTrigger};
pub use client::{KlineClient, KlineClientConfig};
pub use error::{FeedError, FeedResult};
pub use fetch::{fetch_all_candles, CandleSet, FetchConfig};
pub use indicators::{
    adx, atr, bollinger_bands, ema, ema_crossover, macd, momentum, rsi, stochastic,
    trend_strength, volume_analysis, AdxOutput, AdxStrength, BandPosition, BollingerOutput,
    CrossSignal, MacdOutput, MacdTrend, StochOutput, StochSignal, VolumeProfile, VolumeTrend,
};
pub use volatility::{
    calculate_volatility_metrics, calculate_volatility_pct, check_price_spike, volatility_score,
    SpikeCheck, SpikeDirection, VolatilityMetrics, VolatilityTrend,
};
