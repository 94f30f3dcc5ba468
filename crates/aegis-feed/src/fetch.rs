//! Parallel candle fetch with bounded concurrency.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::warn;

use aegis_core::{Candle, Timeframe};

use crate::client::KlineClient;

/// All fetched candles: symbol -> timeframe -> chronological candles.
pub type CandleSet = BTreeMap<String, BTreeMap<Timeframe, Vec<Candle>>>;

/// Fetch parameters.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub limit: u32,
    pub max_concurrency: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            limit: 120,
            max_concurrency: 20,
        }
    }
}

/// Fetch all symbols x timeframes in parallel.
///
/// Individual failures degrade to an empty candle list for that pair; the
/// caller skips symbols without data. The overall call is bounded by the
/// caller's timeout.
pub async fn fetch_all_candles(
    client: &KlineClient,
    symbols: &[String],
    timeframes: &[Timeframe],
    config: &FetchConfig,
) -> CandleSet {
    let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
    let mut tasks = FuturesUnordered::new();

    for symbol in symbols {
        for tf in timeframes {
            let client = client.clone();
            let semaphore = semaphore.clone();
            let symbol = symbol.clone();
            let tf = *tf;
            let limit = config.limit;

            tasks.push(async move {
                // Holding a permit bounds in-flight requests.
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (symbol, tf, Vec::new()),
                };
                let candles = match client.get_klines(&symbol, tf, limit).await {
                    Ok(candles) => candles,
                    Err(e) => {
                        warn!(symbol = %symbol, timeframe = %tf, ?e, "candle fetch failed");
                        Vec::new()
                    }
                };
                (symbol, tf, candles)
            });
        }
    }

    let mut set: CandleSet = BTreeMap::new();
    while let Some((symbol, tf, candles)) = tasks.next().await {
        if candles.is_empty() {
            continue;
        }
        set.entry(symbol).or_default().insert(tf, candles);
    }
    set
}
