//! Exchange REST candle client.
//!
//! Read-only kline queries against a Bybit-style v5 endpoint. The exchange
//! returns newest-first rows; the client reverses to chronological order.
//! A non-zero return code or a missing result list yields an empty vec
//! with a logged warning: the pipeline treats missing data as "skip this
//! symbol for the cycle", never as an error that kills the cycle.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use aegis_core::{Candle, Price, Timeframe};

use crate::error::{FeedError, FeedResult};

fn default_base_url() -> String {
    "https://api.bybit.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

/// Client configuration.
#[derive(Debug, Clone, serde::Serialize, Deserialize)]
pub struct KlineClientConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for KlineClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct KlineResponse {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg", default)]
    ret_msg: String,
    #[serde(default)]
    result: Option<KlineResult>,
}

#[derive(Debug, Deserialize)]
struct KlineResult {
    #[serde(default)]
    list: Option<Vec<Vec<Value>>>,
}

/// The kline client.
#[derive(Debug, Clone)]
pub struct KlineClient {
    http: reqwest::Client,
    config: KlineClientConfig,
}

impl KlineClient {
    pub fn new(config: KlineClientConfig) -> FeedResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    /// Fetch candles for one (symbol, timeframe), chronological order.
    pub async fn get_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> FeedResult<Vec<Candle>> {
        let url = format!("{}/v5/market/kline", self.config.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("category", "linear"),
                ("symbol", symbol),
                ("interval", timeframe.interval_code()),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: KlineResponse = response.json().await?;

        if body.ret_code != 0 {
            warn!(
                symbol,
                timeframe = %timeframe,
                ret_code = body.ret_code,
                ret_msg = %body.ret_msg,
                "kline request rejected, treating as missing data"
            );
            return Ok(Vec::new());
        }

        let Some(list) = body.result.and_then(|r| r.list) else {
            warn!(symbol, timeframe = %timeframe, "kline response missing result.list");
            return Ok(Vec::new());
        };

        let mut candles = Vec::with_capacity(list.len());
        for row in &list {
            candles.push(parse_kline_row(row)?);
        }

        // Exchange order is newest first.
        candles.reverse();
        debug!(symbol, timeframe = %timeframe, count = candles.len(), "klines fetched");
        Ok(candles)
    }
}

/// Parse one OHLCV row: [startMs, open, high, low, close, volume, ...].
fn parse_kline_row(row: &[Value]) -> FeedResult<Candle> {
    if row.len() < 6 {
        return Err(FeedError::Parse(format!(
            "kline row has {} fields, expected at least 6",
            row.len()
        )));
    }

    let field = |idx: usize| -> FeedResult<&str> {
        row[idx]
            .as_str()
            .ok_or_else(|| FeedError::Parse(format!("kline field {idx} is not a string")))
    };

    let start_ms: i64 = field(0)?
        .parse()
        .map_err(|e| FeedError::Parse(format!("bad start time: {e}")))?;

    let price = |idx: usize| -> FeedResult<Price> {
        field(idx)?
            .parse()
            .map_err(|e| FeedError::Parse(format!("bad price in field {idx}: {e}")))
    };

    Ok(Candle {
        start_ms,
        open: price(1)?,
        high: price(2)?,
        low: price(3)?,
        close: price(4)?,
        volume: field(5)?
            .parse()
            .map_err(|e| FeedError::Parse(format!("bad volume: {e}")))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn row(start: &str, open: &str, close: &str) -> Vec<Value> {
        vec![
            json!(start),
            json!(open),
            json!("101"),
            json!("99"),
            json!(close),
            json!("12.5"),
            json!("1250"),
        ]
    }

    #[test]
    fn test_parse_kline_row() {
        let candle = parse_kline_row(&row("1700000000000", "100", "100.5")).unwrap();
        assert_eq!(candle.start_ms, 1_700_000_000_000);
        assert_eq!(candle.open.inner(), dec!(100));
        assert_eq!(candle.close.inner(), dec!(100.5));
        assert_eq!(candle.volume, dec!(12.5));
    }

    #[test]
    fn test_parse_short_row_fails() {
        let short = vec![json!("1700000000000"), json!("100")];
        assert!(parse_kline_row(&short).is_err());
    }

    #[test]
    fn test_response_deserialization() {
        let body = json!({
            "retCode": 0,
            "retMsg": "OK",
            "result": { "list": [row("1700000000000", "100", "101")] }
        });
        let parsed: KlineResponse = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.ret_code, 0);
        assert_eq!(parsed.result.unwrap().list.unwrap().len(), 1);
    }

    #[test]
    fn test_missing_list_deserializes() {
        let body = json!({ "retCode": 10001, "retMsg": "params error" });
        let parsed: KlineResponse = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.ret_code, 10001);
    }
}
