//! Telegram Bot API client.
//!
//! Messages are tried as Markdown first and downgraded to plain text when
//! the API rejects the parse; transient network failures retry with
//! exponential backoff. Implements the gatekeeper's sink seam.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use aegis_gatekeeper::{SignalSink, SinkError};

use crate::error::{TelegramError, TelegramResult};

const MAX_SEND_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(1);

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

/// Client configuration. The token is read from the environment by the
/// composition root, never from the config file.
#[derive(Debug, Clone, serde::Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    pub chat_id: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Chart link template; `{symbol}` is substituted.
    #[serde(default = "default_chart_template")]
    pub chart_url_template: String,
}

fn default_chart_template() -> String {
    "https://www.tradingview.com/chart/?symbol=BYBIT:{symbol}.P".to_string()
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    text: Option<String>,
}

/// The Telegram transport.
#[derive(Debug, Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    config: TelegramConfig,
    token: String,
}

impl TelegramClient {
    pub fn new(token: String, config: TelegramConfig) -> TelegramResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            config,
            token,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.config.api_base, self.token)
    }

    /// Send one message: Markdown first, plain on parse rejection, with
    /// retries on transient failures.
    pub async fn send_text(&self, text: &str) -> TelegramResult<()> {
        let mut parse_markdown = true;
        let mut last_error = String::new();

        for attempt in 0..MAX_SEND_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(BACKOFF_BASE * 2u32.pow(attempt - 1)).await;
            }

            match self.try_send(text, parse_markdown).await {
                Ok(()) => return Ok(()),
                Err(TelegramError::Api(description)) => {
                    // A parse rejection is deterministic: downgrade once
                    // and retry immediately, not against the backoff.
                    if parse_markdown && description.contains("parse") {
                        debug!("markdown rejected, downgrading to plain text");
                        parse_markdown = false;
                        continue;
                    }
                    return Err(TelegramError::Api(description));
                }
                Err(e) => {
                    warn!(attempt, ?e, "telegram send failed, will retry");
                    last_error = e.to_string();
                }
            }
        }

        Err(TelegramError::RetriesExhausted(last_error))
    }

    async fn try_send(&self, text: &str, markdown: bool) -> TelegramResult<()> {
        let mut body = json!({
            "chat_id": self.config.chat_id,
            "text": text,
        });
        if markdown {
            body["parse_mode"] = json!("Markdown");
        }

        let response = self
            .http
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await?;

        let api: ApiResponse = response.json().await?;
        if !api.ok {
            return Err(TelegramError::Api(
                api.description.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(())
    }

    /// Send the chart link for a symbol.
    pub async fn send_chart_link(&self, symbol: &str) -> TelegramResult<()> {
        let url = self.config.chart_url_template.replace("{symbol}", symbol);
        self.send_text(&format!("Chart {symbol}: {url}")).await
    }

    /// Long-poll for updates; returns (update_id, text) pairs.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u32,
    ) -> TelegramResult<Vec<(i64, Option<String>)>> {
        let response = self
            .http
            .get(self.method_url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", timeout_secs.to_string()),
            ])
            .timeout(Duration::from_secs(u64::from(timeout_secs) + 10))
            .send()
            .await?;

        let body: UpdatesResponse = response.json().await?;
        if !body.ok {
            return Err(TelegramError::Api(
                "getUpdates returned ok=false".to_string(),
            ));
        }

        Ok(body
            .result
            .into_iter()
            .map(|u| (u.update_id, u.message.and_then(|m| m.text)))
            .collect())
    }
}

#[async_trait]
impl SignalSink for TelegramClient {
    async fn send_message(&self, text: &str) -> Result<(), SinkError> {
        self.send_text(text).await.map_err(|e| SinkError(e.to_string()))
    }

    async fn send_chart(&self, symbol: &str) -> Result<(), SinkError> {
        self.send_chart_link(symbol)
            .await
            .map_err(|e| SinkError(e.to_string()))
    }
}
