//! Tushare Pro API adapter for the hotlist sources.
//!
//! # API Documentation
//! https://tushare.pro/document/2
//!
//! All three platforms are republished by Tushare under different API names
//! (`kpl_list`, `kpl_concept`, `ths_hot`, `limit_list_ths`, `dc_hot`,
//! `dc_index`), so one client serves every source. The request is always
//! `POST {api_name, token, params, fields}` and the reply is
//! `{code, msg, data: {fields, items, has_more}}`.
//!
//! # Points
//! The hotlist APIs require 5000+ account points; a points/permission
//! refusal is reported as [`SourceError::Credits`] and never retried.

use async_trait::async_trait;
use chrono::NaiveDate;
use hotlist_common::TushareConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::rate_limiter::RateLimiter;
use super::{Category, FetchFilters, RawTable, SourceAdapter, SourceError, SourceId};
use crate::calendar::format_trade_date;

/// Tushare JSON-RPC style request.
#[derive(Debug, Serialize)]
struct TushareRequest<'a> {
    api_name: &'a str,
    token: &'a str,
    params: &'a BTreeMap<String, String>,
    fields: String,
}

/// Tushare response envelope.
#[derive(Debug, Deserialize)]
struct TushareResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<RawTable>,
}

/// Low-level Tushare Pro client.
pub struct TushareClient {
    token: String,
    client: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
    max_retries: u32,
    retry_backoff: Duration,
}

impl TushareClient {
    /// Create a client from configuration and a token.
    pub fn new(token: impl Into<String>, config: &TushareConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            token: token.into(),
            client,
            base_url: config.base_url.clone(),
            limiter: RateLimiter::new("tushare", config.requests_per_minute),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(500),
        }
    }

    /// Override the base delay between retries (doubles per attempt).
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Call an API, retrying recoverable failures.
    pub async fn query(
        &self,
        api_name: &str,
        params: &BTreeMap<String, String>,
        fields: &[&str],
    ) -> Result<RawTable, SourceError> {
        let mut attempt = 0;
        loop {
            match self.call_once(api_name, params, fields).await {
                Ok(table) => {
                    debug!(api = api_name, rows = table.len(), attempt, "Tushare call succeeded");
                    return Ok(table);
                }
                Err(e) if e.is_recoverable() && attempt < self.max_retries => {
                    let delay = match &e {
                        SourceError::RateLimited {
                            retry_after_secs: Some(secs),
                        } => Duration::from_secs(*secs),
                        _ => self.retry_backoff * 2u32.saturating_pow(attempt),
                    };
                    warn!(
                        api = api_name,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Tushare call failed, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call_once(
        &self,
        api_name: &str,
        params: &BTreeMap<String, String>,
        fields: &[&str],
    ) -> Result<RawTable, SourceError> {
        self.limiter.acquire().await;

        let request = TushareRequest {
            api_name,
            token: &self.token,
            params,
            fields: fields.join(","),
        };

        let response = self
            .client
            .post(&self.base_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(SourceError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Http {
                status: status.as_u16(),
                message: body,
            });
        }

        let result: TushareResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Malformed(e.to_string()))?;

        if result.code != 0 {
            return Err(classify_vendor_error(result.code, result.msg.unwrap_or_default()));
        }

        let table = result.data.unwrap_or_default();
        if table.items.iter().any(|row| row.len() != table.fields.len()) {
            return Err(SourceError::Malformed(format!(
                "{} returned rows that do not match its {} fields",
                api_name,
                table.fields.len()
            )));
        }
        Ok(table)
    }
}

/// Map a non-zero Tushare code to an adapter error.
fn classify_vendor_error(code: i64, msg: String) -> SourceError {
    let lower = msg.to_lowercase();
    if msg.contains("积分") || msg.contains("权限") || lower.contains("credits") {
        SourceError::Credits(msg)
    } else if msg.contains("每分钟") || msg.contains("频率") || lower.contains("too many") {
        SourceError::RateLimited {
            retry_after_secs: Some(60),
        }
    } else if msg.contains("参数") || lower.contains("param") {
        SourceError::InvalidRequest(msg)
    } else {
        SourceError::Vendor { code, message: msg }
    }
}

/// [`SourceAdapter`] over Tushare Pro.
pub struct TushareAdapter {
    client: std::sync::Arc<TushareClient>,
}

impl TushareAdapter {
    /// Create an adapter over a shared client.
    pub fn new(client: std::sync::Arc<TushareClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceAdapter for TushareAdapter {
    fn name(&self) -> &'static str {
        "tushare"
    }

    async fn fetch(
        &self,
        source: SourceId,
        category: Category,
        trade_date: NaiveDate,
        filters: &FetchFilters,
    ) -> Result<RawTable, SourceError> {
        let endpoint = source.endpoint(category).ok_or(SourceError::Unsupported {
            source_id: source,
            category,
        })?;

        let mut params: BTreeMap<String, String> = endpoint
            .params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        params.insert("trade_date".into(), format_trade_date(&trade_date));
        if let Some(limit) = filters.limit {
            params.insert("limit".into(), limit.to_string());
        }
        if let Some(code) = &filters.ts_code {
            params.insert("ts_code".into(), code.clone());
        }
        if let Some(name) = &filters.name {
            params.insert("name".into(), name.clone());
        }

        self.client
            .query(endpoint.api_name, &params, endpoint.fields)
            .await
    }
}
