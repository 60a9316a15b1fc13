use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Digest, Sha256, Sha512};

use crate::api::ExchangeGateway;
use crate::error::{BotError, Result};
use crate::models::{AccountBalances, OhlcBar, OrderId, TradeSide};

// Kraken REST API
// Docs: https://docs.kraken.com/api/
const KRAKEN_API: &str = "https://api.kraken.com";
const OHLC_PATH: &str = "/0/public/OHLC";
const BALANCE_PATH: &str = "/0/private/Balance";
const ADD_ORDER_PATH: &str = "/0/private/AddOrder";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type HmacSha512 = Hmac<Sha512>;

/// API key plus the base64-decoded private key used for request signing.
#[derive(Clone)]
pub struct KrakenCredentials {
    api_key: String,
    secret: Vec<u8>,
}

impl KrakenCredentials {
    pub fn new(api_key: impl Into<String>, api_secret: &str) -> anyhow::Result<Self> {
        let secret = BASE64
            .decode(api_secret)
            .context("KRAKEN_API_SECRET is not valid base64")?;
        Ok(Self {
            api_key: api_key.into(),
            secret,
        })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("KRAKEN_API_KEY").context("KRAKEN_API_KEY is not set")?;
        let api_secret =
            std::env::var("KRAKEN_API_SECRET").context("KRAKEN_API_SECRET is not set")?;
        Self::new(api_key, &api_secret)
    }
}

/// Client for the Kraken spot REST API.
///
/// Private endpoints are signed with HMAC-SHA512 over the URI path and
/// a SHA256 digest of the nonce and form body, per Kraken's scheme.
/// Clones share the nonce counter so signatures stay strictly
/// increasing across tasks.
#[derive(Clone)]
pub struct KrakenClient {
    client: Client,
    base_url: String,
    credentials: KrakenCredentials,
    quote_asset: String,
    base_asset: String,
    nonce: Arc<AtomicU64>,
}

#[derive(Debug, Deserialize)]
struct KrakenResponse<T> {
    #[serde(default)]
    error: Vec<String>,
    result: Option<T>,
}

impl<T> KrakenResponse<T> {
    fn into_result(self, path: &str) -> std::result::Result<T, String> {
        // Kraken reports failures as HTTP 200 with a non-empty error array.
        if !self.error.is_empty() {
            return Err(format!("{path}: {}", self.error.join(", ")));
        }
        self.result
            .ok_or_else(|| format!("{path}: response missing result"))
    }
}

/// One OHLC bar as Kraken serializes it:
/// [time, open, high, low, close, vwap, volume, count], prices as strings.
type OhlcRow = (i64, String, String, String, String, String, String, u64);

#[derive(Debug, Deserialize)]
struct OhlcResult {
    #[allow(dead_code)]
    last: serde_json::Value,
    #[serde(flatten)]
    pairs: HashMap<String, Vec<OhlcRow>>,
}

#[derive(Debug, Deserialize)]
struct AddOrderResult {
    #[serde(default)]
    txid: Vec<String>,
    #[allow(dead_code)]
    #[serde(default)]
    descr: serde_json::Value,
}

impl KrakenClient {
    pub fn new(credentials: KrakenCredentials) -> Self {
        Self {
            client: Client::new(),
            base_url: KRAKEN_API.to_string(),
            credentials,
            quote_asset: "ZUSD".to_string(),
            base_asset: "XXBT".to_string(),
            nonce: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Override which balance keys count as the quote and base asset.
    pub fn with_assets(mut self, quote: impl Into<String>, base: impl Into<String>) -> Self {
        self.quote_asset = quote.into();
        self.base_asset = base.into();
        self
    }

    /// Next nonce: wall-clock milliseconds, bumped past the previous
    /// value so rapid calls never repeat or go backwards.
    fn next_nonce(&self) -> u64 {
        let now_ms = Utc::now().timestamp_millis() as u64;
        let prev = self
            .nonce
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(last.max(now_ms) + 1)
            })
            .unwrap_or(now_ms); // closure always returns Some
        prev.max(now_ms) + 1
    }

    /// API-Sign header value:
    /// base64(HMAC-SHA512(path + SHA256(nonce + postdata), secret)).
    fn sign(&self, path: &str, nonce: u64, postdata: &str) -> std::result::Result<String, String> {
        let mut sha = Sha256::new();
        sha.update(nonce.to_string().as_bytes());
        sha.update(postdata.as_bytes());
        let digest = sha.finalize();

        let mut mac = HmacSha512::new_from_slice(&self.credentials.secret)
            .map_err(|e| format!("invalid API secret: {e}"))?;
        mac.update(path.as_bytes());
        mac.update(&digest);
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> std::result::Result<T, String> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| format!("GET {path} failed: {e}"))?;
        read_envelope(response, path).await
    }

    async fn private_post<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> std::result::Result<T, String> {
        let nonce = self.next_nonce();
        // The signed bytes must match the body exactly, so the form is
        // assembled by hand. Values are plain ASCII (pair codes, order
        // types, decimal numbers) and need no percent-encoding.
        let mut postdata = format!("nonce={nonce}");
        for (key, value) in params {
            postdata.push('&');
            postdata.push_str(key);
            postdata.push('=');
            postdata.push_str(value);
        }
        let signature = self.sign(path, nonce, &postdata)?;

        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .header("API-Key", &self.credentials.api_key)
            .header("API-Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(postdata)
            .send()
            .await
            .map_err(|e| format!("POST {path} failed: {e}"))?;
        read_envelope(response, path).await
    }
}

async fn read_envelope<T: DeserializeOwned>(
    response: reqwest::Response,
    path: &str,
) -> std::result::Result<T, String> {
    let status = response.status();
    if !status.is_success() {
        return Err(format!("{path} returned HTTP {status}"));
    }
    let envelope: KrakenResponse<T> = response
        .json()
        .await
        .map_err(|e| format!("{path} returned invalid JSON: {e}"))?;
    envelope.into_result(path)
}

fn parse_ohlc_row(row: &OhlcRow) -> std::result::Result<OhlcBar, String> {
    let timestamp = Utc
        .timestamp_opt(row.0, 0)
        .single()
        .ok_or_else(|| format!("bad bar timestamp {}", row.0))?;
    Ok(OhlcBar {
        timestamp,
        open: parse_price(&row.1, "open")?,
        high: parse_price(&row.2, "high")?,
        low: parse_price(&row.3, "low")?,
        close: parse_price(&row.4, "close")?,
        volume: parse_price(&row.6, "volume")?,
    })
}

fn parse_price(raw: &str, field: &str) -> std::result::Result<f64, String> {
    raw.parse::<f64>()
        .map_err(|_| format!("bad {field} value {raw:?}"))
}

fn asset_balance(
    balances: &HashMap<String, String>,
    asset: &str,
) -> std::result::Result<f64, String> {
    match balances.get(asset) {
        Some(raw) => raw
            .parse::<f64>()
            .map_err(|_| format!("bad balance for {asset}: {raw:?}")),
        // Kraken omits assets the account has never held.
        None => Ok(0.0),
    }
}

#[async_trait]
impl ExchangeGateway for KrakenClient {
    async fn price_history(&self, pair: &str, interval_minutes: u32) -> Result<Vec<OhlcBar>> {
        let query = [
            ("pair", pair.to_string()),
            ("interval", interval_minutes.to_string()),
        ];
        let mut result: OhlcResult = self
            .public_get(OHLC_PATH, &query)
            .await
            .map_err(BotError::DataUnavailable)?;

        // The result is keyed by pair name, but Kraken may answer under
        // an alias of the requested code.
        let rows = match result.pairs.remove(pair) {
            Some(rows) => rows,
            None => result.pairs.into_values().next().ok_or_else(|| {
                BotError::DataUnavailable(format!("no OHLC data returned for {pair}"))
            })?,
        };

        let mut bars = Vec::with_capacity(rows.len());
        for row in &rows {
            bars.push(parse_ohlc_row(row).map_err(BotError::DataUnavailable)?);
        }
        tracing::debug!("Fetched {} OHLC bars for {}", bars.len(), pair);
        Ok(bars)
    }

    async fn balances(&self) -> Result<AccountBalances> {
        let result: HashMap<String, String> = self
            .private_post(BALANCE_PATH, &[])
            .await
            .map_err(BotError::DataUnavailable)?;
        Ok(AccountBalances {
            quote: asset_balance(&result, &self.quote_asset).map_err(BotError::DataUnavailable)?,
            base: asset_balance(&result, &self.base_asset).map_err(BotError::DataUnavailable)?,
        })
    }

    async fn market_order(&self, pair: &str, side: TradeSide, volume: f64) -> Result<OrderId> {
        let params = [
            ("ordertype", "market".to_string()),
            ("type", side.as_str().to_string()),
            ("volume", format!("{volume:.8}")),
            ("pair", pair.to_string()),
        ];
        let result: AddOrderResult = self
            .private_post(ADD_ORDER_PATH, &params)
            .await
            .map_err(BotError::OrderRejected)?;
        Ok(OrderId(result.txid.join(",")))
    }

    async fn stop_loss_order(
        &self,
        pair: &str,
        side: TradeSide,
        stop_price: f64,
        volume: f64,
    ) -> Result<OrderId> {
        let params = [
            ("ordertype", "stop-loss".to_string()),
            ("type", side.as_str().to_string()),
            ("volume", format!("{volume:.8}")),
            ("pair", pair.to_string()),
            // Kraken quotes XBT/USD stops to one decimal.
            ("price", format!("{stop_price:.1}")),
        ];
        let result: AddOrderResult = self
            .private_post(ADD_ORDER_PATH, &params)
            .await
            .map_err(BotError::OrderRejected)?;
        Ok(OrderId(result.txid.join(",")))
    }
}
