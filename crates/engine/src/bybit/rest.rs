use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::{debug, warn};

use common::config::ExchangeEnv;
use common::{
    Bar, CloseTrigger, Config, Error, ExchangeClient, ExchangePosition, Fill, Interval,
    OrderRecord, OrderRequest, OrderSide, Result, Side,
};

const RECV_WINDOW: &str = "5000";
const CATEGORY: &str = "linear";
const KLINE_LIMIT: usize = 1000;
/// Pause before looking up the fill of a just-submitted close.
const FILL_LOOKUP_DELAY: Duration = Duration::from_secs(1);

pub fn base_url(env: ExchangeEnv) -> &'static str {
    match env {
        ExchangeEnv::Mainnet => "https://api.bybit.com",
        ExchangeEnv::Testnet => "https://api-testnet.bybit.com",
        ExchangeEnv::Demo => "https://api-demo.bybit.com",
    }
}

/// Hex HMAC-SHA256 signature of a V5 request.
///
/// The signed string is `timestamp + api_key + recv_window + payload`, where
/// payload is the query string for GET and the raw JSON body for POST.
pub fn sign_payload(secret: &str, timestamp: i64, api_key: &str, recv_window: &str, payload: &str) -> String {
    type HmacSha256 = Hmac<Sha256>;
    // HMAC accepts keys of any length, so this never fails.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(api_key.as_bytes());
    mac.update(recv_window.as_bytes());
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// REST client for Bybit's V5 unified API, linear (USDT perpetual) category.
pub struct BybitClient {
    api_key: String,
    secret: String,
    base_url: String,
    http: Client,
}

impl BybitClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>, env: ExchangeEnv) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            api_key: api_key.into(),
            secret: secret.into(),
            base_url: base_url(env).to_string(),
            http,
        })
    }

    /// Build from process config. Public market data works without
    /// credentials; signed endpoints will be rejected by the exchange.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.bybit_api_key.clone().unwrap_or_default(),
            config.bybit_secret.clone().unwrap_or_default(),
            config.bybit_env,
        )
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn auth_headers(&self, payload: &str) -> [(&'static str, String); 4] {
        let ts = Utc::now().timestamp_millis();
        let signature = sign_payload(&self.secret, ts, &self.api_key, RECV_WINDOW, payload);
        [
            ("X-BAPI-API-KEY", self.api_key.clone()),
            ("X-BAPI-SIGN", signature),
            ("X-BAPI-TIMESTAMP", ts.to_string()),
            ("X-BAPI-RECV-WINDOW", RECV_WINDOW.to_string()),
        ]
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)], signed: bool) -> Result<T> {
        let query = encode_query(params);
        let url = format!("{}{path}?{query}", self.base_url);
        let mut req = self.http.get(&url);
        if signed {
            for (name, value) in self.auth_headers(&query) {
                req = req.header(name, value);
            }
        }
        debug!(%path, %query, signed, "Bybit GET");

        let resp = req.send().await.map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {body}")));
        }
        parse_envelope(&body)
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, payload: serde_json::Value) -> Result<T> {
        let body = payload.to_string();
        let url = format!("{}{path}", self.base_url);
        let mut req = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .body(body.clone());
        for (name, value) in self.auth_headers(&body) {
            req = req.header(name, value);
        }
        debug!(%path, %body, "Bybit POST");

        let resp = req.send().await.map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {text}")));
        }
        parse_envelope(&text)
    }

    async fn submit(&self, body: serde_json::Value) -> Result<String> {
        let created: CreatedOrder = self.post("/v5/order/create", body).await?;
        if created.order_id.is_empty() {
            return Err(Error::ExecutionFailure(
                "order accepted without an order id".into(),
            ));
        }
        Ok(created.order_id)
    }

    async fn order_by_id(&self, symbol: &str, order_id: &str) -> Result<Option<OrderRecord>> {
        let page: ListResult<RawOrder> = self
            .get(
                "/v5/order/history",
                &[
                    ("category", CATEGORY.to_string()),
                    ("symbol", symbol.to_string()),
                    ("orderId", order_id.to_string()),
                ],
                true,
            )
            .await?;
        page.list.into_iter().next().map(RawOrder::into_record).transpose()
    }
}

#[async_trait]
impl ExchangeClient for BybitClient {
    async fn fetch_bars(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>> {
        let start_ms = start.timestamp_millis();
        let mut end_ms = end.timestamp_millis() - 1;
        let mut bars: Vec<Bar> = Vec::new();

        // Pages come back newest first; walk backwards until `start`.
        while end_ms >= start_ms {
            let page: ListResult<Vec<String>> = self
                .get(
                    "/v5/market/kline",
                    &[
                        ("category", CATEGORY.to_string()),
                        ("symbol", symbol.to_string()),
                        ("interval", interval.bybit_code().to_string()),
                        ("start", start_ms.to_string()),
                        ("end", end_ms.to_string()),
                        ("limit", KLINE_LIMIT.to_string()),
                    ],
                    false,
                )
                .await?;
            let rows = parse_klines(&page.list)?;
            let Some(oldest) = rows.iter().map(|b| b.timestamp.timestamp_millis()).min() else {
                break;
            };
            let full_page = rows.len() >= KLINE_LIMIT;
            bars.extend(rows);
            if !full_page || oldest <= start_ms {
                break;
            }
            end_ms = oldest - 1;
        }

        bars.sort_by_key(|b| b.timestamp);
        bars.dedup_by_key(|b| b.timestamp);
        bars.retain(|b| b.timestamp >= start && b.timestamp < end);
        if bars
            .last()
            .is_some_and(|b| b.timestamp + interval.duration() > Utc::now())
        {
            bars.pop();
        }
        debug!(symbol, interval = %interval, count = bars.len(), "klines fetched");
        Ok(bars)
    }

    async fn current_price(&self, symbol: &str) -> Result<f64> {
        let page: ListResult<Ticker> = self
            .get(
                "/v5/market/tickers",
                &[("category", CATEGORY.to_string()), ("symbol", symbol.to_string())],
                false,
            )
            .await?;
        let ticker = page
            .list
            .into_iter()
            .next()
            .ok_or_else(|| Error::DataUnavailable(format!("no ticker for {symbol}")))?;
        parse_num("lastPrice", &ticker.last_price)
    }

    async fn open_position(&self, symbol: &str) -> Result<Option<ExchangePosition>> {
        let page: ListResult<RawPosition> = self
            .get(
                "/v5/position/list",
                &[("category", CATEGORY.to_string()), ("symbol", symbol.to_string())],
                true,
            )
            .await?;
        match page.list.into_iter().next() {
            Some(raw) => raw.into_position(),
            None => Ok(None),
        }
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<Fill> {
        let mut body = json!({
            "category": CATEGORY,
            "symbol": order.symbol,
            "side": order.side.as_str(),
            "orderType": "Market",
            "qty": format!("{:.3}", order.quantity),
        });
        if let Some(tp) = order.take_profit {
            body["takeProfit"] = json!(format!("{tp:.2}"));
        }
        if let Some(sl) = order.stop_loss {
            body["stopLoss"] = json!(format!("{sl:.2}"));
        }

        debug!(symbol = %order.symbol, side = %order.side, qty = order.quantity, "Submitting order to Bybit");
        let order_id = self.submit(body).await?;

        Ok(Fill {
            order_id,
            symbol: order.symbol.clone(),
            side: order.side,
            fill_price: order.price,
            quantity: order.quantity,
            timestamp: Utc::now(),
        })
    }

    async fn close_position(
        &self,
        symbol: &str,
        quantity: f64,
        side: OrderSide,
        reference_price: f64,
    ) -> Result<Fill> {
        let body = json!({
            "category": CATEGORY,
            "symbol": symbol,
            "side": side.as_str(),
            "orderType": "Market",
            "qty": format!("{quantity:.3}"),
            "reduceOnly": true,
        });
        let order_id = self.submit(body).await?;

        // The position is closed from here on; only the reported price may degrade.
        tokio::time::sleep(FILL_LOOKUP_DELAY).await;
        let avg_price = match self.order_by_id(symbol, &order_id).await {
            Ok(Some(record)) => record.avg_price,
            Ok(None) => None,
            Err(e) => {
                warn!(%order_id, error = %e, "fill lookup failed");
                None
            }
        };
        let fill_price = match avg_price {
            Some(p) => p,
            None => fallback_fill_price(self.current_price(symbol).await, reference_price),
        };

        Ok(Fill {
            order_id,
            symbol: symbol.to_string(),
            side,
            fill_price,
            quantity,
            timestamp: Utc::now(),
        })
    }

    async fn recent_orders(&self, symbol: &str, limit: usize) -> Result<Vec<OrderRecord>> {
        let page: ListResult<RawOrder> = self
            .get(
                "/v5/order/history",
                &[
                    ("category", CATEGORY.to_string()),
                    ("symbol", symbol.to_string()),
                    ("limit", limit.to_string()),
                ],
                true,
            )
            .await?;
        page.list.into_iter().map(RawOrder::into_record).collect()
    }

    async fn wallet_balance(&self) -> Result<f64> {
        let page: ListResult<RawWallet> = self
            .get(
                "/v5/account/wallet-balance",
                &[("accountType", "UNIFIED".to_string())],
                true,
            )
            .await?;
        let wallet = page
            .list
            .into_iter()
            .next()
            .ok_or_else(|| Error::DataUnavailable("no wallet in balance response".into()))?;
        wallet.balance()
    }

    async fn fee_rate(&self, symbol: &str) -> Result<f64> {
        let page: ListResult<RawFeeRate> = self
            .get(
                "/v5/account/fee-rate",
                &[("category", CATEGORY.to_string()), ("symbol", symbol.to_string())],
                true,
            )
            .await?;
        let rate = page
            .list
            .into_iter()
            .next()
            .ok_or_else(|| Error::DataUnavailable(format!("no fee rate for {symbol}")))?;
        parse_num("takerFeeRate", &rate.taker_fee_rate)
    }
}

/// Price to book a submitted close at when the fill price is unknown: the
/// ticker if it answers, else the caller's reference price.
fn fallback_fill_price(ticker: Result<f64>, reference_price: f64) -> f64 {
    ticker.unwrap_or_else(|e| {
        warn!(error = %e, reference_price, "ticker unavailable after close; using reference price");
        reference_price
    })
}

fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn parse_num(field: &str, raw: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| Error::Exchange(format!("{field} is not a number: '{raw}'")))
}

/// Like `parse_num`, but empty and zero values mean "not reported".
fn parse_optional(field: &str, raw: &str) -> Result<Option<f64>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let value = parse_num(field, raw)?;
    Ok((value > 0.0).then_some(value))
}

fn parse_millis(raw: &str) -> Result<DateTime<Utc>> {
    let ms: i64 = raw
        .trim()
        .parse()
        .map_err(|_| Error::Exchange(format!("bad timestamp '{raw}'")))?;
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| Error::Exchange(format!("timestamp out of range: {ms}")))
}

/// Unwrap the `{retCode, retMsg, result}` envelope every V5 response uses.
fn parse_envelope<T: DeserializeOwned>(body: &str) -> Result<T> {
    let envelope: Envelope = serde_json::from_str(body)?;
    if envelope.ret_code != 0 {
        return Err(Error::Exchange(format!(
            "retCode {}: {}",
            envelope.ret_code, envelope.ret_msg
        )));
    }
    Ok(serde_json::from_value(envelope.result)?)
}

/// Kline rows are `[startMs, open, high, low, close, volume, turnover]`.
fn parse_klines(rows: &[Vec<String>]) -> Result<Vec<Bar>> {
    rows.iter()
        .map(|row| {
            if row.len() < 6 {
                return Err(Error::Exchange(format!("short kline row: {row:?}")));
            }
            Ok(Bar {
                timestamp: parse_millis(&row[0])?,
                open: parse_num("open", &row[1])?,
                high: parse_num("high", &row[2])?,
                low: parse_num("low", &row[3])?,
                close: parse_num("close", &row[4])?,
                volume: parse_num("volume", &row[5])?,
            }
            .rounded())
        })
        .collect()
}

fn parse_side(raw: &str) -> Result<OrderSide> {
    match raw {
        "Buy" => Ok(OrderSide::Buy),
        "Sell" => Ok(OrderSide::Sell),
        other => Err(Error::Exchange(format!("unknown side '{other}'"))),
    }
}

/// Bybit marks exchange-triggered closes through either field, depending on
/// whether the bracket was attached to the position or placed separately.
fn classify_trigger(stop_order_type: &str, create_type: &str) -> CloseTrigger {
    match (stop_order_type, create_type) {
        ("TakeProfit" | "PartialTakeProfit", _) | (_, "CreateByTakeProfit" | "CreateByPartialTakeProfit") => {
            CloseTrigger::TakeProfit
        }
        ("StopLoss" | "PartialStopLoss" | "TrailingStop", _)
        | (_, "CreateByStopLoss" | "CreateByPartialStopLoss" | "CreateByTrailingStop") => {
            CloseTrigger::StopLoss
        }
        _ => CloseTrigger::Manual,
    }
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ListResult<T> {
    #[serde(default = "Vec::new")]
    list: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker {
    last_price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPosition {
    symbol: String,
    side: String,
    size: String,
    avg_price: String,
}

impl RawPosition {
    fn into_position(self) -> Result<Option<ExchangePosition>> {
        let size = parse_optional("size", &self.size)?;
        let Some(size) = size else {
            return Ok(None);
        };
        Ok(Some(ExchangePosition {
            symbol: self.symbol,
            side: Side::from(parse_side(&self.side)?),
            size,
            entry_price: parse_num("avgPrice", &self.avg_price)?,
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedOrder {
    #[serde(default)]
    order_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrder {
    order_id: String,
    symbol: String,
    side: String,
    qty: String,
    #[serde(default)]
    avg_price: String,
    #[serde(default)]
    reduce_only: bool,
    #[serde(default)]
    order_status: String,
    #[serde(default)]
    stop_order_type: String,
    #[serde(default)]
    create_type: String,
    updated_time: String,
}

impl RawOrder {
    fn into_record(self) -> Result<OrderRecord> {
        Ok(OrderRecord {
            side: parse_side(&self.side)?,
            quantity: parse_num("qty", &self.qty)?,
            avg_price: parse_optional("avgPrice", &self.avg_price)?,
            reduce_only: self.reduce_only,
            filled: self.order_status == "Filled",
            trigger: classify_trigger(&self.stop_order_type, &self.create_type),
            updated_at: parse_millis(&self.updated_time)?,
            order_id: self.order_id,
            symbol: self.symbol,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWallet {
    #[serde(default)]
    total_available_balance: String,
    #[serde(default)]
    total_wallet_balance: String,
}

impl RawWallet {
    fn balance(&self) -> Result<f64> {
        if let Some(v) = parse_optional("totalAvailableBalance", &self.total_available_balance)? {
            return Ok(v);
        }
        parse_optional("totalWalletBalance", &self.total_wallet_balance)?
            .ok_or_else(|| Error::DataUnavailable("wallet reports no balance".into()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFeeRate {
    taker_fee_rate: String,
}
