// =============================================================================
// Binance USDⓈ-M Futures REST client — HMAC-SHA256 signed requests
// =============================================================================
//
// SECURITY: the secret key is never logged or serialized. Signed requests
// carry X-MBX-APIKEY as a header and a recvWindow of 5 000 ms to tolerate
// minor clock drift against the venue.
//
// Transport errors on idempotent reads are retried once locally; business
// errors surface as a typed `ApiError` so callers can branch on the code.
// =============================================================================

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use crate::market_data::{Candle, FundingQuote};
use crate::types::Direction;

use super::{
    AlgoKind, AlgoOrder, ApiError, BookTicker, ExchangeAdapter, ExchangePosition, LotSizeInfo,
    OrderInfo, OrderRequest, OrderState, OrderType, TpSlOrderIds, TpSlRequest,
};

type HmacSha256 = Hmac<Sha256>;

/// Recv-window sent with every signed request (milliseconds).
const RECV_WINDOW: u64 = 5000;
/// Pause before the single read retry.
const READ_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Order types the engine treats as exchange-side protective (algo) orders.
const ALGO_ORDER_TYPES: &[&str] = &["STOP", "STOP_MARKET", "TAKE_PROFIT", "TAKE_PROFIT_MARKET"];

#[derive(Clone)]
pub struct BinanceFuturesClient {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl BinanceFuturesClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self::with_base_url(api_key, secret, "https://fapi.binance.com")
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            api_key,
            secret,
            base_url: base_url.into(),
            client,
        }
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    // -------------------------------------------------------------------------
    // Transport helpers
    // -------------------------------------------------------------------------

    /// Send a request and check the response: non-2xx with a Binance error
    /// body becomes a typed `ApiError`.
    async fn checked(&self, request: reqwest::RequestBuilder) -> Result<serde_json::Value> {
        let resp = request.send().await.context("exchange request failed")?;
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse exchange response body")?;

        if !status.is_success() {
            if let (Some(code), Some(msg)) = (body["code"].as_i64(), body["msg"].as_str()) {
                return Err(ApiError {
                    code,
                    msg: msg.to_string(),
                }
                .into());
            }
            anyhow::bail!("exchange returned {status}: {body}");
        }
        Ok(body)
    }

    /// GET with one transport-level retry. Business errors are not retried.
    async fn get_retry(&self, url: &str) -> Result<serde_json::Value> {
        match self.checked(self.client.get(url)).await {
            Ok(body) => Ok(body),
            Err(first) => {
                if super::as_api_error(&first).is_some() {
                    return Err(first);
                }
                warn!(error = %first, "read failed — retrying once");
                tokio::time::sleep(READ_RETRY_DELAY).await;
                self.checked(self.client.get(url)).await
            }
        }
    }

    fn public_url(&self, path: &str, params: &str) -> String {
        if params.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, params)
        }
    }

    fn signed_url(&self, path: &str, params: &str) -> String {
        format!("{}{}?{}", self.base_url, path, self.signed_query(params))
    }
}

// ---------------------------------------------------------------------------
// Response parsing (pure, unit-tested)
// ---------------------------------------------------------------------------

/// Parse a JSON value that may be either a string or a number into f64.
fn json_f64(value: &serde_json::Value) -> Result<f64> {
    if let Some(s) = value.as_str() {
        s.parse::<f64>()
            .with_context(|| format!("failed to parse '{s}' as f64"))
    } else if let Some(n) = value.as_f64() {
        Ok(n)
    } else {
        anyhow::bail!("expected string or number, got: {value}")
    }
}

/// Klines arrive as arrays: [0] openTime, [1] o, [2] h, [3] l, [4] c, [5] v.
fn parse_kline_rows(body: &serde_json::Value) -> Result<Vec<Candle>> {
    let rows = body.as_array().context("klines response is not an array")?;
    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        let arr = row.as_array().context("kline entry is not an array")?;
        if arr.len() < 6 {
            warn!("skipping malformed kline entry with {} elements", arr.len());
            continue;
        }
        candles.push(Candle::new(
            arr[0].as_i64().unwrap_or(0),
            json_f64(&arr[1])?,
            json_f64(&arr[2])?,
            json_f64(&arr[3])?,
            json_f64(&arr[4])?,
            json_f64(&arr[5])?,
        ));
    }
    Ok(candles)
}

fn parse_premium_index(body: &serde_json::Value) -> Vec<FundingQuote> {
    let rows = match body.as_array() {
        Some(rows) => rows.as_slice(),
        None => std::slice::from_ref(body),
    };
    rows.iter()
        .filter_map(|row| {
            let symbol = row["symbol"].as_str()?.to_string();
            Some(FundingQuote {
                symbol,
                rate: json_f64(&row["lastFundingRate"]).ok()?,
                next_funding_time: row["nextFundingTime"].as_i64().unwrap_or(0),
                mark_price: json_f64(&row["markPrice"]).unwrap_or(0.0),
                index_price: json_f64(&row["indexPrice"]).unwrap_or(0.0),
            })
        })
        .collect()
}

fn parse_book_tickers(body: &serde_json::Value) -> Vec<BookTicker> {
    body.as_array()
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    Some(BookTicker {
                        symbol: row["symbol"].as_str()?.to_string(),
                        bid: json_f64(&row["bidPrice"]).ok()?,
                        ask: json_f64(&row["askPrice"]).ok()?,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_order_info(body: &serde_json::Value) -> Result<OrderInfo> {
    let order_id = body["orderId"]
        .as_u64()
        .map(|id| id.to_string())
        .or_else(|| body["orderId"].as_str().map(String::from))
        .context("order response missing orderId")?;
    let state = body["status"]
        .as_str()
        .and_then(OrderState::from_wire)
        .context("order response missing or unknown status")?;
    Ok(OrderInfo {
        order_id,
        state,
        executed_qty: json_f64(&body["executedQty"]).unwrap_or(0.0),
        avg_price: json_f64(&body["avgPrice"]).unwrap_or(0.0),
    })
}

fn parse_algo_orders(body: &serde_json::Value) -> Vec<AlgoOrder> {
    body.as_array()
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    let order_type = row["type"].as_str()?;
                    if !ALGO_ORDER_TYPES.contains(&order_type) {
                        return None;
                    }
                    let kind = if order_type.starts_with("STOP") {
                        AlgoKind::Stop
                    } else {
                        AlgoKind::TakeProfit
                    };
                    Some(AlgoOrder {
                        order_id: row["orderId"].as_u64()?.to_string(),
                        kind,
                        trigger_price: json_f64(&row["stopPrice"]).unwrap_or(0.0),
                        quantity: json_f64(&row["origQty"]).unwrap_or(0.0),
                        close_position: row["closePosition"].as_bool().unwrap_or(false),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_position_risk(body: &serde_json::Value) -> Vec<ExchangePosition> {
    body.as_array()
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    let amount = json_f64(&row["positionAmt"]).ok()?;
                    if amount == 0.0 {
                        return None;
                    }
                    Some(ExchangePosition {
                        symbol: row["symbol"].as_str()?.to_string(),
                        direction: if amount > 0.0 {
                            Direction::Long
                        } else {
                            Direction::Short
                        },
                        quantity: amount.abs(),
                        entry_price: json_f64(&row["entryPrice"]).unwrap_or(0.0),
                        unrealized_pnl: json_f64(&row["unRealizedProfit"]).unwrap_or(0.0),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Pull a named filter value out of an exchangeInfo symbol entry.
fn symbol_filter_value(symbol_info: &serde_json::Value, filter_type: &str, field: &str) -> Result<f64> {
    let filters = symbol_info["filters"]
        .as_array()
        .context("exchangeInfo symbol entry missing filters")?;
    let filter = filters
        .iter()
        .find(|f| f["filterType"].as_str() == Some(filter_type))
        .with_context(|| format!("missing {filter_type} filter"))?;
    json_f64(&filter[field])
}

// ---------------------------------------------------------------------------
// Adapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ExchangeAdapter for BinanceFuturesClient {
    #[instrument(skip(self), name = "binance::get_funding_all")]
    async fn get_funding_all(&self) -> Result<Vec<FundingQuote>> {
        let url = self.public_url("/fapi/v1/premiumIndex", "");
        let body = self.get_retry(&url).await?;
        let quotes = parse_premium_index(&body);
        debug!(count = quotes.len(), "funding quotes fetched");
        Ok(quotes)
    }

    #[instrument(skip(self), name = "binance::get_book_ticker_all")]
    async fn get_book_ticker_all(&self) -> Result<Vec<BookTicker>> {
        let url = self.public_url("/fapi/v1/ticker/bookTicker", "");
        let body = self.get_retry(&url).await?;
        let tickers = parse_book_tickers(&body);
        debug!(count = tickers.len(), "book tickers fetched");
        Ok(tickers)
    }

    #[instrument(skip(self), name = "binance::get_open_interest")]
    async fn get_open_interest(&self, symbol: &str) -> Result<f64> {
        let url = self.public_url("/fapi/v1/openInterest", &format!("symbol={symbol}"));
        let body = self.get_retry(&url).await?;
        json_f64(&body["openInterest"]).context("openInterest missing from response")
    }

    #[instrument(skip(self), name = "binance::get_historical_candles")]
    async fn get_historical_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        let url = self.public_url(
            "/fapi/v1/klines",
            &format!("symbol={symbol}&interval={interval}&limit={limit}"),
        );
        let body = self.get_retry(&url).await?;
        let candles = parse_kline_rows(&body)?;
        debug!(symbol, interval, count = candles.len(), "historical candles fetched");
        Ok(candles)
    }

    #[instrument(skip(self), name = "binance::get_symbol_price")]
    async fn get_symbol_price(&self, symbol: &str) -> Result<f64> {
        let url = self.public_url("/fapi/v1/ticker/price", &format!("symbol={symbol}"));
        let body = self.get_retry(&url).await?;
        json_f64(&body["price"]).context("price missing from ticker response")
    }

    #[instrument(skip(self), name = "binance::get_available_balance")]
    async fn get_available_balance(&self) -> Result<f64> {
        let url = self.signed_url("/fapi/v2/balance", "");
        let body = self.get_retry(&url).await?;
        let rows = body.as_array().context("balance response is not an array")?;
        for row in rows {
            if row["asset"].as_str() == Some("USDT") {
                return json_f64(&row["availableBalance"])
                    .context("availableBalance missing for USDT");
            }
        }
        warn!("USDT not found in balances — returning 0.0");
        Ok(0.0)
    }

    #[instrument(skip(self), name = "binance::get_open_positions")]
    async fn get_open_positions(&self) -> Result<Vec<ExchangePosition>> {
        let url = self.signed_url("/fapi/v2/positionRisk", "");
        let body = self.get_retry(&url).await?;
        Ok(parse_position_risk(&body))
    }

    #[instrument(skip(self), name = "binance::set_leverage")]
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let url = self.signed_url("/fapi/v1/leverage", &format!("symbol={symbol}&leverage={leverage}"));
        self.checked(self.client.post(&url)).await?;
        debug!(symbol, leverage, "leverage set");
        Ok(())
    }

    #[instrument(skip(self, request), name = "binance::create_order", fields(symbol = %request.symbol, side = %request.side))]
    async fn create_order(&self, request: OrderRequest) -> Result<String> {
        let mut params = format!(
            "symbol={}&side={}&type={}&quantity={}",
            request.symbol, request.side, request.order_type, request.quantity
        );
        if let Some(price) = request.price {
            params.push_str(&format!("&price={price}"));
        }
        if request.order_type == OrderType::Limit {
            params.push_str(&format!("&timeInForce={}", request.tif));
        }
        if request.reduce_only {
            params.push_str("&reduceOnly=true");
        }

        let url = self.signed_url("/fapi/v1/order", &params);
        let body = self.checked(self.client.post(&url)).await?;
        let info = parse_order_info(&body)?;
        debug!(order_id = %info.order_id, "order placed");
        Ok(info.order_id)
    }

    #[instrument(skip(self), name = "binance::query_order")]
    async fn query_order(&self, symbol: &str, order_id: &str) -> Result<OrderInfo> {
        let url = self.signed_url("/fapi/v1/order", &format!("symbol={symbol}&orderId={order_id}"));
        let body = self.get_retry(&url).await?;
        parse_order_info(&body)
    }

    #[instrument(skip(self), name = "binance::cancel_order")]
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        let url = self.signed_url("/fapi/v1/order", &format!("symbol={symbol}&orderId={order_id}"));
        self.checked(self.client.delete(&url)).await?;
        debug!(symbol, order_id, "order cancelled");
        Ok(())
    }

    #[instrument(skip(self, request), name = "binance::create_tp_sl_order", fields(symbol = %request.symbol))]
    async fn create_tp_sl_order(&self, request: TpSlRequest) -> Result<TpSlOrderIds> {
        // Two reduce-only trigger orders on the closing side. TP first; if
        // the SL leg then fails the caller's watchdog will restore the pair.
        let tp_params = format!(
            "symbol={}&side={}&type=TAKE_PROFIT_MARKET&quantity={}&stopPrice={}&reduceOnly=true&workingType=MARK_PRICE",
            request.symbol, request.side, request.tp_quantity, request.tp_trigger
        );
        let tp_url = self.signed_url("/fapi/v1/order", &tp_params);
        let tp_body = self.checked(self.client.post(&tp_url)).await
            .context("TP leg placement failed")?;
        let tp_id = parse_order_info(&tp_body)?.order_id;

        let sl_params = format!(
            "symbol={}&side={}&type=STOP_MARKET&quantity={}&stopPrice={}&reduceOnly=true&workingType=MARK_PRICE",
            request.symbol, request.side, request.sl_quantity, request.sl_trigger
        );
        let sl_url = self.signed_url("/fapi/v1/order", &sl_params);
        let sl_body = self.checked(self.client.post(&sl_url)).await
            .context("SL leg placement failed")?;
        let sl_id = parse_order_info(&sl_body)?.order_id;

        debug!(tp_id = %tp_id, sl_id = %sl_id, "TP/SL pair placed");
        Ok(TpSlOrderIds {
            tp_order_id: Some(tp_id),
            sl_order_id: Some(sl_id),
        })
    }

    #[instrument(skip(self), name = "binance::cancel_all_algo_orders")]
    async fn cancel_all_algo_orders(&self, symbol: &str) -> Result<()> {
        // Cancel only trigger orders; a resting limit entry must survive.
        let algos = self.get_open_algo_orders(symbol).await?;
        for algo in algos {
            if let Err(e) = self.cancel_order(symbol, &algo.order_id).await {
                warn!(symbol, order_id = %algo.order_id, error = %e, "algo cancel failed");
            }
        }
        Ok(())
    }

    #[instrument(skip(self), name = "binance::get_open_algo_orders")]
    async fn get_open_algo_orders(&self, symbol: &str) -> Result<Vec<AlgoOrder>> {
        let url = self.signed_url("/fapi/v1/openOrders", &format!("symbol={symbol}"));
        let body = self.get_retry(&url).await?;
        Ok(parse_algo_orders(&body))
    }

    #[instrument(skip(self), name = "binance::get_lot_size_info")]
    async fn get_lot_size_info(&self, symbol: &str) -> Result<LotSizeInfo> {
        let info = self.symbol_info(symbol).await?;
        Ok(LotSizeInfo {
            step: symbol_filter_value(&info, "LOT_SIZE", "stepSize")?,
            min_qty: symbol_filter_value(&info, "LOT_SIZE", "minQty")?,
        })
    }

    #[instrument(skip(self), name = "binance::get_tick_size")]
    async fn get_tick_size(&self, symbol: &str) -> Result<f64> {
        let info = self.symbol_info(symbol).await?;
        symbol_filter_value(&info, "PRICE_FILTER", "tickSize")
    }
}

impl BinanceFuturesClient {
    async fn symbol_info(&self, symbol: &str) -> Result<serde_json::Value> {
        let url = self.public_url("/fapi/v1/exchangeInfo", &format!("symbol={symbol}"));
        let body = self.get_retry(&url).await?;
        body["symbols"]
            .as_array()
            .and_then(|rows| rows.first().cloned())
            .context("symbol not found in exchangeInfo response")
    }
}

impl std::fmt::Debug for BinanceFuturesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceFuturesClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_is_stable() {
        let client = BinanceFuturesClient::new("key", "secret");
        let sig = client.sign("symbol=BTCUSDT&side=BUY");
        // HMAC-SHA256 of a fixed input under a fixed key never changes.
        assert_eq!(sig, client.sign("symbol=BTCUSDT&side=BUY"));
        assert_eq!(sig.len(), 64);
        assert_ne!(sig, client.sign("symbol=BTCUSDT&side=SELL"));
    }

    #[test]
    fn kline_rows_parse() {
        let body = serde_json::json!([
            [1700000000000_i64, "37000.0", "37050.0", "36990.0", "37020.0", "123.4", 1700000059999_i64, "0", 10, "0", "0", "0"],
            [1700000060000_i64, "37020.0", "37100.0", "37010.0", "37090.0", "98.7", 1700000119999_i64, "0", 10, "0", "0", "0"]
        ]);
        let candles = parse_kline_rows(&body).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open_time, 1_700_000_000_000);
        assert!((candles[1].close - 37_090.0).abs() < 1e-9);
    }

    #[test]
    fn premium_index_parse() {
        let body = serde_json::json!([
            {"symbol": "BTCUSDT", "markPrice": "37011.1", "indexPrice": "37010.0",
             "lastFundingRate": "0.00010000", "nextFundingTime": 1700028800000_i64},
            {"symbol": "ETHUSDT", "markPrice": "2001.5", "indexPrice": "2001.0",
             "lastFundingRate": "-0.00025000", "nextFundingTime": 1700028800000_i64}
        ]);
        let quotes = parse_premium_index(&body);
        assert_eq!(quotes.len(), 2);
        assert!((quotes[0].rate - 0.0001).abs() < 1e-12);
        assert!((quotes[1].rate + 0.00025).abs() < 1e-12);
    }

    #[test]
    fn book_ticker_parse() {
        let body = serde_json::json!([
            {"symbol": "BTCUSDT", "bidPrice": "36999.9", "askPrice": "37000.1"},
        ]);
        let tickers = parse_book_tickers(&body);
        assert_eq!(tickers.len(), 1);
        assert!((tickers[0].ask - tickers[0].bid - 0.2).abs() < 1e-9);
    }

    #[test]
    fn order_info_parse() {
        let body = serde_json::json!({
            "orderId": 123456_u64, "status": "PARTIALLY_FILLED",
            "executedQty": "0.002", "avgPrice": "50000.0"
        });
        let info = parse_order_info(&body).unwrap();
        assert_eq!(info.order_id, "123456");
        assert_eq!(info.state, OrderState::PartiallyFilled);
        assert!((info.executed_qty - 0.002).abs() < 1e-12);
    }

    #[test]
    fn algo_orders_filter_out_resting_limits() {
        let body = serde_json::json!([
            {"orderId": 1_u64, "type": "LIMIT", "stopPrice": "0", "origQty": "0.004", "closePosition": false},
            {"orderId": 2_u64, "type": "STOP_MARKET", "stopPrice": "49800.0", "origQty": "0.004", "closePosition": false},
            {"orderId": 3_u64, "type": "TAKE_PROFIT_MARKET", "stopPrice": "50250.0", "origQty": "0.002", "closePosition": true}
        ]);
        let algos = parse_algo_orders(&body);
        assert_eq!(algos.len(), 2);
        assert_eq!(algos[0].kind, AlgoKind::Stop);
        assert_eq!(algos[1].kind, AlgoKind::TakeProfit);
        assert!(algos[1].close_position);
    }

    #[test]
    fn position_risk_skips_flat_rows() {
        let body = serde_json::json!([
            {"symbol": "BTCUSDT", "positionAmt": "0.004", "entryPrice": "50000.0", "unRealizedProfit": "1.0"},
            {"symbol": "ETHUSDT", "positionAmt": "0", "entryPrice": "0.0", "unRealizedProfit": "0"},
            {"symbol": "SOLUSDT", "positionAmt": "-10", "entryPrice": "100.0", "unRealizedProfit": "-0.5"}
        ]);
        let positions = parse_position_risk(&body);
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].direction, Direction::Long);
        assert_eq!(positions[1].direction, Direction::Short);
        assert!((positions[1].quantity - 10.0).abs() < 1e-12);
    }

    #[test]
    fn exchange_info_filters() {
        let info = serde_json::json!({
            "symbol": "BTCUSDT",
            "filters": [
                {"filterType": "PRICE_FILTER", "tickSize": "0.10", "minPrice": "0.10"},
                {"filterType": "LOT_SIZE", "stepSize": "0.001", "minQty": "0.001"}
            ]
        });
        assert!((symbol_filter_value(&info, "LOT_SIZE", "stepSize").unwrap() - 0.001).abs() < 1e-12);
        assert!((symbol_filter_value(&info, "PRICE_FILTER", "tickSize").unwrap() - 0.1).abs() < 1e-12);
        assert!(symbol_filter_value(&info, "MIN_NOTIONAL", "notional").is_err());
    }

    #[test]
    fn debug_redacts_credentials() {
        let client = BinanceFuturesClient::new("my-key", "my-secret");
        let rendered = format!("{client:?}");
        assert!(!rendered.contains("my-key"));
        assert!(!rendered.contains("my-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
