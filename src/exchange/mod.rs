// =============================================================================
// Exchange façade — typed adapter over the venue's REST surface
// =============================================================================
//
// Everything the engine asks of the exchange goes through `ExchangeAdapter`.
// The production implementation is `binance::BinanceFuturesClient`; tests
// substitute the scripted `mock::MockExchange`.
//
// Business errors the engine must distinguish (invalid symbol, no position
// to reduce) surface as a typed `ApiError` inside the `anyhow` chain; use
// the `is_*_error` helpers rather than matching message text at call sites.
// =============================================================================

pub mod binance;
pub mod precision;

#[cfg(test)]
pub mod mock;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::market_data::{Candle, FundingQuote};
use crate::types::Direction;

// ---------------------------------------------------------------------------
// Typed error
// ---------------------------------------------------------------------------

/// Exchange business error (non-2xx with a machine-readable code).
#[derive(Debug, Clone, Error)]
#[error("exchange error {code}: {msg}")]
pub struct ApiError {
    pub code: i64,
    pub msg: String,
}

/// Unknown / delisted instrument.
const CODE_INVALID_SYMBOL: i64 = -1121;
/// Reduce-only order rejected — nothing left to reduce.
const CODE_REDUCE_ONLY_REJECT: i64 = -2022;
/// Position side mismatch / position does not exist.
const CODE_NO_POSITION: i64 = -4164;

pub fn as_api_error(err: &anyhow::Error) -> Option<&ApiError> {
    err.downcast_ref::<ApiError>()
}

/// The venue does not know this instrument; suppress it from future polls.
pub fn is_unknown_symbol_error(err: &anyhow::Error) -> bool {
    as_api_error(err).is_some_and(|e| e.code == CODE_INVALID_SYMBOL)
}

/// A reduce failed because the position is already gone on the exchange —
/// the external-close path.
pub fn is_no_position_error(err: &anyhow::Error) -> bool {
    as_api_error(err)
        .is_some_and(|e| e.code == CODE_REDUCE_ONLY_REJECT || e.code == CODE_NO_POSITION)
}

// ---------------------------------------------------------------------------
// Order models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Limit => write!(f, "LIMIT"),
            Self::Market => write!(f, "MARKET"),
        }
    }
}

/// New-order request. `price` is required for limit orders; market orders
/// ignore it.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    /// "BUY" or "SELL".
    pub side: String,
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: Option<f64>,
    pub reduce_only: bool,
    /// Time in force for limit orders, e.g. "GTC".
    pub tif: String,
}

impl OrderRequest {
    pub fn limit(symbol: &str, side: &str, quantity: f64, price: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: side.to_string(),
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            reduce_only: false,
            tif: "GTC".to_string(),
        }
    }

    pub fn market_reduce(symbol: &str, side: &str, quantity: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: side.to_string(),
            order_type: OrderType::Market,
            quantity,
            price: None,
            reduce_only: true,
            tif: "GTC".to_string(),
        }
    }
}

/// Exchange-side order state as reported by `query_order`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
    Rejected,
}

impl OrderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Expired | Self::Rejected)
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "NEW" => Some(Self::New),
            "PARTIALLY_FILLED" => Some(Self::PartiallyFilled),
            "FILLED" => Some(Self::Filled),
            "CANCELED" => Some(Self::Canceled),
            "EXPIRED" => Some(Self::Expired),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderInfo {
    pub order_id: String,
    pub state: OrderState,
    pub executed_qty: f64,
    /// Average fill price; zero while nothing is filled.
    pub avg_price: f64,
}

/// Combined TP + SL placement. Both legs are reduce-only trigger orders on
/// the closing side; quantities may differ (TP half, SL full).
#[derive(Debug, Clone)]
pub struct TpSlRequest {
    pub symbol: String,
    /// Closing side: "SELL" for longs, "BUY" for shorts.
    pub side: String,
    pub tp_quantity: f64,
    pub sl_quantity: f64,
    pub tp_trigger: f64,
    pub sl_trigger: f64,
}

#[derive(Debug, Clone, Default)]
pub struct TpSlOrderIds {
    pub tp_order_id: Option<String>,
    pub sl_order_id: Option<String>,
}

/// Trigger-order kind as seen in the open-orders list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlgoKind {
    Stop,
    TakeProfit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgoOrder {
    pub order_id: String,
    pub kind: AlgoKind,
    pub trigger_price: f64,
    pub quantity: f64,
    /// Exchange-managed close-the-whole-position flag; the engine never sets
    /// it and the watchdog cancels orders that carry it.
    pub close_position: bool,
}

// ---------------------------------------------------------------------------
// Market / account models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookTicker {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LotSizeInfo {
    /// Quantity step; all order quantities must be multiples of this.
    pub step: f64,
    pub min_qty: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: String,
    pub direction: Direction,
    /// Absolute remaining quantity.
    pub quantity: f64,
    pub entry_price: f64,
    pub unrealized_pnl: f64,
}

// ---------------------------------------------------------------------------
// The façade
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    // Market data
    async fn get_funding_all(&self) -> Result<Vec<FundingQuote>>;
    async fn get_book_ticker_all(&self) -> Result<Vec<BookTicker>>;
    async fn get_open_interest(&self, symbol: &str) -> Result<f64>;
    async fn get_historical_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>>;
    async fn get_symbol_price(&self, symbol: &str) -> Result<f64>;

    // Account
    async fn get_available_balance(&self) -> Result<f64>;
    async fn get_open_positions(&self) -> Result<Vec<ExchangePosition>>;
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()>;

    // Orders
    async fn create_order(&self, request: OrderRequest) -> Result<String>;
    async fn query_order(&self, symbol: &str, order_id: &str) -> Result<OrderInfo>;
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()>;

    // Protective (trigger) orders
    async fn create_tp_sl_order(&self, request: TpSlRequest) -> Result<TpSlOrderIds>;
    async fn cancel_all_algo_orders(&self, symbol: &str) -> Result<()>;
    async fn get_open_algo_orders(&self, symbol: &str) -> Result<Vec<AlgoOrder>>;

    // Instrument metadata
    async fn get_lot_size_info(&self, symbol: &str) -> Result<LotSizeInfo>;
    async fn get_tick_size(&self, symbol: &str) -> Result<f64>;
}
