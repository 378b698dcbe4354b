// =============================================================================
// MockExchange — scripted test double behind the ExchangeAdapter seam
// =============================================================================
//
// Tests set up `MockState` (prices, balances, fill behavior, failure flags),
// run the component under test, then assert on the recorded call log. All
// state lives behind one mutex so scenario steps can mutate it mid-test.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::market_data::{Candle, FundingQuote};

use super::{
    AlgoKind, AlgoOrder, ApiError, BookTicker, ExchangeAdapter, ExchangePosition, LotSizeInfo,
    OrderInfo, OrderRequest, OrderState, OrderType, TpSlOrderIds, TpSlRequest,
};

pub struct MockState {
    next_id: u64,

    // Scripted world
    pub balance: f64,
    pub prices: HashMap<String, f64>,
    pub funding: Vec<FundingQuote>,
    pub book: Vec<BookTicker>,
    pub open_interest: HashMap<String, f64>,
    pub unknown_symbols: HashSet<String>,
    pub history: HashMap<(String, String), Vec<Candle>>,
    pub exchange_positions: Vec<ExchangePosition>,
    pub lot: LotSizeInfo,
    pub tick: f64,

    // Behavior switches
    pub fill_entries_immediately: bool,
    pub reject_reduce_no_position: bool,
    pub fail_next_create: Option<ApiError>,
    pub fail_algo_list: bool,

    // Live order book (exchange side)
    pub orders: HashMap<String, OrderInfo>,
    pub algo_orders: HashMap<String, Vec<AlgoOrder>>,

    // Call log
    pub submitted: Vec<OrderRequest>,
    pub tp_sl_requests: Vec<TpSlRequest>,
    pub cancelled_orders: Vec<String>,
    pub cancel_all_calls: Vec<String>,
    pub leverage_calls: Vec<(String, u32)>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            next_id: 1,
            balance: 10_000.0,
            prices: HashMap::new(),
            funding: Vec::new(),
            book: Vec::new(),
            open_interest: HashMap::new(),
            unknown_symbols: HashSet::new(),
            history: HashMap::new(),
            exchange_positions: Vec::new(),
            lot: LotSizeInfo {
                step: 0.001,
                min_qty: 0.001,
            },
            tick: 0.1,
            fill_entries_immediately: false,
            reject_reduce_no_position: false,
            fail_next_create: None,
            fail_algo_list: false,
            orders: HashMap::new(),
            algo_orders: HashMap::new(),
            submitted: Vec::new(),
            tp_sl_requests: Vec::new(),
            cancelled_orders: Vec::new(),
            cancel_all_calls: Vec::new(),
            leverage_calls: Vec::new(),
        }
    }
}

pub struct MockExchange {
    pub state: Mutex<MockState>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn with_price(symbol: &str, price: f64) -> Self {
        let mock = Self::new();
        mock.state.lock().prices.insert(symbol.to_string(), price);
        mock
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.state.lock().prices.insert(symbol.to_string(), price);
    }

    /// Mark an exchange-side order as fully filled at `price`.
    pub fn fill_order(&self, order_id: &str, price: f64, quantity: f64) {
        let mut state = self.state.lock();
        if let Some(info) = state.orders.get_mut(order_id) {
            info.state = OrderState::Filled;
            info.avg_price = price;
            info.executed_qty = quantity;
        }
    }
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeAdapter for MockExchange {
    async fn get_funding_all(&self) -> Result<Vec<FundingQuote>> {
        Ok(self.state.lock().funding.clone())
    }

    async fn get_book_ticker_all(&self) -> Result<Vec<BookTicker>> {
        Ok(self.state.lock().book.clone())
    }

    async fn get_open_interest(&self, symbol: &str) -> Result<f64> {
        let state = self.state.lock();
        if state.unknown_symbols.contains(symbol) {
            return Err(ApiError {
                code: -1121,
                msg: "Invalid symbol.".into(),
            }
            .into());
        }
        state
            .open_interest
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no scripted open interest for {symbol}"))
    }

    async fn get_historical_candles(
        &self,
        symbol: &str,
        interval: &str,
        _limit: u32,
    ) -> Result<Vec<Candle>> {
        Ok(self
            .state
            .lock()
            .history
            .get(&(symbol.to_string(), interval.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_symbol_price(&self, symbol: &str) -> Result<f64> {
        self.state
            .lock()
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no scripted price for {symbol}"))
    }

    async fn get_available_balance(&self) -> Result<f64> {
        Ok(self.state.lock().balance)
    }

    async fn get_open_positions(&self) -> Result<Vec<ExchangePosition>> {
        Ok(self.state.lock().exchange_positions.clone())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        self.state
            .lock()
            .leverage_calls
            .push((symbol.to_string(), leverage));
        Ok(())
    }

    async fn create_order(&self, request: OrderRequest) -> Result<String> {
        let mut state = self.state.lock();

        if let Some(err) = state.fail_next_create.take() {
            return Err(err.into());
        }
        if request.reduce_only && state.reject_reduce_no_position {
            return Err(ApiError {
                code: -2022,
                msg: "ReduceOnly Order is rejected.".into(),
            }
            .into());
        }

        let order_id = state.next_id.to_string();
        state.next_id += 1;

        let filled_now = request.order_type == OrderType::Market
            || (state.fill_entries_immediately && !request.reduce_only);
        let fill_price = request
            .price
            .or_else(|| state.prices.get(&request.symbol).copied())
            .unwrap_or(0.0);

        state.orders.insert(
            order_id.clone(),
            OrderInfo {
                order_id: order_id.clone(),
                state: if filled_now {
                    OrderState::Filled
                } else {
                    OrderState::New
                },
                executed_qty: if filled_now { request.quantity } else { 0.0 },
                avg_price: if filled_now { fill_price } else { 0.0 },
            },
        );
        state.submitted.push(request);
        Ok(order_id)
    }

    async fn query_order(&self, _symbol: &str, order_id: &str) -> Result<OrderInfo> {
        self.state
            .lock()
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown order {order_id}"))
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(info) = state.orders.get_mut(order_id) {
            info.state = OrderState::Canceled;
        }
        state.cancelled_orders.push(order_id.to_string());
        Ok(())
    }

    async fn create_tp_sl_order(&self, request: TpSlRequest) -> Result<TpSlOrderIds> {
        let mut state = self.state.lock();

        let tp_id = state.next_id.to_string();
        let sl_id = (state.next_id + 1).to_string();
        state.next_id += 2;

        let algos = state.algo_orders.entry(request.symbol.clone()).or_default();
        algos.push(AlgoOrder {
            order_id: tp_id.clone(),
            kind: AlgoKind::TakeProfit,
            trigger_price: request.tp_trigger,
            quantity: request.tp_quantity,
            close_position: false,
        });
        algos.push(AlgoOrder {
            order_id: sl_id.clone(),
            kind: AlgoKind::Stop,
            trigger_price: request.sl_trigger,
            quantity: request.sl_quantity,
            close_position: false,
        });

        state.tp_sl_requests.push(request);
        Ok(TpSlOrderIds {
            tp_order_id: Some(tp_id),
            sl_order_id: Some(sl_id),
        })
    }

    async fn cancel_all_algo_orders(&self, symbol: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.algo_orders.remove(symbol);
        state.cancel_all_calls.push(symbol.to_string());
        Ok(())
    }

    async fn get_open_algo_orders(&self, symbol: &str) -> Result<Vec<AlgoOrder>> {
        let state = self.state.lock();
        if state.fail_algo_list {
            anyhow::bail!("scripted algo-list failure");
        }
        Ok(state.algo_orders.get(symbol).cloned().unwrap_or_default())
    }

    async fn get_lot_size_info(&self, _symbol: &str) -> Result<LotSizeInfo> {
        Ok(self.state.lock().lot)
    }

    async fn get_tick_size(&self, _symbol: &str) -> Result<f64> {
        Ok(self.state.lock().tick)
    }
}
