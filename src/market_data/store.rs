// =============================================================================
// MarketDataStore — the single writable cache for candles and aux quotes
// =============================================================================
//
// Writers: the candle aggregator (closed bars, current bars, mark prices) and
// the aux poller (funding / OI / spread). Everyone else reads snapshots.
//
// Candle rings are bounded (`max_candles` per key) and aged out relative to
// the newest bar in the ring (`candle_ttl_ms`), so a stalled series cannot
// feed the scanner 6-hour-old data. Aux quotes carry a wall-clock TTL.
//
// Lookups clone small snapshots out under a short read lock; no reference to
// the underlying collections ever escapes.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::OiDirection;

use super::{Candle, CandleKey};

/// Funding snapshot for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingQuote {
    pub symbol: String,
    /// Funding rate as a decimal (0.0001 = 0.01 %).
    pub rate: f64,
    /// Epoch ms of the next funding event.
    pub next_funding_time: i64,
    pub mark_price: f64,
    pub index_price: f64,
}

/// Open-interest snapshot for one symbol, with change vs the previous poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OiQuote {
    pub symbol: String,
    pub value: f64,
    pub change: f64,
    pub change_pct: f64,
    pub direction: OiDirection,
}

/// Top-of-book snapshot for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpreadQuote {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub mid: f64,
    pub spread: f64,
    /// Spread as a fraction of mid.
    pub spread_pct: f64,
}

impl SpreadQuote {
    /// Build from raw top-of-book; `None` when either side is degenerate.
    pub fn from_book(symbol: &str, bid: f64, ask: f64) -> Option<Self> {
        if bid <= 0.0 || ask <= 0.0 || !bid.is_finite() || !ask.is_finite() {
            return None;
        }
        let mid = (bid + ask) / 2.0;
        let spread = ask - bid;
        Some(Self {
            symbol: symbol.to_string(),
            bid,
            ask,
            mid,
            spread,
            spread_pct: spread / mid,
        })
    }
}

struct Stamped<T> {
    value: T,
    at: Instant,
}

// =============================================================================
// Store
// =============================================================================

pub struct MarketDataStore {
    candles: RwLock<HashMap<CandleKey, VecDeque<Candle>>>,
    current: RwLock<HashMap<CandleKey, Candle>>,
    mark_prices: RwLock<HashMap<String, f64>>,
    funding: RwLock<HashMap<String, Stamped<FundingQuote>>>,
    oi: RwLock<HashMap<String, Stamped<OiQuote>>>,
    spread: RwLock<HashMap<String, Stamped<SpreadQuote>>>,

    max_candles: usize,
    candle_ttl_ms: i64,
    aux_ttl: Duration,
}

/// Ring bound per (symbol, interval).
const DEFAULT_MAX_CANDLES: usize = 50;
/// Candles older than this relative to the newest bar are aged out.
const DEFAULT_CANDLE_TTL_MS: i64 = 6 * 60 * 60 * 1000;
/// Aux quotes (funding / OI / spread) are stale after this.
const DEFAULT_AUX_TTL: Duration = Duration::from_secs(120);

impl MarketDataStore {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_CANDLES, DEFAULT_CANDLE_TTL_MS, DEFAULT_AUX_TTL)
    }

    pub fn with_limits(max_candles: usize, candle_ttl_ms: i64, aux_ttl: Duration) -> Self {
        Self {
            candles: RwLock::new(HashMap::new()),
            current: RwLock::new(HashMap::new()),
            mark_prices: RwLock::new(HashMap::new()),
            funding: RwLock::new(HashMap::new()),
            oi: RwLock::new(HashMap::new()),
            spread: RwLock::new(HashMap::new()),
            max_candles,
            candle_ttl_ms,
            aux_ttl,
        }
    }

    // -------------------------------------------------------------------------
    // Candles
    // -------------------------------------------------------------------------

    /// Insert a closed candle, keeping the ring ordered, bounded, and aged.
    ///
    /// * Same open time as the newest bar → the bar is replaced.
    /// * Older open time → dropped (the series is strictly increasing).
    /// * Ring trimmed to `max_candles`; bars older than `candle_ttl_ms`
    ///   relative to the newest bar are evicted.
    pub fn put_candle(&self, key: CandleKey, candle: Candle) {
        let mut map = self.candles.write();
        let ring = map
            .entry(key.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.max_candles + 1));

        if let Some(last) = ring.back() {
            if candle.open_time < last.open_time {
                warn!(
                    key = %key,
                    incoming = candle.open_time,
                    newest = last.open_time,
                    "out-of-order candle dropped"
                );
                return;
            }
            if candle.open_time == last.open_time {
                ring.pop_back();
            }
        }

        let newest_open = candle.open_time;
        ring.push_back(candle);

        while ring.len() > self.max_candles {
            ring.pop_front();
        }
        while ring
            .front()
            .is_some_and(|c| newest_open - c.open_time > self.candle_ttl_ms)
        {
            ring.pop_front();
        }
    }

    /// Most recent `count` closed candles, oldest first.
    pub fn window(&self, key: &CandleKey, count: usize) -> Vec<Candle> {
        let map = self.candles.read();
        match map.get(key) {
            Some(ring) => {
                let start = ring.len().saturating_sub(count);
                ring.iter().skip(start).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Close price of the newest stored bar, if any.
    pub fn last_close(&self, key: &CandleKey) -> Option<f64> {
        self.candles.read().get(key).and_then(|r| r.back()).map(|c| c.close)
    }

    pub fn candle_count(&self, key: &CandleKey) -> usize {
        self.candles.read().get(key).map_or(0, VecDeque::len)
    }

    // -------------------------------------------------------------------------
    // In-progress bars and mark prices
    // -------------------------------------------------------------------------

    pub fn set_current_candle(&self, key: CandleKey, candle: Candle) {
        self.current.write().insert(key, candle);
    }

    pub fn current_candle(&self, key: &CandleKey) -> Option<Candle> {
        self.current.read().get(key).cloned()
    }

    pub fn set_mark_price(&self, symbol: &str, price: f64) {
        if price > 0.0 && price.is_finite() {
            self.mark_prices.write().insert(symbol.to_string(), price);
        }
    }

    pub fn mark_price(&self, symbol: &str) -> Option<f64> {
        self.mark_prices.read().get(symbol).copied()
    }

    // -------------------------------------------------------------------------
    // Aux quotes (TTL-guarded)
    // -------------------------------------------------------------------------

    pub fn put_funding(&self, quote: FundingQuote) {
        self.funding.write().insert(
            quote.symbol.clone(),
            Stamped {
                value: quote,
                at: Instant::now(),
            },
        );
    }

    pub fn funding(&self, symbol: &str) -> Option<FundingQuote> {
        self.fresh(&self.funding, symbol)
    }

    pub fn put_oi(&self, quote: OiQuote) {
        self.oi.write().insert(
            quote.symbol.clone(),
            Stamped {
                value: quote,
                at: Instant::now(),
            },
        );
    }

    pub fn oi(&self, symbol: &str) -> Option<OiQuote> {
        self.fresh(&self.oi, symbol)
    }

    pub fn put_spread(&self, quote: SpreadQuote) {
        self.spread.write().insert(
            quote.symbol.clone(),
            Stamped {
                value: quote,
                at: Instant::now(),
            },
        );
    }

    pub fn spread(&self, symbol: &str) -> Option<SpreadQuote> {
        self.fresh(&self.spread, symbol)
    }

    fn fresh<T: Clone>(&self, map: &RwLock<HashMap<String, Stamped<T>>>, symbol: &str) -> Option<T> {
        let guard = map.read();
        let entry = guard.get(symbol)?;
        if entry.at.elapsed() > self.aux_ttl {
            return None;
        }
        Some(entry.value.clone())
    }
}

impl Default for MarketDataStore {
    fn default() -> Self {
        Self::new()
    }
}
