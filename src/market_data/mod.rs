// =============================================================================
// Market data plane — candle types, store, aggregator, stream, aux poller
// =============================================================================

pub mod aggregator;
pub mod aux_poller;
pub mod store;
pub mod stream;

pub use aggregator::{CandleAggregator, CandleSubscriber};
pub use store::{FundingQuote, MarketDataStore, OiQuote, SpreadQuote};

use serde::{Deserialize, Serialize};

/// A closed OHLCV bar for one (symbol, interval).
///
/// Candles are immutable once stored; the in-progress bar lives only in the
/// store's current-candle map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time in epoch milliseconds.
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(open_time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Signed body: positive for up bars.
    pub fn body(&self) -> f64 {
        self.close - self.open
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// OHLC sanity: low ≤ min(open, close) ≤ max(open, close) ≤ high,
    /// volume ≥ 0, everything finite.
    pub fn is_valid(&self) -> bool {
        let finite = [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| v.is_finite());
        finite
            && self.volume >= 0.0
            && self.low <= self.open.min(self.close)
            && self.open.max(self.close) <= self.high
    }
}

/// Composite key identifying one candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandleKey {
    pub symbol: String,
    pub interval: String,
}

impl CandleKey {
    pub fn new(symbol: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            interval: interval.into(),
        }
    }
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}
