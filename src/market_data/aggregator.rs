// =============================================================================
// CandleAggregator — closed-bar intake and fan-out
// =============================================================================
//
// Single entry point for closed candles regardless of origin (stream or REST
// warm-up). Each bar is validated, written to the store (which handles
// dedup, ring bound and TTL), then fanned out to registered subscribers —
// the strategy intake hangs off this hook.
// =============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{Candle, CandleKey, MarketDataStore};

/// Receives every accepted closed candle. Implementations must be cheap and
/// non-blocking; heavy work belongs on the subscriber's own task.
pub trait CandleSubscriber: Send + Sync {
    fn on_candle_close(&self, symbol: &str, interval: &str, candle: &Candle);
}

pub struct CandleAggregator {
    store: Arc<MarketDataStore>,
    subscribers: RwLock<Vec<Arc<dyn CandleSubscriber>>>,
}

impl CandleAggregator {
    pub fn new(store: Arc<MarketDataStore>) -> Self {
        Self {
            store,
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Register a subscriber for all future closed candles.
    pub fn subscribe(&self, subscriber: Arc<dyn CandleSubscriber>) {
        self.subscribers.write().push(subscriber);
    }

    /// Ingest one closed candle: validate, store, fan out.
    ///
    /// Malformed bars (broken OHLC ordering, negative volume, non-finite
    /// fields) are logged and dropped — one bad frame must not poison the
    /// series.
    pub fn on_candle_close(&self, symbol: &str, interval: &str, candle: Candle) {
        if !candle.is_valid() {
            warn!(symbol, interval, ?candle, "invalid candle dropped");
            return;
        }

        let key = CandleKey::new(symbol, interval);
        debug!(key = %key, open_time = candle.open_time, close = candle.close, "candle closed");
        self.store.put_candle(key, candle.clone());

        let subscribers = self.subscribers.read().clone();
        for subscriber in subscribers {
            subscriber.on_candle_close(symbol, interval, &candle);
        }
    }
}
