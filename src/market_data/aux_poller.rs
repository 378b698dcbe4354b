// =============================================================================
// AuxPoller — once-a-minute REST collector for funding / spread / OI
// =============================================================================
//
// Aligned to second 0 so the signal scanner (second 30) always reads quotes
// at most half a minute old. Funding and top-of-book come from one bulk call
// each; open interest is a per-symbol endpoint polled sequentially with a
// small gap to stay inside the venue's rate limits.
//
// Symbols the venue reports as unknown are suppressed for the remainder of
// the process; a failure in one sub-task never aborts the others.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::exchange::{is_unknown_symbol_error, ExchangeAdapter};
use crate::sched::align_to_minute_second;
use crate::types::OiDirection;

use super::{MarketDataStore, OiQuote, SpreadQuote};

/// Gap between per-symbol open-interest calls.
const OI_CALL_GAP: Duration = Duration::from_millis(250);
/// Relative OI change below this reads as FLAT.
const OI_FLAT_THRESHOLD: f64 = 1e-4;

pub struct AuxPoller {
    adapter: Arc<dyn ExchangeAdapter>,
    store: Arc<MarketDataStore>,
    watchlist: Arc<RwLock<Vec<String>>>,
    last_oi: Mutex<HashMap<String, f64>>,
    suppressed: Mutex<HashSet<String>>,
}

impl AuxPoller {
    pub fn new(
        adapter: Arc<dyn ExchangeAdapter>,
        store: Arc<MarketDataStore>,
        watchlist: Arc<RwLock<Vec<String>>>,
    ) -> Self {
        Self {
            adapter,
            store,
            watchlist,
            last_oi: Mutex::new(HashMap::new()),
            suppressed: Mutex::new(HashSet::new()),
        }
    }

    /// Run aligned to second 0 of every minute until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        align_to_minute_second(0).await;
        info!("aux poller aligned to :00");

        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.poll_once().await,
                _ = shutdown.changed() => {
                    info!("aux poller stopped");
                    return;
                }
            }
        }
    }

    /// One full collection cycle. Public so tests can drive it directly.
    pub async fn poll_once(&self) {
        let symbols = self.watchlist.read().clone();
        if symbols.is_empty() {
            debug!("aux poll skipped — empty watchlist");
            return;
        }
        let wanted: HashSet<&str> = symbols.iter().map(String::as_str).collect();

        self.poll_funding(&wanted).await;
        self.poll_spread(&wanted).await;
        self.poll_open_interest(&symbols).await;
    }

    async fn poll_funding(&self, wanted: &HashSet<&str>) {
        match self.adapter.get_funding_all().await {
            Ok(quotes) => {
                let mut stored = 0usize;
                for quote in quotes {
                    if wanted.contains(quote.symbol.as_str()) {
                        self.store.put_funding(quote);
                        stored += 1;
                    }
                }
                debug!(stored, "funding quotes refreshed");
            }
            Err(e) => warn!(error = %e, "funding poll failed"),
        }
    }

    async fn poll_spread(&self, wanted: &HashSet<&str>) {
        match self.adapter.get_book_ticker_all().await {
            Ok(tickers) => {
                let mut stored = 0usize;
                for ticker in tickers {
                    if !wanted.contains(ticker.symbol.as_str()) {
                        continue;
                    }
                    // Degenerate books (bid or ask ≤ 0) are discarded here.
                    if let Some(quote) =
                        SpreadQuote::from_book(&ticker.symbol, ticker.bid, ticker.ask)
                    {
                        self.store.put_spread(quote);
                        stored += 1;
                    }
                }
                debug!(stored, "spread quotes refreshed");
            }
            Err(e) => warn!(error = %e, "spread poll failed"),
        }
    }

    async fn poll_open_interest(&self, symbols: &[String]) {
        for symbol in symbols {
            if self.suppressed.lock().contains(symbol) {
                continue;
            }

            match self.adapter.get_open_interest(symbol).await {
                Ok(value) => {
                    let previous = self.last_oi.lock().insert(symbol.clone(), value);
                    let (change, change_pct) = match previous {
                        Some(prev) if prev > 0.0 => (value - prev, (value - prev) / prev),
                        _ => (0.0, 0.0),
                    };
                    let direction = if change_pct > OI_FLAT_THRESHOLD {
                        OiDirection::Up
                    } else if change_pct < -OI_FLAT_THRESHOLD {
                        OiDirection::Down
                    } else {
                        OiDirection::Flat
                    };
                    self.store.put_oi(OiQuote {
                        symbol: symbol.clone(),
                        value,
                        change,
                        change_pct,
                        direction,
                    });
                }
                Err(e) => {
                    if is_unknown_symbol_error(&e) {
                        warn!(symbol, "open interest: unknown instrument — suppressing");
                        self.suppressed.lock().insert(symbol.clone());
                    } else {
                        warn!(symbol, error = %e, "open interest poll failed");
                    }
                }
            }

            tokio::time::sleep(OI_CALL_GAP).await;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::mock::MockExchange;
    use crate::exchange::BookTicker;
    use crate::market_data::FundingQuote;

    fn watchlist(symbols: &[&str]) -> Arc<RwLock<Vec<String>>> {
        Arc::new(RwLock::new(symbols.iter().map(|s| s.to_string()).collect()))
    }

    fn poller(
        mock: Arc<MockExchange>,
        store: Arc<MarketDataStore>,
        symbols: &[&str],
    ) -> AuxPoller {
        AuxPoller::new(mock, store, watchlist(symbols))
    }

    #[tokio::test]
    async fn funding_and_spread_land_for_watchlist_only() {
        let mock = Arc::new(MockExchange::new());
        {
            let mut state = mock.state.lock();
            state.funding = vec![
                FundingQuote {
                    symbol: "BTCUSDT".into(),
                    rate: 0.0001,
                    next_funding_time: 0,
                    mark_price: 50_000.0,
                    index_price: 50_000.0,
                },
                FundingQuote {
                    symbol: "OTHERUSDT".into(),
                    rate: 0.0009,
                    next_funding_time: 0,
                    mark_price: 1.0,
                    index_price: 1.0,
                },
            ];
            state.book = vec![
                BookTicker {
                    symbol: "BTCUSDT".into(),
                    bid: 49_999.9,
                    ask: 50_000.1,
                },
                // Degenerate row must be discarded.
                BookTicker {
                    symbol: "BTCUSDT".into(),
                    bid: 0.0,
                    ask: 50_000.1,
                },
            ];
            state.open_interest.insert("BTCUSDT".into(), 1_000.0);
        }
        let store = Arc::new(MarketDataStore::new());
        let poller = poller(mock, store.clone(), &["BTCUSDT"]);

        poller.poll_once().await;

        assert!(store.funding("BTCUSDT").is_some());
        assert!(store.funding("OTHERUSDT").is_none());
        let spread = store.spread("BTCUSDT").unwrap();
        assert!((spread.bid - 49_999.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn oi_direction_tracks_change_across_cycles() {
        let mock = Arc::new(MockExchange::new());
        mock.state.lock().open_interest.insert("BTCUSDT".into(), 1_000.0);
        let store = Arc::new(MarketDataStore::new());
        let poller = poller(mock.clone(), store.clone(), &["BTCUSDT"]);

        poller.poll_once().await;
        let first = store.oi("BTCUSDT").unwrap();
        assert_eq!(first.direction, OiDirection::Flat);

        mock.state.lock().open_interest.insert("BTCUSDT".into(), 1_100.0);
        poller.poll_once().await;
        let second = store.oi("BTCUSDT").unwrap();
        assert_eq!(second.direction, OiDirection::Up);
        assert!((second.change - 100.0).abs() < 1e-9);
        assert!((second.change_pct - 0.1).abs() < 1e-9);

        mock.state.lock().open_interest.insert("BTCUSDT".into(), 900.0);
        poller.poll_once().await;
        assert_eq!(store.oi("BTCUSDT").unwrap().direction, OiDirection::Down);
    }

    #[tokio::test]
    async fn unknown_symbol_is_suppressed_for_good() {
        let mock = Arc::new(MockExchange::new());
        {
            let mut state = mock.state.lock();
            state.unknown_symbols.insert("GHOSTUSDT".into());
            state.open_interest.insert("BTCUSDT".into(), 500.0);
        }
        let store = Arc::new(MarketDataStore::new());
        let poller = poller(mock, store.clone(), &["GHOSTUSDT", "BTCUSDT"]);

        poller.poll_once().await;
        assert!(poller.suppressed.lock().contains("GHOSTUSDT"));
        // The good symbol still got its quote.
        assert!(store.oi("BTCUSDT").is_some());

        // Second cycle skips the ghost entirely and still works.
        poller.poll_once().await;
        assert!(store.oi("GHOSTUSDT").is_none());
    }

    #[tokio::test]
    async fn empty_watchlist_skips_cycle() {
        let mock = Arc::new(MockExchange::new());
        let store = Arc::new(MarketDataStore::new());
        let poller = poller(mock, store, &[]);
        // Must return quickly and do nothing rather than call the venue.
        poller.poll_once().await;
    }
}
