// =============================================================================
// Engine — control plane tying the three planes together
// =============================================================================
//
// `start_trading` (idempotent): snapshot the watchlist, warm the candle
// cache over REST for both timeframes, then launch the market stream and
// the four periodic tasks (aux poll @:00, scan @:30, coordinator tick @10 s,
// watchdog @15 s) under one shutdown channel.
//
// `stop_trading` (idempotent): flip the shutdown channel, close the stream,
// drop the in-memory tables. Exchange-side orders are left untouched; the
// watchdog reconciles them on the next start.
//
// A `StreamLost` event flips the engine into Degraded: positions keep being
// managed but no new entries are taken until an operator stops/starts.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::BotConfig;
use crate::events::{EngineEvent, EventBus, MemoryAudit, PositionEvent, SignalEvent};
use crate::exchange::ExchangeAdapter;
use crate::market_data::aux_poller::AuxPoller;
use crate::market_data::stream::{ExchangeStream, Subscription};
use crate::market_data::{CandleAggregator, CandleKey, MarketDataStore};
use crate::order::{OrderCoordinator, OrderWatchdog, Position, PositionBook};
use crate::risk::{RiskGate, RiskLedger};
use crate::signal::{OrbStrategy, Signal, SignalEngine, Strategy, StrategyIntake};
use crate::types::EngineState;

/// Closed bars fetched per (symbol, timeframe) during warm-up.
const WARMUP_CANDLES: u32 = 50;

// ---------------------------------------------------------------------------
// Status types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusCounters {
    pub watchlist: usize,
    pub open_positions: usize,
    pub pending_orders: usize,
    pub active_signals: usize,
    pub stream_connected: bool,
    pub ledger: RiskLedger,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub since: DateTime<Utc>,
    pub reason: Option<String>,
    pub counters: StatusCounters,
}

struct StateInner {
    state: EngineState,
    since: DateTime<Utc>,
    reason: Option<String>,
}

/// Everything launched by one `start_trading` call.
struct Session {
    shutdown: watch::Sender<bool>,
    stream: ExchangeStream,
    tasks: Vec<JoinHandle<()>>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    config: Arc<BotConfig>,
    adapter: Arc<dyn ExchangeAdapter>,
    store: Arc<MarketDataStore>,
    aggregator: Arc<CandleAggregator>,
    signals: Arc<SignalEngine>,
    risk: Arc<RiskGate>,
    book: Arc<PositionBook>,
    audit: Arc<MemoryAudit>,
    bus: EventBus,
    watchlist: Arc<RwLock<Vec<String>>>,
    degraded: Arc<AtomicBool>,
    session: tokio::sync::Mutex<Option<Session>>,
    state: RwLock<StateInner>,
}

impl Engine {
    pub fn new(config: BotConfig, adapter: Arc<dyn ExchangeAdapter>) -> Arc<Self> {
        let config = Arc::new(config);
        let store = Arc::new(MarketDataStore::new());
        let aggregator = Arc::new(CandleAggregator::new(store.clone()));
        let watchlist: Arc<RwLock<Vec<String>>> = Arc::new(RwLock::new(Vec::new()));
        let signals = Arc::new(SignalEngine::new(
            store.clone(),
            config.clone(),
            watchlist.clone(),
        ));
        let risk = Arc::new(RiskGate::new(config.risk.clone()));
        let book = Arc::new(PositionBook::new());
        let audit = Arc::new(MemoryAudit::new());
        let bus = EventBus::new();

        // Strategy intake rides the aggregator fan-out; the ORB variant is
        // the one shipped strategy.
        let orb: Arc<dyn Strategy> =
            Arc::new(OrbStrategy::new(store.clone(), config.clone()));
        aggregator.subscribe(Arc::new(StrategyIntake::new(vec![orb], signals.clone())));

        Arc::new(Self {
            config,
            adapter,
            store,
            aggregator,
            signals,
            risk,
            book,
            audit,
            bus,
            watchlist,
            degraded: Arc::new(AtomicBool::new(false)),
            session: tokio::sync::Mutex::new(None),
            state: RwLock::new(StateInner {
                state: EngineState::Stopped,
                since: Utc::now(),
                reason: None,
            }),
        })
    }

    // -------------------------------------------------------------------------
    // Start / stop
    // -------------------------------------------------------------------------

    pub async fn start_trading(self: &Arc<Self>) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            info!("start_trading: already running");
            return Ok(());
        }

        let symbols = self.config.symbols.clone();
        *self.watchlist.write() = symbols.clone();
        self.degraded.store(false, Ordering::SeqCst);

        info!(symbols = ?symbols, "starting trading session");
        self.warm_candle_cache(&symbols).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let stream = ExchangeStream::spawn(
            self.config.stream_url.clone(),
            Subscription::new(symbols.clone(), self.intervals()),
            self.store.clone(),
            self.aggregator.clone(),
            self.bus.clone(),
        );

        let mut tasks = Vec::new();

        let poller = Arc::new(AuxPoller::new(
            self.adapter.clone(),
            self.store.clone(),
            self.watchlist.clone(),
        ));
        tasks.push(tokio::spawn(poller.run(shutdown_rx.clone())));

        tasks.push(tokio::spawn(self.signals.clone().run(shutdown_rx.clone())));

        let coordinator = Arc::new(OrderCoordinator::new(
            self.adapter.clone(),
            self.store.clone(),
            self.signals.clone(),
            self.risk.clone(),
            self.book.clone(),
            self.audit.clone(),
            self.bus.clone(),
            self.config.clone(),
            self.degraded.clone(),
        ));
        tasks.push(tokio::spawn(coordinator.run(shutdown_rx.clone())));

        let watchdog = Arc::new(OrderWatchdog::new(
            self.adapter.clone(),
            self.store.clone(),
            self.book.clone(),
            self.audit.clone(),
            self.bus.clone(),
        ));
        tasks.push(tokio::spawn(watchdog.run(shutdown_rx.clone())));

        tasks.push(tokio::spawn(Self::watch_stream_loss(
            self.clone(),
            shutdown_rx,
        )));

        *session = Some(Session {
            shutdown: shutdown_tx,
            stream,
            tasks,
        });

        *self.state.write() = StateInner {
            state: EngineState::Running,
            since: Utc::now(),
            reason: None,
        };
        info!("trading session started");
        Ok(())
    }

    pub async fn stop_trading(self: &Arc<Self>, reason: Option<String>) {
        let mut session = self.session.lock().await;
        let Some(active) = session.take() else {
            info!("stop_trading: not running");
            return;
        };

        info!(reason = reason.as_deref().unwrap_or("-"), "stopping trading session");

        let _ = active.shutdown.send(true);
        active.stream.shutdown().await;
        for task in active.tasks {
            task.abort();
        }

        // In-memory tables drop; exchange-side orders stay. The watchdog
        // prunes and rebuilds on the next start.
        self.book.clear();
        self.degraded.store(false, Ordering::SeqCst);

        *self.state.write() = StateInner {
            state: EngineState::Stopped,
            since: Utc::now(),
            reason,
        };
        info!("trading session stopped");
    }

    // -------------------------------------------------------------------------
    // Snapshots for the control surface
    // -------------------------------------------------------------------------

    pub fn status(&self) -> EngineStatus {
        let stream_connected = self
            .session
            .try_lock()
            .ok()
            .and_then(|session| session.as_ref().map(|s| s.stream.is_connected()))
            .unwrap_or(false);

        let state = self.state.read();
        EngineStatus {
            state: state.state,
            since: state.since,
            reason: state.reason.clone(),
            counters: StatusCounters {
                watchlist: self.watchlist.read().len(),
                open_positions: self.book.positions_snapshot().len(),
                pending_orders: self.book.pending_snapshot().len(),
                active_signals: self.signals.active_signals().len(),
                stream_connected,
                ledger: self.risk.ledger(),
            },
        }
    }

    pub fn active_signals(&self) -> Vec<Signal> {
        self.signals.active_signals()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.book.positions_snapshot()
    }

    pub fn audit_signals(&self) -> Vec<SignalEvent> {
        self.audit.signals()
    }

    pub fn audit_positions(&self) -> Vec<PositionEvent> {
        self.audit.positions()
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.bus.subscribe()
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn intervals(&self) -> Vec<String> {
        let mut intervals = vec![self.config.ltf_interval.clone()];
        if self.config.htf_interval != self.config.ltf_interval {
            intervals.push(self.config.htf_interval.clone());
        }
        intervals
    }

    /// Seed the candle store over REST so the first scan has full windows.
    /// History goes straight into the store — strategies only see live bars.
    async fn warm_candle_cache(&self, symbols: &[String]) {
        for symbol in symbols {
            for interval in self.intervals() {
                match self
                    .adapter
                    .get_historical_candles(symbol, &interval, WARMUP_CANDLES)
                    .await
                {
                    Ok(candles) => {
                        let key = CandleKey::new(symbol.as_str(), interval.as_str());
                        let count = candles.len();
                        for candle in candles.into_iter().filter(|c| c.is_valid()) {
                            self.store.put_candle(key.clone(), candle);
                        }
                        info!(symbol, interval, count, "candle cache warmed");
                    }
                    Err(e) => {
                        warn!(symbol, interval, error = %e, "candle warm-up failed");
                    }
                }
            }
        }
    }

    /// Flip into Degraded when the stream reports itself lost.
    async fn watch_stream_loss(engine: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut events = engine.bus.subscribe();
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(EngineEvent::StreamLost { reason }) => {
                            error!(reason = %reason, "market stream lost — engine degraded");
                            engine.degraded.store(true, Ordering::SeqCst);
                            let mut state = engine.state.write();
                            state.state = EngineState::Degraded;
                            state.reason = Some(reason);
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
    }
}
