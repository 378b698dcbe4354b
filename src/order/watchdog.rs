// =============================================================================
// OrderWatchdog — periodic audit of exchange-side protective orders
// =============================================================================
//
// Every 15 s, for each in-memory position:
//   * a position the exchange no longer holds is removed (residual algo
//     orders cancelled) — the external-close path;
//   * invalid algo orders (zero quantity, close-position flag) are cancelled;
//   * the remaining set must be exactly one STOP + one TP with the expected
//     quantities (SL full, TP half pre-TP1 / full after) and triggers on the
//     correct side of mark, within ±½ lot and ±1.5 ticks;
//   * anything else is rebuilt: cancel all, place a fresh pair — throttled
//     by a ≥15 s per-symbol cooldown.
//
// Listing failures engage a 60 s per-symbol back-off so a rate-limited
// symbol is not hammered. The watchdog never transitions position state:
// its only mutations are stale removal and protective-order replacement.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::events::{AuditSink, EngineEvent, EventBus, PositionEvent};
use crate::exchange::precision::{floor_to_step, round_to_tick};
use crate::exchange::{AlgoKind, AlgoOrder, ExchangeAdapter, ExchangePosition, TpSlRequest};
use crate::market_data::MarketDataStore;
use crate::types::{Direction, ExitReason};

use super::{Position, PositionBook};

const AUDIT_PERIOD: Duration = Duration::from_secs(15);
/// Minimum gap between rebuilds of the same symbol.
const REBUILD_COOLDOWN: Duration = Duration::from_secs(15);
/// Back-off after a failed algo-order listing.
const LIST_FAILURE_BACKOFF: Duration = Duration::from_secs(60);
/// Quantity tolerance in lots.
const QTY_TOLERANCE_LOTS: f64 = 0.5;
/// Trigger-price tolerance in ticks.
const PRICE_TOLERANCE_TICKS: f64 = 1.5;
/// Wrong-side triggers are clamped this factor away from mark.
const MARK_CLAMP: f64 = 0.999;

pub struct OrderWatchdog {
    adapter: Arc<dyn ExchangeAdapter>,
    store: Arc<MarketDataStore>,
    book: Arc<PositionBook>,
    audit: Arc<dyn AuditSink>,
    bus: EventBus,
    rebuild_after: Mutex<HashMap<String, Instant>>,
    list_retry_after: Mutex<HashMap<String, Instant>>,
}

impl OrderWatchdog {
    pub fn new(
        adapter: Arc<dyn ExchangeAdapter>,
        store: Arc<MarketDataStore>,
        book: Arc<PositionBook>,
        audit: Arc<dyn AuditSink>,
        bus: EventBus,
    ) -> Self {
        Self {
            adapter,
            store,
            book,
            audit,
            bus,
            rebuild_after: Mutex::new(HashMap::new()),
            list_retry_after: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(AUDIT_PERIOD);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("order watchdog started");

        loop {
            tokio::select! {
                _ = ticker.tick() => self.audit_once().await,
                _ = shutdown.changed() => {
                    info!("order watchdog stopped");
                    return;
                }
            }
        }
    }

    /// One audit pass over every in-memory position.
    pub async fn audit_once(&self) {
        let positions = self.book.positions_snapshot();
        if positions.is_empty() {
            return;
        }

        let live = match self.adapter.get_open_positions().await {
            Ok(live) => live,
            Err(e) => {
                warn!(error = %e, "watchdog: live position fetch failed");
                return;
            }
        };

        for position in positions {
            if let Err(e) = self.audit_symbol(&position, &live).await {
                error!(symbol = %position.symbol, error = %e, "watchdog audit failed");
            }
        }
    }

    async fn audit_symbol(&self, position: &Position, live: &[ExchangePosition]) -> Result<()> {
        let symbol = position.symbol.as_str();

        // An in-flight entry owns the symbol; stay out of its way.
        if self.book.has_pending(symbol) {
            return Ok(());
        }

        // ── Stale check ─────────────────────────────────────────────────
        let live_qty = live
            .iter()
            .find(|l| l.symbol == symbol)
            .map(|l| l.quantity)
            .unwrap_or(0.0);
        if live_qty <= 0.0 {
            info!(symbol, "watchdog: exchange has no position — removing stale entry");
            if let Err(e) = self.adapter.cancel_all_algo_orders(symbol).await {
                warn!(symbol, error = %e, "residual algo cancel failed");
            }
            if let Some(removed) = self.book.remove_position(symbol) {
                self.audit
                    .position_closed(&removed.id, ExitReason::ExternalClose, None);
                self.bus.publish(EngineEvent::Position(PositionEvent {
                    id: removed.id.clone(),
                    symbol: removed.symbol.clone(),
                    direction: removed.direction,
                    entry_price: removed.entry_price,
                    quantity: removed.quantity,
                    leverage: removed.leverage,
                    tp_price: removed.tp_price,
                    sl_price: removed.sl_price,
                    open: false,
                    close_reason: Some(ExitReason::ExternalClose),
                    pnl_pct: None,
                    at: chrono::Utc::now(),
                }));
            }
            return Ok(());
        }

        // ── Algo listing (with per-symbol back-off) ─────────────────────
        if let Some(&until) = self.list_retry_after.lock().get(symbol) {
            if Instant::now() < until {
                return Ok(());
            }
        }
        let algos = match self.adapter.get_open_algo_orders(symbol).await {
            Ok(algos) => {
                self.list_retry_after.lock().remove(symbol);
                algos
            }
            Err(e) => {
                warn!(symbol, error = %e, "algo listing failed — backing off");
                self.list_retry_after
                    .lock()
                    .insert(symbol.to_string(), Instant::now() + LIST_FAILURE_BACKOFF);
                return Ok(());
            }
        };

        // ── Invalid order cleanup ───────────────────────────────────────
        let mut valid: Vec<AlgoOrder> = Vec::new();
        for algo in algos {
            if algo.quantity <= 0.0 || algo.close_position {
                warn!(symbol, order_id = %algo.order_id, "cancelling invalid algo order");
                if let Err(e) = self.adapter.cancel_order(symbol, &algo.order_id).await {
                    warn!(symbol, order_id = %algo.order_id, error = %e, "invalid algo cancel failed");
                }
            } else {
                valid.push(algo);
            }
        }

        // ── Expectation check ───────────────────────────────────────────
        let expected = self.expected_protection(position).await;
        if protection_matches(position, &valid, &expected) {
            debug!(symbol, "watchdog: protective orders aligned");
            return Ok(());
        }

        // ── Rebuild (throttled) ─────────────────────────────────────────
        {
            let rebuilds = self.rebuild_after.lock();
            if let Some(&after) = rebuilds.get(symbol) {
                if Instant::now() < after {
                    debug!(symbol, "watchdog: rebuild wanted but cooling down");
                    return Ok(());
                }
            }
        }

        warn!(
            symbol,
            stops = valid.iter().filter(|a| a.kind == AlgoKind::Stop).count(),
            tps = valid.iter().filter(|a| a.kind == AlgoKind::TakeProfit).count(),
            "watchdog: protective orders misaligned — rebuilding"
        );

        self.adapter
            .cancel_all_algo_orders(symbol)
            .await
            .context("rebuild: cancel-all failed")?;

        let ids = self
            .adapter
            .create_tp_sl_order(TpSlRequest {
                symbol: symbol.to_string(),
                side: position.direction.close_side().to_string(),
                tp_quantity: expected.tp_qty,
                sl_quantity: expected.sl_qty,
                tp_trigger: expected.tp_trigger,
                sl_trigger: expected.sl_trigger,
            })
            .await
            .context("rebuild: TP/SL placement failed")?;

        self.book.update_position(symbol, |p| {
            p.tp_order_id = ids.tp_order_id.clone();
            p.sl_order_id = ids.sl_order_id.clone();
        });
        self.rebuild_after
            .lock()
            .insert(symbol.to_string(), Instant::now() + REBUILD_COOLDOWN);

        info!(symbol, "watchdog: protective orders rebuilt");
        Ok(())
    }

    /// What the exchange *should* be holding for this position.
    async fn expected_protection(&self, position: &Position) -> ExpectedProtection {
        let symbol = position.symbol.as_str();

        let tp_qty = if position.tp1_filled || position.single_tp {
            position.quantity
        } else {
            floor_to_step(position.quantity * 0.5, position.lot_step)
        };
        let sl_qty = position.quantity;

        // Triggers clamped to the correct side of mark: SL strictly below
        // (long) / above (short), TP the mirror.
        let mark = match self.store.mark_price(symbol) {
            Some(mark) => mark,
            None => self
                .adapter
                .get_symbol_price(symbol)
                .await
                .unwrap_or(position.entry_price),
        };

        let (sl_trigger, tp_trigger) = match position.direction {
            Direction::Long => (
                if position.sl_price >= mark {
                    mark * MARK_CLAMP
                } else {
                    position.sl_price
                },
                if position.tp_price <= mark {
                    mark * (2.0 - MARK_CLAMP)
                } else {
                    position.tp_price
                },
            ),
            Direction::Short => (
                if position.sl_price <= mark {
                    mark * (2.0 - MARK_CLAMP)
                } else {
                    position.sl_price
                },
                if position.tp_price >= mark {
                    mark * MARK_CLAMP
                } else {
                    position.tp_price
                },
            ),
        };

        ExpectedProtection {
            tp_qty,
            sl_qty,
            tp_trigger: round_to_tick(tp_trigger, position.tick_size),
            sl_trigger: round_to_tick(sl_trigger, position.tick_size),
        }
    }
}

struct ExpectedProtection {
    tp_qty: f64,
    sl_qty: f64,
    tp_trigger: f64,
    sl_trigger: f64,
}

/// Exactly one STOP + one TP, quantities within ±½ lot, triggers within
/// ±1.5 ticks.
fn protection_matches(position: &Position, valid: &[AlgoOrder], expected: &ExpectedProtection) -> bool {
    let stops: Vec<&AlgoOrder> = valid.iter().filter(|a| a.kind == AlgoKind::Stop).collect();
    let tps: Vec<&AlgoOrder> = valid
        .iter()
        .filter(|a| a.kind == AlgoKind::TakeProfit)
        .collect();
    if stops.len() != 1 || tps.len() != 1 {
        return false;
    }

    let qty_tolerance = position.lot_step * QTY_TOLERANCE_LOTS;
    let price_tolerance = position.tick_size * PRICE_TOLERANCE_TICKS;

    (stops[0].quantity - expected.sl_qty).abs() <= qty_tolerance
        && (tps[0].quantity - expected.tp_qty).abs() <= qty_tolerance
        && (stops[0].trigger_price - expected.sl_trigger).abs() <= price_tolerance
        && (tps[0].trigger_price - expected.tp_trigger).abs() <= price_tolerance
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryAudit;
    use crate::exchange::mock::MockExchange;
    use crate::types::PositionStatus;
    use chrono::Utc;

    struct Harness {
        mock: Arc<MockExchange>,
        book: Arc<PositionBook>,
        watchdog: OrderWatchdog,
    }

    fn harness() -> Harness {
        let mock = Arc::new(MockExchange::with_price("BTCUSDT", 50_000.0));
        let store = Arc::new(MarketDataStore::new());
        store.set_mark_price("BTCUSDT", 50_000.0);
        let book = Arc::new(PositionBook::new());
        let watchdog = OrderWatchdog::new(
            mock.clone(),
            store,
            book.clone(),
            Arc::new(MemoryAudit::new()),
            EventBus::new(),
        );
        Harness {
            mock,
            book,
            watchdog,
        }
    }

    fn open_long(book: &PositionBook) -> Position {
        let position = Position {
            id: Position::new_id(),
            symbol: "BTCUSDT".into(),
            direction: Direction::Long,
            entry_price: 50_000.0,
            quantity: 0.004,
            initial_quantity: 0.004,
            leverage: 5,
            tp1_price: 50_250.0,
            tp2_price: 50_500.0,
            tp_price: 50_250.0,
            sl_price: 49_800.0,
            original_tp_distance: 250.0,
            tp1_filled: false,
            tp_reduced: false,
            single_tp: false,
            status: PositionStatus::Open,
            entered_at: Utc::now(),
            main_order_id: "m".into(),
            tp_order_id: None,
            sl_order_id: None,
            signal_id: "sig".into(),
            lot_step: 0.001,
            tick_size: 0.1,
        };
        book.open_position(position.clone());
        position
    }

    fn live_long(qty: f64) -> ExchangePosition {
        ExchangePosition {
            symbol: "BTCUSDT".into(),
            direction: Direction::Long,
            quantity: qty,
            entry_price: 50_000.0,
            unrealized_pnl: 0.0,
        }
    }

    // S5 — a lone, misplaced SL is replaced by a fresh TP1+SL pair; the
    // following pass sees expected == actual and does nothing.
    #[tokio::test]
    async fn s5_misaligned_protection_is_rebuilt_once() {
        let h = harness();
        open_long(&h.book);
        {
            let mut state = h.mock.state.lock();
            state.exchange_positions = vec![live_long(0.004)];
            state.algo_orders.insert(
                "BTCUSDT".into(),
                vec![AlgoOrder {
                    order_id: "99".into(),
                    kind: AlgoKind::Stop,
                    trigger_price: 49_500.0, // drifted
                    quantity: 0.004,
                    close_position: false,
                }],
            );
        }

        h.watchdog.audit_once().await;

        {
            let state = h.mock.state.lock();
            assert_eq!(state.cancel_all_calls, vec!["BTCUSDT".to_string()]);
            assert_eq!(state.tp_sl_requests.len(), 1);
            let pair = &state.tp_sl_requests[0];
            assert!((pair.tp_quantity - 0.002).abs() < 1e-12);
            assert!((pair.sl_quantity - 0.004).abs() < 1e-12);
            assert!((pair.tp_trigger - 50_250.0).abs() < 1e-9);
            assert!((pair.sl_trigger - 49_800.0).abs() < 1e-9);
        }
        // Order ids recorded on the position.
        let position = h.book.position("BTCUSDT").unwrap();
        assert!(position.tp_order_id.is_some());
        assert!(position.sl_order_id.is_some());

        // Second pass: the freshly placed pair matches — no further action.
        h.watchdog.audit_once().await;
        assert_eq!(h.mock.state.lock().tp_sl_requests.len(), 1);
    }

    #[tokio::test]
    async fn rebuild_cooldown_prevents_thrash() {
        let h = harness();
        open_long(&h.book);
        {
            let mut state = h.mock.state.lock();
            state.exchange_positions = vec![live_long(0.004)];
            state.algo_orders.insert("BTCUSDT".into(), Vec::new());
        }

        h.watchdog.audit_once().await;
        assert_eq!(h.mock.state.lock().tp_sl_requests.len(), 1);

        // Wipe the orders again: misaligned, but inside the cooldown.
        h.mock.state.lock().algo_orders.insert("BTCUSDT".into(), Vec::new());
        h.watchdog.audit_once().await;
        assert_eq!(h.mock.state.lock().tp_sl_requests.len(), 1);
    }

    #[tokio::test]
    async fn stale_position_is_removed_with_residual_orders() {
        let h = harness();
        open_long(&h.book);
        // Exchange shows nothing for the symbol.
        h.mock.state.lock().exchange_positions = Vec::new();

        h.watchdog.audit_once().await;

        assert!(h.book.position("BTCUSDT").is_none());
        assert_eq!(h.mock.state.lock().cancel_all_calls, vec!["BTCUSDT".to_string()]);
    }

    #[tokio::test]
    async fn invalid_algo_orders_are_cancelled_but_good_pair_stays() {
        let h = harness();
        open_long(&h.book);
        {
            let mut state = h.mock.state.lock();
            state.exchange_positions = vec![live_long(0.004)];
            state.algo_orders.insert(
                "BTCUSDT".into(),
                vec![
                    AlgoOrder {
                        order_id: "1".into(),
                        kind: AlgoKind::Stop,
                        trigger_price: 49_800.0,
                        quantity: 0.004,
                        close_position: false,
                    },
                    AlgoOrder {
                        order_id: "2".into(),
                        kind: AlgoKind::TakeProfit,
                        trigger_price: 50_250.0,
                        quantity: 0.002,
                        close_position: false,
                    },
                    // Zero-qty close-position order left by something else.
                    AlgoOrder {
                        order_id: "3".into(),
                        kind: AlgoKind::TakeProfit,
                        trigger_price: 50_600.0,
                        quantity: 0.0,
                        close_position: true,
                    },
                ],
            );
        }

        h.watchdog.audit_once().await;

        let state = h.mock.state.lock();
        assert!(state.cancelled_orders.contains(&"3".to_string()));
        // The healthy pair satisfied the expectation: no rebuild.
        assert!(state.tp_sl_requests.is_empty());
        assert!(state.cancel_all_calls.is_empty());
    }

    #[tokio::test]
    async fn listing_failure_backs_off_for_a_minute() {
        let h = harness();
        open_long(&h.book);
        {
            let mut state = h.mock.state.lock();
            state.exchange_positions = vec![live_long(0.004)];
            state.fail_algo_list = true;
        }

        h.watchdog.audit_once().await;
        assert!(h.mock.state.lock().tp_sl_requests.is_empty());

        // Listing works again, protection is clearly missing — but the
        // symbol is inside its back-off window, so nothing happens yet.
        h.mock.state.lock().fail_algo_list = false;
        h.watchdog.audit_once().await;
        assert!(h.mock.state.lock().tp_sl_requests.is_empty());
    }

    #[tokio::test]
    async fn tolerances_accept_half_lot_and_ticks() {
        let h = harness();
        let position = open_long(&h.book);
        {
            let mut state = h.mock.state.lock();
            state.exchange_positions = vec![live_long(0.004)];
            state.algo_orders.insert(
                "BTCUSDT".into(),
                vec![
                    AlgoOrder {
                        order_id: "1".into(),
                        kind: AlgoKind::Stop,
                        trigger_price: 49_800.1, // one tick off — fine
                        quantity: 0.0044,        // within half a lot
                        close_position: false,
                    },
                    AlgoOrder {
                        order_id: "2".into(),
                        kind: AlgoKind::TakeProfit,
                        trigger_price: 50_249.9,
                        quantity: 0.002,
                        close_position: false,
                    },
                ],
            );
        }

        h.watchdog.audit_once().await;
        assert!(h.mock.state.lock().tp_sl_requests.is_empty());
        // The position was not touched.
        assert!((h.book.position("BTCUSDT").unwrap().quantity - position.quantity).abs() < 1e-12);
    }
}
