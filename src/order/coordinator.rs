// =============================================================================
// OrderCoordinator — per-symbol lifecycle state machine
// =============================================================================
//
// Per-symbol states: IDLE → PENDING (limit submitted) → OPEN (filled,
// TP1+SL placed) → TP1_FILLED (half closed, TP2+SL placed) → CLOSED.
// Alternate terminals: PENDING → CANCELED (timeout / exchange cancel),
// OPEN|TP1_FILLED → CLOSED (SL, TP2, time exit, external close).
//
// Every 10 s one tick runs three phases in order:
//   1. process_new_signals  — risk gate, sizing, limit submission
//   2. manage_pending_orders — fill detection, unfill timeout
//   3. manage_positions      — TP/SL/time transitions
//
// A tick never overlaps with another (tick mutex); a symbol's failure is
// logged and skipped, never allowed to halt the cycle. Entry submission is
// fire-and-forget: fills are picked up by a later tick's pending scan.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::BotConfig;
use crate::events::{AuditSink, EngineEvent, EventBus, PositionEvent, SignalEvent};
use crate::exchange::precision::{floor_to_step, round_to_tick};
use crate::exchange::{is_no_position_error, ExchangeAdapter, OrderRequest, TpSlRequest};
use crate::market_data::MarketDataStore;
use crate::risk::RiskGate;
use crate::signal::{Signal, SignalEngine};
use crate::types::{Direction, ExitReason, PositionStatus, SignalStatus};

use super::{PendingOrder, Position, PositionBook};

/// Coordinator tick period.
const TICK_PERIOD: Duration = Duration::from_secs(10);
/// SL triggers are clamped this close to mark when they would sit on the
/// wrong side. Under a fast-moving mark this can still land inside the
/// immediate-trigger band; kept as-is deliberately.
const SL_MARK_CLAMP: f64 = 0.999;

pub struct OrderCoordinator {
    adapter: Arc<dyn ExchangeAdapter>,
    store: Arc<MarketDataStore>,
    signals: Arc<SignalEngine>,
    risk: Arc<RiskGate>,
    book: Arc<PositionBook>,
    audit: Arc<dyn AuditSink>,
    bus: EventBus,
    config: Arc<BotConfig>,
    /// Set when the market stream is lost: stop taking new entries.
    degraded: Arc<AtomicBool>,
    tick_lock: tokio::sync::Mutex<()>,
}

impl OrderCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adapter: Arc<dyn ExchangeAdapter>,
        store: Arc<MarketDataStore>,
        signals: Arc<SignalEngine>,
        risk: Arc<RiskGate>,
        book: Arc<PositionBook>,
        audit: Arc<dyn AuditSink>,
        bus: EventBus,
        config: Arc<BotConfig>,
        degraded: Arc<AtomicBool>,
    ) -> Self {
        Self {
            adapter,
            store,
            signals,
            risk,
            book,
            audit,
            bus,
            config,
            degraded,
            tick_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Run the 10 s tick loop until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(TICK_PERIOD);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("order coordinator started");

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown.changed() => {
                    info!("order coordinator stopped");
                    return;
                }
            }
        }
    }

    /// One full tick. At most one runs at a time; a late tick is skipped
    /// rather than queued behind a slow one.
    pub async fn tick(&self) {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            warn!("previous coordinator tick still in flight — skipping");
            return;
        };

        self.process_new_signals().await;
        self.manage_pending_orders().await;
        self.manage_positions().await;
    }

    // =========================================================================
    // Phase 1 — signal intake
    // =========================================================================

    async fn process_new_signals(&self) {
        let signals = self.signals.take_signals();
        if signals.is_empty() {
            return;
        }

        for signal in signals {
            // Expiry re-checked here: a signal can age out while earlier
            // entries in the same batch are being submitted.
            if signal.is_expired(Utc::now()) {
                debug!(symbol = %signal.symbol, "signal expired before its turn");
                continue;
            }
            if let Err(e) = self.try_enter(&signal).await {
                error!(symbol = %signal.symbol, error = %e, "entry attempt failed");
                self.emit_signal_event(&signal, SignalStatus::Failed);
            }
        }
    }

    async fn try_enter(&self, signal: &Signal) -> Result<()> {
        let symbol = signal.symbol.as_str();

        if self.degraded.load(Ordering::SeqCst) {
            debug!(symbol, "degraded mode — signal skipped");
            self.emit_signal_event(signal, SignalStatus::Skipped);
            return Ok(());
        }
        if self.book.symbol_busy(symbol) {
            debug!(symbol, "symbol already has pending/position — skipped");
            self.emit_signal_event(signal, SignalStatus::Skipped);
            return Ok(());
        }

        let (allowed, reason) = self.risk.can_enter(signal.direction, self.book.exposure());
        if !allowed {
            info!(symbol, reason = reason.as_deref().unwrap_or("-"), "risk gate rejected signal");
            self.emit_signal_event(signal, SignalStatus::Skipped);
            return Ok(());
        }

        let risk_config = &self.config.risk;
        let balance = self
            .adapter
            .get_available_balance()
            .await
            .context("balance check failed")?;
        if balance < risk_config.fixed_margin_usdt {
            info!(symbol, balance, required = risk_config.fixed_margin_usdt, "insufficient balance");
            self.emit_signal_event(signal, SignalStatus::Skipped);
            return Ok(());
        }

        let lot = self
            .adapter
            .get_lot_size_info(symbol)
            .await
            .context("lot size lookup failed")?;
        let tick = self
            .adapter
            .get_tick_size(symbol)
            .await
            .context("tick size lookup failed")?;

        let notional = risk_config.fixed_margin_usdt * f64::from(risk_config.leverage);
        let raw_quantity = notional / signal.entry_price;
        let quantity = floor_to_step(raw_quantity, lot.step);
        if quantity < lot.min_qty {
            warn!(symbol, raw_quantity, "quantity below minimum lot — skipped");
            self.emit_signal_event(signal, SignalStatus::Skipped);
            return Ok(());
        }

        // Leverage errors are advisory; the venue may already be set.
        if let Err(e) = self.adapter.set_leverage(symbol, risk_config.leverage).await {
            warn!(symbol, error = %e, "set_leverage failed — continuing");
        }

        let entry_price = round_to_tick(signal.entry_price, tick);
        let request = OrderRequest::limit(symbol, signal.direction.entry_side(), quantity, entry_price);

        match self.adapter.create_order(request).await {
            Ok(order_id) => {
                self.book.add_pending(PendingOrder {
                    symbol: symbol.to_string(),
                    exchange_order_id: order_id,
                    direction: signal.direction,
                    entry_price,
                    tp1_price: round_to_tick(signal.tp1_price, tick),
                    tp2_price: round_to_tick(signal.tp2_price, tick),
                    sl_price: round_to_tick(signal.sl_price, tick),
                    quantity,
                    created_at: Utc::now(),
                    signal_id: signal.id.clone(),
                });
                self.emit_signal_event(signal, SignalStatus::Pending);
            }
            Err(e) => {
                // Business rejection (bad price, margin): no retry; the next
                // scan may regenerate the setup.
                warn!(symbol, error = %e, "entry submission rejected");
                self.emit_signal_event(signal, SignalStatus::Failed);
            }
        }
        Ok(())
    }

    // =========================================================================
    // Phase 2 — pending orders
    // =========================================================================

    async fn manage_pending_orders(&self) {
        for pending in self.book.pending_snapshot() {
            if let Err(e) = self.check_pending(&pending).await {
                error!(symbol = %pending.symbol, error = %e, "pending check failed");
            }
        }
    }

    async fn check_pending(&self, pending: &PendingOrder) -> Result<()> {
        let symbol = pending.symbol.as_str();
        let info = self
            .adapter
            .query_order(symbol, &pending.exchange_order_id)
            .await
            .context("pending order query failed")?;

        use crate::exchange::OrderState::*;
        match info.state {
            Filled => {
                let fill_price = if info.avg_price > 0.0 {
                    info.avg_price
                } else {
                    pending.entry_price
                };
                let fill_qty = if info.executed_qty > 0.0 {
                    info.executed_qty
                } else {
                    pending.quantity
                };
                self.on_order_filled(pending, fill_price, fill_qty).await?;
            }
            Canceled | Expired | Rejected => {
                info!(symbol, state = ?info.state, "pending order drained");
                self.book.remove_pending(symbol);
                self.audit
                    .update_signal_status(&pending.signal_id, SignalStatus::Canceled);
            }
            New | PartiallyFilled => {
                let elapsed = (Utc::now() - pending.created_at).num_seconds();
                if elapsed >= self.config.orders.unfill_timeout_sec {
                    info!(symbol, elapsed, "pending order timed out — cancelling");
                    self.adapter
                        .cancel_order(symbol, &pending.exchange_order_id)
                        .await
                        .context("timeout cancel failed")?;

                    if info.executed_qty > 0.0 {
                        // A partial fill survives the cancel: manage what we got.
                        self.on_order_filled(pending, info.avg_price.max(pending.entry_price), info.executed_qty)
                            .await?;
                    } else {
                        self.book.remove_pending(symbol);
                        self.audit
                            .update_signal_status(&pending.signal_id, SignalStatus::Canceled);
                    }
                }
            }
        }
        Ok(())
    }

    async fn on_order_filled(&self, pending: &PendingOrder, fill_price: f64, fill_qty: f64) -> Result<()> {
        let symbol = pending.symbol.as_str();
        self.book.remove_pending(symbol);

        let lot = self
            .adapter
            .get_lot_size_info(symbol)
            .await
            .context("lot size lookup failed")?;
        let tick = self
            .adapter
            .get_tick_size(symbol)
            .await
            .unwrap_or(0.0);

        let sl_price = self.clamp_sl(symbol, pending.direction, pending.sl_price, tick).await;

        let tp1_qty = floor_to_step(fill_qty * 0.5, lot.step);
        // Too small to split: one TP covers everything at the first target.
        let single_tp = tp1_qty < lot.min_qty;
        let tp_request_qty = if single_tp { fill_qty } else { tp1_qty };
        let tp_trigger = pending.tp1_price;

        let protective = self
            .adapter
            .create_tp_sl_order(TpSlRequest {
                symbol: symbol.to_string(),
                side: pending.direction.close_side().to_string(),
                tp_quantity: tp_request_qty,
                sl_quantity: fill_qty,
                tp_trigger,
                sl_trigger: sl_price,
            })
            .await;

        let (tp_order_id, sl_order_id) = match protective {
            Ok(ids) => (ids.tp_order_id, ids.sl_order_id),
            Err(e) => {
                // The position is live regardless; the watchdog rebuilds
                // missing protective orders on its next pass.
                error!(symbol, error = %e, "TP/SL placement failed after fill");
                (None, None)
            }
        };

        let position = Position {
            id: Position::new_id(),
            symbol: symbol.to_string(),
            direction: pending.direction,
            entry_price: fill_price,
            quantity: fill_qty,
            initial_quantity: fill_qty,
            leverage: self.config.risk.leverage,
            tp1_price: pending.tp1_price,
            tp2_price: pending.tp2_price,
            tp_price: tp_trigger,
            sl_price,
            original_tp_distance: (tp_trigger - fill_price).abs(),
            tp1_filled: false,
            tp_reduced: false,
            single_tp,
            status: PositionStatus::Open,
            entered_at: Utc::now(),
            main_order_id: pending.exchange_order_id.clone(),
            tp_order_id,
            sl_order_id,
            signal_id: pending.signal_id.clone(),
            lot_step: lot.step,
            tick_size: tick,
        };

        self.audit
            .update_signal_status(&pending.signal_id, SignalStatus::Filled);
        self.emit_position_event(&position, true, None, None);
        self.book.open_position(position);
        Ok(())
    }

    // =========================================================================
    // Phase 3 — open positions
    // =========================================================================

    async fn manage_positions(&self) {
        for position in self.book.positions_snapshot() {
            if let Err(e) = self.check_position(&position).await {
                error!(symbol = %position.symbol, error = %e, "position check failed");
            }
        }
    }

    async fn check_position(&self, position: &Position) -> Result<()> {
        let symbol = position.symbol.as_str();
        let price = self
            .adapter
            .get_symbol_price(symbol)
            .await
            .context("price fetch failed")?;
        let pnl_pct = position.pnl_pct(price);

        let crossed_up = |target: f64| price >= target;
        let crossed_down = |target: f64| price <= target;
        let tp_hit = match position.direction {
            Direction::Long => crossed_up(position.tp_price),
            Direction::Short => crossed_down(position.tp_price),
        };
        let sl_hit = match position.direction {
            Direction::Long => crossed_down(position.sl_price),
            Direction::Short => crossed_up(position.sl_price),
        };

        // Stop first: the exchange-side trigger has likely fired already, in
        // which case the close below lands on the external-close path.
        if sl_hit {
            return self.close_full(position, price, ExitReason::SlHit).await;
        }

        if tp_hit {
            if position.tp1_filled || position.single_tp {
                return self.close_full(position, price, ExitReason::Tp2Hit).await;
            }
            return self.partial_close_tp1(position, price).await;
        }

        // Time-based transitions.
        let elapsed = (Utc::now() - position.entered_at).num_seconds();
        let lifecycle = &self.config.lifecycle;

        if elapsed >= lifecycle.tp_reduce_time_sec && !position.tp_reduced {
            return self.reduce_tp(position).await;
        }
        if elapsed >= lifecycle.breakeven_time_sec && pnl_pct >= lifecycle.breakeven_min_profit {
            return self
                .close_full(position, price, ExitReason::BreakevenTimeout)
                .await;
        }
        if elapsed >= lifecycle.max_hold_time_sec {
            if pnl_pct >= 0.0 {
                return self
                    .close_full(position, price, ExitReason::MaxTimeTimeout)
                    .await;
            }
            // Losing beyond max hold: the stop decides, never a forced close.
            debug!(symbol, pnl_pct, "max hold exceeded in loss — leaving to SL");
        }

        Ok(())
    }

    /// TP1: close half, then protect the residual with TP2+SL.
    async fn partial_close_tp1(&self, position: &Position, price: f64) -> Result<()> {
        let symbol = position.symbol.as_str();
        let close_qty = floor_to_step(position.quantity * 0.5, position.lot_step);
        if close_qty <= 0.0 {
            return self.close_full(position, price, ExitReason::Tp2Hit).await;
        }

        if let Err(e) = self.adapter.cancel_all_algo_orders(symbol).await {
            warn!(symbol, error = %e, "algo cancel before partial failed");
        }

        let request = OrderRequest::market_reduce(symbol, position.direction.close_side(), close_qty);
        match self.adapter.create_order(request).await {
            Ok(_) => {}
            Err(e) if is_no_position_error(&e) => {
                return self.handle_external_close(position).await;
            }
            Err(e) => return Err(e).context("TP1 partial close failed"),
        }

        let residual = position.quantity - close_qty;
        info!(symbol, close_qty, residual, price, "TP1 partial close executed");

        self.book.update_position(symbol, |p| {
            p.quantity = residual;
            p.tp1_filled = true;
            p.tp_price = p.tp2_price;
        });

        if residual >= position.lot_step {
            let sl_price = self
                .clamp_sl(symbol, position.direction, position.sl_price, position.tick_size)
                .await;
            let protective = self
                .adapter
                .create_tp_sl_order(TpSlRequest {
                    symbol: symbol.to_string(),
                    side: position.direction.close_side().to_string(),
                    tp_quantity: residual,
                    sl_quantity: residual,
                    tp_trigger: position.tp2_price,
                    sl_trigger: sl_price,
                })
                .await;
            match protective {
                Ok(ids) => {
                    self.book.update_position(symbol, |p| {
                        p.tp_order_id = ids.tp_order_id.clone();
                        p.sl_order_id = ids.sl_order_id.clone();
                    });
                }
                Err(e) => error!(symbol, error = %e, "TP2/SL placement failed after partial"),
            }
        }
        Ok(())
    }

    /// Close everything that remains and settle the ledger.
    async fn close_full(&self, position: &Position, price: f64, reason: ExitReason) -> Result<()> {
        let symbol = position.symbol.as_str();

        if let Err(e) = self.adapter.cancel_all_algo_orders(symbol).await {
            warn!(symbol, error = %e, "algo cancel before close failed");
        }

        self.book
            .update_position(symbol, |p| p.status = PositionStatus::Closing);

        let request =
            OrderRequest::market_reduce(symbol, position.direction.close_side(), position.quantity);
        match self.adapter.create_order(request).await {
            Ok(_) => {}
            Err(e) if is_no_position_error(&e) => {
                return self.handle_external_close(position).await;
            }
            Err(e) => {
                self.book
                    .update_position(symbol, |p| p.status = PositionStatus::Open);
                return Err(e).context("full close failed");
            }
        }

        let pnl_pct = position.pnl_pct(price);
        self.risk.record_pnl(pnl_pct, &reason.to_string());
        let closed = self.book.remove_position(symbol).unwrap_or_else(|| position.clone());

        info!(symbol, %reason, pnl_pct, price, "position closed");
        self.audit.position_closed(&closed.id, reason, Some(pnl_pct));
        self.emit_position_event(&closed, false, Some(reason), Some(pnl_pct));
        Ok(())
    }

    /// The exchange no longer has the position (SL fired server-side, manual
    /// close, liquidation). Remove silently; the realized PnL is unknown
    /// here, so the ledger is not touched.
    async fn handle_external_close(&self, position: &Position) -> Result<()> {
        let symbol = position.symbol.as_str();
        warn!(symbol, "position gone on exchange — external close");

        let closed = self.book.remove_position(symbol).unwrap_or_else(|| position.clone());
        self.audit
            .position_closed(&closed.id, ExitReason::ExternalClose, None);
        self.emit_position_event(&closed, false, Some(ExitReason::ExternalClose), None);
        Ok(())
    }

    /// Pull the TP closer once the position has sat unresolved for too long.
    async fn reduce_tp(&self, position: &Position) -> Result<()> {
        let symbol = position.symbol.as_str();
        let lifecycle = &self.config.lifecycle;

        let new_distance = position.original_tp_distance * lifecycle.tp_reduce_ratio;
        let new_tp = round_to_tick(
            match position.direction {
                Direction::Long => position.entry_price + new_distance,
                Direction::Short => position.entry_price - new_distance,
            },
            position.tick_size,
        );

        info!(symbol, old_tp = position.tp_price, new_tp, "reducing TP after timeout");

        if let Err(e) = self.adapter.cancel_all_algo_orders(symbol).await {
            warn!(symbol, error = %e, "algo cancel before TP reduce failed");
        }

        let tp_quantity = if position.tp1_filled || position.single_tp {
            position.quantity
        } else {
            floor_to_step(position.quantity * 0.5, position.lot_step).max(position.lot_step)
        };
        let sl_price = self
            .clamp_sl(symbol, position.direction, position.sl_price, position.tick_size)
            .await;

        let protective = self
            .adapter
            .create_tp_sl_order(TpSlRequest {
                symbol: symbol.to_string(),
                side: position.direction.close_side().to_string(),
                tp_quantity,
                sl_quantity: position.quantity,
                tp_trigger: new_tp,
                sl_trigger: sl_price,
            })
            .await;

        match protective {
            Ok(ids) => {
                self.book.update_position(symbol, |p| {
                    p.tp_reduced = true;
                    p.tp_price = new_tp;
                    if p.tp1_filled {
                        p.tp2_price = new_tp;
                    } else {
                        p.tp1_price = new_tp;
                    }
                    p.tp_order_id = ids.tp_order_id.clone();
                    p.sl_order_id = ids.sl_order_id.clone();
                });
                Ok(())
            }
            Err(e) => Err(e).context("reduced TP placement failed"),
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Keep the SL trigger on the correct side of the mark price: a trigger
    /// already beyond mark would be rejected (or fire instantly).
    async fn clamp_sl(&self, symbol: &str, direction: Direction, sl_price: f64, tick: f64) -> f64 {
        let mark = match self.store.mark_price(symbol) {
            Some(mark) => Some(mark),
            None => self.adapter.get_symbol_price(symbol).await.ok(),
        };
        let Some(mark) = mark else {
            return sl_price;
        };

        let clamped = match direction {
            Direction::Long if sl_price >= mark => mark * SL_MARK_CLAMP,
            Direction::Short if sl_price <= mark => mark * (2.0 - SL_MARK_CLAMP),
            _ => return sl_price,
        };
        warn!(symbol, sl_price, mark, clamped, "SL clamped against mark price");
        round_to_tick(clamped, tick)
    }

    fn emit_signal_event(&self, signal: &Signal, status: SignalStatus) {
        let row = SignalEvent {
            id: signal.id.clone(),
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            entry_price: signal.entry_price,
            tp1_price: signal.tp1_price,
            tp2_price: signal.tp2_price,
            sl_price: signal.sl_price,
            strength: signal.strength,
            status,
            at: Utc::now(),
        };
        self.audit.record_signal(row.clone());
        self.bus.publish(EngineEvent::Signal(row));
    }

    fn emit_position_event(
        &self,
        position: &Position,
        open: bool,
        close_reason: Option<ExitReason>,
        pnl_pct: Option<f64>,
    ) {
        let row = PositionEvent {
            id: position.id.clone(),
            symbol: position.symbol.clone(),
            direction: position.direction,
            entry_price: position.entry_price,
            quantity: position.quantity,
            leverage: position.leverage,
            tp_price: position.tp_price,
            sl_price: position.sl_price,
            open,
            close_reason,
            pnl_pct,
            at: Utc::now(),
        };
        if open {
            self.audit.record_position(row.clone());
        }
        self.bus.publish(EngineEvent::Position(row));
    }
}

// =============================================================================
// Tests — lifecycle scenarios against the scripted mock exchange
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryAudit;
    use crate::exchange::mock::MockExchange;
    use crate::signal::Signal;
    use crate::types::{MomentumState, TrendDirection};
    use parking_lot::RwLock;

    struct Harness {
        mock: Arc<MockExchange>,
        coordinator: OrderCoordinator,
        audit: Arc<MemoryAudit>,
        book: Arc<PositionBook>,
        risk: Arc<RiskGate>,
        signals: Arc<SignalEngine>,
        bus: EventBus,
        degraded: Arc<AtomicBool>,
    }

    fn harness(configure: impl FnOnce(&mut BotConfig)) -> Harness {
        let mut config = BotConfig::default();
        config.risk.fixed_margin_usdt = 40.0; // 40 × 5x / 50 000 = 0.004
        configure(&mut config);
        let config = Arc::new(config);

        let mock = Arc::new(MockExchange::with_price("BTCUSDT", 50_000.0));
        let store = Arc::new(MarketDataStore::new());
        let watchlist = Arc::new(RwLock::new(Vec::new()));
        let signals = Arc::new(SignalEngine::new(store.clone(), config.clone(), watchlist));
        let risk = Arc::new(RiskGate::new(config.risk.clone()));
        let book = Arc::new(PositionBook::new());
        let audit = Arc::new(MemoryAudit::new());
        let bus = EventBus::new();
        let degraded = Arc::new(AtomicBool::new(false));

        let coordinator = OrderCoordinator::new(
            mock.clone(),
            store,
            signals.clone(),
            risk.clone(),
            book.clone(),
            audit.clone(),
            bus.clone(),
            config,
            degraded.clone(),
        );

        Harness {
            mock,
            coordinator,
            audit,
            book,
            risk,
            signals,
            bus,
            degraded,
        }
    }

    fn long_signal(entry: f64, tp1: f64, tp2: f64, sl: f64) -> Signal {
        Signal {
            id: Signal::new_id(),
            symbol: "BTCUSDT".into(),
            direction: Direction::Long,
            strength: 70.0,
            current_price: entry,
            entry_price: entry,
            tp1_price: tp1,
            tp2_price: tp2,
            sl_price: sl,
            atr: 120.0,
            atr_pct: 0.0024,
            trend: TrendDirection::Up,
            momentum: MomentumState::Pullback,
            cvd: 10.0,
            funding_rate: -0.0001,
            oi_change_pct: 0.01,
            spread_pct: 0.0002,
            created_at: Utc::now(),
            expires_at: Utc::now(),
            external: true,
        }
        .with_ttl(Utc::now())
    }

    fn open_long(book: &PositionBook, qty: f64, tp1_filled: bool) -> Position {
        let position = Position {
            id: Position::new_id(),
            symbol: "BTCUSDT".into(),
            direction: Direction::Long,
            entry_price: 50_000.0,
            quantity: qty,
            initial_quantity: if tp1_filled { qty * 2.0 } else { qty },
            leverage: 5,
            tp1_price: 50_250.0,
            tp2_price: 50_500.0,
            tp_price: if tp1_filled { 50_500.0 } else { 50_250.0 },
            sl_price: 49_800.0,
            original_tp_distance: 250.0,
            tp1_filled,
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

    // -------------------------------------------------------------------------
    // S1 — clean LONG lifecycle: fill → TP1 partial → TP2 full close
    // -------------------------------------------------------------------------
    #[tokio::test]
    async fn s1_clean_long_lifecycle() {
        let h = harness(|_| {});
        h.mock.state.lock().fill_entries_immediately = true;

        h.signals
            .push_external(long_signal(50_000.0, 50_250.0, 50_500.0, 49_800.0));
        h.coordinator.tick().await;

        // Entry filled within the tick; TP1+SL pair covers 0.002 / 0.004.
        let position = h.book.position("BTCUSDT").expect("position open");
        assert!((position.quantity - 0.004).abs() < 1e-12);
        assert!(!position.tp1_filled);
        {
            let state = h.mock.state.lock();
            assert_eq!(state.tp_sl_requests.len(), 1);
            let pair = &state.tp_sl_requests[0];
            assert!((pair.tp_quantity - 0.002).abs() < 1e-12);
            assert!((pair.sl_quantity - 0.004).abs() < 1e-12);
            assert!((pair.tp_trigger - 50_250.0).abs() < 1e-9);
            assert!((pair.sl_trigger - 49_800.0).abs() < 1e-9);
        }

        // Mark touches TP1 → half closed, TP2+SL for the rest.
        h.mock.set_price("BTCUSDT", 50_250.0);
        h.coordinator.tick().await;

        let position = h.book.position("BTCUSDT").expect("still open");
        assert!(position.tp1_filled);
        assert!((position.quantity - 0.002).abs() < 1e-12);
        assert!((position.tp_price - 50_500.0).abs() < 1e-9);
        {
            let state = h.mock.state.lock();
            assert_eq!(state.tp_sl_requests.len(), 2);
            let pair = &state.tp_sl_requests[1];
            assert!((pair.tp_quantity - 0.002).abs() < 1e-12);
            assert!((pair.tp_trigger - 50_500.0).abs() < 1e-9);
            assert!((pair.sl_trigger - 49_800.0).abs() < 1e-9);
        }

        // Mark touches TP2 → closed in profit, ledger shows one win.
        h.mock.set_price("BTCUSDT", 50_500.0);
        h.coordinator.tick().await;

        assert!(h.book.position("BTCUSDT").is_none());
        let ledger = h.risk.ledger();
        assert_eq!(ledger.today_win_count, 1);
        assert_eq!(ledger.consecutive_losses, 0);

        let rows = h.audit.positions();
        let closed = rows.iter().find(|r| !r.open).expect("closed row");
        assert_eq!(closed.close_reason, Some(ExitReason::Tp2Hit));
        assert!(closed.pnl_pct.unwrap() > 0.0);
    }

    // -------------------------------------------------------------------------
    // S3 — pending timeout cancels the entry
    // -------------------------------------------------------------------------
    #[tokio::test]
    async fn s3_pending_timeout_cancels() {
        let h = harness(|c| c.orders.unfill_timeout_sec = 0);
        // Orders rest unfilled on the book.
        h.signals
            .push_external(long_signal(50_000.0, 50_250.0, 50_500.0, 49_800.0));
        h.coordinator.tick().await;

        assert!(!h.book.has_pending("BTCUSDT"));
        assert!(h.book.position("BTCUSDT").is_none());
        {
            let state = h.mock.state.lock();
            assert_eq!(state.cancelled_orders.len(), 1);
        }
        let rows = h.audit.signals();
        assert_eq!(rows.last().unwrap().status, SignalStatus::Canceled);
    }

    // -------------------------------------------------------------------------
    // S4 — three straight losses arm the cooldown; signals get SKIPPED
    // -------------------------------------------------------------------------
    #[tokio::test]
    async fn s4_consecutive_losses_cool_down_entries() {
        let h = harness(|_| {});

        for _ in 0..3 {
            open_long(&h.book, 0.004, false);
            h.mock.set_price("BTCUSDT", 49_700.0); // through the stop
            h.coordinator.tick().await;
            assert!(h.book.position("BTCUSDT").is_none());
        }

        let ledger = h.risk.ledger();
        assert_eq!(ledger.today_loss_count, 3);
        assert!(ledger.cooldown_until.is_some());

        // Next signal is refused by the gate, not submitted.
        h.mock.set_price("BTCUSDT", 50_000.0);
        let submitted_before = h.mock.state.lock().submitted.len();
        h.signals
            .push_external(long_signal(50_000.0, 50_250.0, 50_500.0, 49_800.0));
        h.coordinator.tick().await;

        assert_eq!(h.mock.state.lock().submitted.len(), submitted_before);
        assert_eq!(h.audit.signals().last().unwrap().status, SignalStatus::Skipped);
    }

    // -------------------------------------------------------------------------
    // S6 — exchange reports no position: silent external close, no PnL record
    // -------------------------------------------------------------------------
    #[tokio::test]
    async fn s6_external_close_records_no_pnl() {
        let h = harness(|_| {});
        let position = open_long(&h.book, 0.002, true);
        h.audit.record_position(PositionEvent {
            id: position.id.clone(),
            symbol: position.symbol.clone(),
            direction: position.direction,
            entry_price: position.entry_price,
            quantity: position.quantity,
            leverage: position.leverage,
            tp_price: position.tp_price,
            sl_price: position.sl_price,
            open: true,
            close_reason: None,
            pnl_pct: None,
            at: Utc::now(),
        });

        h.mock.state.lock().reject_reduce_no_position = true;
        h.mock.set_price("BTCUSDT", 50_600.0); // beyond TP2 → close attempt
        let mut events = h.bus.subscribe();
        h.coordinator.tick().await;

        assert!(h.book.position("BTCUSDT").is_none());
        assert_eq!(h.risk.ledger().today_trade_count, 0);

        let row = h
            .audit
            .positions()
            .into_iter()
            .find(|r| r.id == position.id)
            .unwrap();
        assert!(!row.open);
        assert_eq!(row.close_reason, Some(ExitReason::ExternalClose));
        assert!(row.pnl_pct.is_none());

        // The broadcast reports the close too.
        let mut saw_external = false;
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::Position(p) = event {
                if p.close_reason == Some(ExitReason::ExternalClose) {
                    saw_external = true;
                }
            }
        }
        assert!(saw_external);
    }

    // -------------------------------------------------------------------------
    // Sizing fallback: quantity too small to split gets one full-size TP
    // -------------------------------------------------------------------------
    #[tokio::test]
    async fn tiny_fill_uses_single_tp_fallback() {
        // 10 × 5x / 50 000 = 0.001 — exactly one lot.
        let h = harness(|c| c.risk.fixed_margin_usdt = 10.0);
        h.mock.state.lock().fill_entries_immediately = true;

        h.signals
            .push_external(long_signal(50_000.0, 50_250.0, 50_500.0, 49_800.0));
        h.coordinator.tick().await;

        let position = h.book.position("BTCUSDT").expect("position open");
        assert!(position.single_tp);
        {
            let state = h.mock.state.lock();
            let pair = &state.tp_sl_requests[0];
            assert!((pair.tp_quantity - 0.001).abs() < 1e-12);
            assert!((pair.sl_quantity - 0.001).abs() < 1e-12);
            assert!((pair.tp_trigger - 50_250.0).abs() < 1e-9);
        }

        // One TP covers everything: hitting it closes the position fully.
        h.mock.set_price("BTCUSDT", 50_250.0);
        h.coordinator.tick().await;
        assert!(h.book.position("BTCUSDT").is_none());
        assert_eq!(h.risk.ledger().today_win_count, 1);
    }

    // -------------------------------------------------------------------------
    // Time-based transitions
    // -------------------------------------------------------------------------
    #[tokio::test]
    async fn tp_reduce_pulls_the_target_closer() {
        let h = harness(|c| c.lifecycle.tp_reduce_time_sec = 0);
        open_long(&h.book, 0.004, false);
        h.mock.set_price("BTCUSDT", 50_050.0); // between entry and TP1

        h.coordinator.tick().await;

        let position = h.book.position("BTCUSDT").expect("still open");
        assert!(position.tp_reduced);
        // 250 × 0.5 = 125 above entry.
        assert!((position.tp_price - 50_125.0).abs() < 1e-9);
        let state = h.mock.state.lock();
        let pair = state.tp_sl_requests.last().unwrap();
        assert!((pair.tp_trigger - 50_125.0).abs() < 1e-9);
        assert!((pair.tp_quantity - 0.002).abs() < 1e-12); // still the half
        assert!((pair.sl_quantity - 0.004).abs() < 1e-12);
    }

    #[tokio::test]
    async fn breakeven_timeout_closes_near_flat() {
        let h = harness(|c| c.lifecycle.breakeven_time_sec = 0);
        open_long(&h.book, 0.004, false);
        h.mock.set_price("BTCUSDT", 50_010.0); // pnl +0.02 % ≥ -0.1 %

        h.coordinator.tick().await;

        assert!(h.book.position("BTCUSDT").is_none());
        let rows = h.audit.positions();
        // No open row was recorded for the hand-opened position; assert via
        // the ledger instead: a non-negative close counts as a win.
        assert!(rows.iter().all(|r| r.open)); // nothing to annotate
        assert_eq!(h.risk.ledger().today_win_count, 1);
    }

    #[tokio::test]
    async fn max_hold_never_force_closes_a_loser() {
        let h = harness(|c| c.lifecycle.max_hold_time_sec = 0);
        open_long(&h.book, 0.004, false);
        h.mock.set_price("BTCUSDT", 49_900.0); // losing, but above the stop

        h.coordinator.tick().await;
        assert!(h.book.position("BTCUSDT").is_some(), "loser left for the SL");

        h.mock.set_price("BTCUSDT", 50_050.0); // back to profit
        h.coordinator.tick().await;
        assert!(h.book.position("BTCUSDT").is_none());
    }

    // -------------------------------------------------------------------------
    // Entry gating
    // -------------------------------------------------------------------------
    #[tokio::test]
    async fn insufficient_balance_skips_signal() {
        let h = harness(|_| {});
        h.mock.state.lock().balance = 10.0; // below the 40 USDT margin

        h.signals
            .push_external(long_signal(50_000.0, 50_250.0, 50_500.0, 49_800.0));
        h.coordinator.tick().await;

        assert!(h.mock.state.lock().submitted.is_empty());
        assert_eq!(h.audit.signals().last().unwrap().status, SignalStatus::Skipped);
    }

    #[tokio::test]
    async fn busy_symbol_is_skipped() {
        let h = harness(|_| {});
        open_long(&h.book, 0.004, false);

        h.signals
            .push_external(long_signal(50_000.0, 50_250.0, 50_500.0, 49_800.0));
        h.coordinator.tick().await;

        assert!(h.mock.state.lock().submitted.is_empty());
        assert_eq!(h.audit.signals().last().unwrap().status, SignalStatus::Skipped);
    }

    #[tokio::test]
    async fn degraded_engine_takes_no_new_entries() {
        let h = harness(|_| {});
        h.degraded.store(true, Ordering::SeqCst);

        h.signals
            .push_external(long_signal(50_000.0, 50_250.0, 50_500.0, 49_800.0));
        h.coordinator.tick().await;

        assert!(h.mock.state.lock().submitted.is_empty());
        assert_eq!(h.audit.signals().last().unwrap().status, SignalStatus::Skipped);
    }

    #[tokio::test]
    async fn submission_failure_marks_signal_failed() {
        let h = harness(|_| {});
        h.mock.state.lock().fail_next_create = Some(crate::exchange::ApiError {
            code: -4003,
            msg: "Price less than min price.".into(),
        });

        h.signals
            .push_external(long_signal(50_000.0, 50_250.0, 50_500.0, 49_800.0));
        h.coordinator.tick().await;

        assert!(h.book.pending_snapshot().is_empty());
        assert_eq!(h.audit.signals().last().unwrap().status, SignalStatus::Failed);
    }
}
