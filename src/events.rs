// =============================================================================
// Outbound events — broadcast bus and audit sink
// =============================================================================
//
// The engine talks to the outside world through two one-way channels:
//
//   * `EventBus` — a tokio broadcast feed the front-end push socket drains.
//     Lagging or absent receivers are fine; publishing never blocks.
//   * `AuditSink` — the persistence seam. The relational store lives in a
//     collaborating service; the shipped `MemoryAudit` keeps bounded rows
//     in memory for the dashboard API and the tests.
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::{Direction, ExitReason, SignalStatus};

// ---------------------------------------------------------------------------
// Event payloads
// ---------------------------------------------------------------------------

/// Audit row / broadcast payload for one signal's lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEvent {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub tp1_price: f64,
    pub tp2_price: f64,
    pub sl_price: f64,
    pub strength: f64,
    pub status: SignalStatus,
    pub at: DateTime<Utc>,
}

/// Audit row / broadcast payload for one position's lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionEvent {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub quantity: f64,
    pub leverage: u32,
    pub tp_price: f64,
    pub sl_price: f64,
    /// OPEN or CLOSED (the broadcast never shows intermediate states).
    pub open: bool,
    pub close_reason: Option<ExitReason>,
    pub pnl_pct: Option<f64>,
    pub at: DateTime<Utc>,
}

/// Everything the core pushes outward.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    Signal(SignalEvent),
    Position(PositionEvent),
    /// The market-data stream is gone for good (reconnects exhausted).
    StreamLost { reason: String },
}

// ---------------------------------------------------------------------------
// Event bus
// ---------------------------------------------------------------------------

const BUS_CAPACITY: usize = 256;

/// Fan-out broadcast feed. Cloned freely; publishing with zero receivers is
/// a no-op, not an error.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: EngineEvent) {
        // Err means no receivers are currently subscribed.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Audit sink
// ---------------------------------------------------------------------------

/// Persistence seam for signal / position audit rows.
pub trait AuditSink: Send + Sync {
    fn record_signal(&self, row: SignalEvent);
    fn update_signal_status(&self, signal_id: &str, status: SignalStatus);
    fn record_position(&self, row: PositionEvent);
    fn position_closed(&self, position_id: &str, reason: ExitReason, pnl_pct: Option<f64>);
}

/// Bounded in-memory audit rows, newest last.
pub struct MemoryAudit {
    signals: RwLock<Vec<SignalEvent>>,
    positions: RwLock<Vec<PositionEvent>>,
    max_rows: usize,
}

const DEFAULT_MAX_ROWS: usize = 500;

impl MemoryAudit {
    pub fn new() -> Self {
        Self {
            signals: RwLock::new(Vec::new()),
            positions: RwLock::new(Vec::new()),
            max_rows: DEFAULT_MAX_ROWS,
        }
    }

    pub fn signals(&self) -> Vec<SignalEvent> {
        self.signals.read().clone()
    }

    pub fn positions(&self) -> Vec<PositionEvent> {
        self.positions.read().clone()
    }
}

impl Default for MemoryAudit {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for MemoryAudit {
    fn record_signal(&self, row: SignalEvent) {
        debug!(id = %row.id, symbol = %row.symbol, status = %row.status, "audit: signal");
        let mut rows = self.signals.write();
        rows.push(row);
        if rows.len() > self.max_rows {
            let excess = rows.len() - self.max_rows;
            rows.drain(..excess);
        }
    }

    fn update_signal_status(&self, signal_id: &str, status: SignalStatus) {
        let mut rows = self.signals.write();
        if let Some(row) = rows.iter_mut().rev().find(|r| r.id == signal_id) {
            row.status = status;
        }
    }

    fn record_position(&self, row: PositionEvent) {
        debug!(id = %row.id, symbol = %row.symbol, open = row.open, "audit: position");
        let mut rows = self.positions.write();
        rows.push(row);
        if rows.len() > self.max_rows {
            let excess = rows.len() - self.max_rows;
            rows.drain(..excess);
        }
    }

    fn position_closed(&self, position_id: &str, reason: ExitReason, pnl_pct: Option<f64>) {
        let mut rows = self.positions.write();
        if let Some(row) = rows.iter_mut().rev().find(|r| r.id == position_id) {
            row.open = false;
            row.close_reason = Some(reason);
            row.pnl_pct = pnl_pct;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn signal_row(id: &str) -> SignalEvent {
        SignalEvent {
            id: id.into(),
            symbol: "BTCUSDT".into(),
            direction: Direction::Long,
            entry_price: 50_000.0,
            tp1_price: 50_250.0,
            tp2_price: 50_500.0,
            sl_price: 49_800.0,
            strength: 70.0,
            status: SignalStatus::Pending,
            at: Utc::now(),
        }
    }

    #[test]
    fn signal_status_updates_latest_row() {
        let audit = MemoryAudit::new();
        audit.record_signal(signal_row("a"));
        audit.record_signal(signal_row("b"));
        audit.update_signal_status("a", SignalStatus::Skipped);

        let rows = audit.signals();
        assert_eq!(rows[0].status, SignalStatus::Skipped);
        assert_eq!(rows[1].status, SignalStatus::Pending);
    }

    #[test]
    fn position_close_annotates_row() {
        let audit = MemoryAudit::new();
        audit.record_position(PositionEvent {
            id: "p1".into(),
            symbol: "BTCUSDT".into(),
            direction: Direction::Long,
            entry_price: 50_000.0,
            quantity: 0.004,
            leverage: 5,
            tp_price: 50_250.0,
            sl_price: 49_800.0,
            open: true,
            close_reason: None,
            pnl_pct: None,
            at: Utc::now(),
        });
        audit.position_closed("p1", ExitReason::Tp2Hit, Some(0.01));

        let rows = audit.positions();
        assert!(!rows[0].open);
        assert_eq!(rows[0].close_reason, Some(ExitReason::Tp2Hit));
        assert!(rows[0].pnl_pct.unwrap() > 0.0);
    }

    #[test]
    fn bus_delivers_to_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(EngineEvent::StreamLost {
            reason: "test".into(),
        });
        match rx.try_recv().unwrap() {
            EngineEvent::StreamLost { reason } => assert_eq!(reason, "test"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn publish_without_receivers_is_fine() {
        let bus = EventBus::new();
        bus.publish(EngineEvent::StreamLost {
            reason: "nobody listening".into(),
        });
    }

    #[test]
    fn audit_rows_are_bounded() {
        let audit = MemoryAudit::new();
        for i in 0..(DEFAULT_MAX_ROWS + 20) {
            audit.record_signal(signal_row(&format!("s{i}")));
        }
        assert_eq!(audit.signals().len(), DEFAULT_MAX_ROWS);
    }
}
