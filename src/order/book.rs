// =============================================================================
// PositionBook — the coordinator's pending-order and position tables
// =============================================================================
//
// Exclusively owned by the order plane: the coordinator transitions entries,
// the watchdog's only mutations are `remove_position` and protective-order
// field updates. Everyone else reads snapshots.
//
// Invariant: a symbol has at most one entry across both tables.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::risk::ExposureSnapshot;
use crate::types::{Direction, PositionStatus};

/// A submitted but unfilled limit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOrder {
    pub symbol: String,
    pub exchange_order_id: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub tp1_price: f64,
    pub tp2_price: f64,
    pub sl_price: f64,
    pub quantity: f64,
    pub created_at: DateTime<Utc>,
    pub signal_id: String,
}

/// A live filled position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    /// Remaining quantity; reduced by partial closes.
    pub quantity: f64,
    pub initial_quantity: f64,
    pub leverage: u32,
    pub tp1_price: f64,
    pub tp2_price: f64,
    /// Current effective TP trigger: tp1 before the partial, tp2 after,
    /// possibly pulled closer by the time-based reduction.
    pub tp_price: f64,
    pub sl_price: f64,
    /// |tp − entry| at open; the time-based reduction scales from this.
    pub original_tp_distance: f64,
    pub tp1_filled: bool,
    pub tp_reduced: bool,
    /// Quantity too small to split: one TP covers the full size.
    pub single_tp: bool,
    pub status: PositionStatus,
    pub entered_at: DateTime<Utc>,
    pub main_order_id: String,
    pub tp_order_id: Option<String>,
    pub sl_order_id: Option<String>,
    pub signal_id: String,
    /// Instrument metadata captured at fill time.
    pub lot_step: f64,
    pub tick_size: f64,
}

impl Position {
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Price-based unrealized return at `price`, as a fraction.
    pub fn pnl_pct(&self, price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        self.direction.sign() * (price - self.entry_price) / self.entry_price
    }
}

// ---------------------------------------------------------------------------
// Book
// ---------------------------------------------------------------------------

pub struct PositionBook {
    pending: RwLock<HashMap<String, PendingOrder>>,
    positions: RwLock<HashMap<String, Position>>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            positions: RwLock::new(HashMap::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Pending orders
    // -------------------------------------------------------------------------

    /// Register a pending entry. Refused when the symbol already has a
    /// pending order or an open position.
    pub fn add_pending(&self, order: PendingOrder) -> bool {
        if self.positions.read().contains_key(&order.symbol) {
            warn!(symbol = %order.symbol, "pending refused — position exists");
            return false;
        }
        let mut pending = self.pending.write();
        if pending.contains_key(&order.symbol) {
            warn!(symbol = %order.symbol, "pending refused — already pending");
            return false;
        }
        info!(
            symbol = %order.symbol,
            order_id = %order.exchange_order_id,
            direction = %order.direction,
            entry = order.entry_price,
            qty = order.quantity,
            "pending order registered"
        );
        pending.insert(order.symbol.clone(), order);
        true
    }

    pub fn remove_pending(&self, symbol: &str) -> Option<PendingOrder> {
        self.pending.write().remove(symbol)
    }

    pub fn has_pending(&self, symbol: &str) -> bool {
        self.pending.read().contains_key(symbol)
    }

    pub fn pending_snapshot(&self) -> Vec<PendingOrder> {
        self.pending.read().values().cloned().collect()
    }

    // -------------------------------------------------------------------------
    // Positions
    // -------------------------------------------------------------------------

    /// Register a freshly filled position. Refused on symbol collision.
    pub fn open_position(&self, position: Position) -> bool {
        let mut positions = self.positions.write();
        if positions.contains_key(&position.symbol) {
            warn!(symbol = %position.symbol, "open refused — position exists");
            return false;
        }
        info!(
            id = %position.id,
            symbol = %position.symbol,
            direction = %position.direction,
            entry = position.entry_price,
            qty = position.quantity,
            "position opened"
        );
        positions.insert(position.symbol.clone(), position);
        true
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.positions.read().get(symbol).cloned()
    }

    pub fn positions_snapshot(&self) -> Vec<Position> {
        self.positions.read().values().cloned().collect()
    }

    /// Apply a mutation to one position under the table lock.
    pub fn update_position(&self, symbol: &str, update: impl FnOnce(&mut Position)) -> bool {
        let mut positions = self.positions.write();
        match positions.get_mut(symbol) {
            Some(position) => {
                update(position);
                true
            }
            None => false,
        }
    }

    pub fn remove_position(&self, symbol: &str) -> Option<Position> {
        let removed = self.positions.write().remove(symbol);
        if let Some(ref position) = removed {
            info!(id = %position.id, symbol, "position removed from book");
        }
        removed
    }

    /// True when the symbol has a pending order or an open position.
    pub fn symbol_busy(&self, symbol: &str) -> bool {
        self.has_pending(symbol) || self.positions.read().contains_key(symbol)
    }

    /// Counts for the risk gate.
    pub fn exposure(&self) -> ExposureSnapshot {
        let pending = self.pending.read();
        let positions = self.positions.read();

        let mut long_count = 0;
        let mut short_count = 0;
        for direction in pending
            .values()
            .map(|p| p.direction)
            .chain(positions.values().map(|p| p.direction))
        {
            match direction {
                Direction::Long => long_count += 1,
                Direction::Short => short_count += 1,
            }
        }

        ExposureSnapshot {
            open_positions: positions.len(),
            pending_orders: pending.len(),
            long_count,
            short_count,
        }
    }

    /// Drop everything (graceful shutdown; exchange-side orders remain).
    pub fn clear(&self) {
        self.pending.write().clear();
        self.positions.write().clear();
    }
}

impl Default for PositionBook {
    fn default() -> Self {
        Self::new()
    }
}
