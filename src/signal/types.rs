// =============================================================================
// Signal — one scan result that passed every filter
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Direction, MomentumState, TrendDirection};

/// Signals not acted on within this window are dropped.
pub const SIGNAL_TTL_SECS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    /// 0–100 composite score.
    pub strength: f64,
    pub current_price: f64,
    /// Maker-biased limit price (offset from current price by ATR).
    pub entry_price: f64,
    pub tp1_price: f64,
    pub tp2_price: f64,
    pub sl_price: f64,
    pub atr: f64,
    pub atr_pct: f64,
    pub trend: TrendDirection,
    pub momentum: MomentumState,
    pub cvd: f64,
    pub funding_rate: f64,
    pub oi_change_pct: f64,
    pub spread_pct: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// True for strategy-pushed signals (they survive a scanner snapshot
    /// replacement until their own TTL runs out).
    #[serde(default)]
    pub external: bool,
}

impl Signal {
    /// Stamp creation and expiry on an otherwise-complete signal.
    pub fn with_ttl(mut self, now: DateTime<Utc>) -> Self {
        self.created_at = now;
        self.expires_at = now + Duration::seconds(SIGNAL_TTL_SECS);
        self
    }

    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// The ordering law every emitted signal must satisfy:
    /// LONG  ⇒ sl < entry < tp1 ≤ tp2
    /// SHORT ⇒ tp2 ≤ tp1 < entry < sl
    pub fn prices_ordered(&self) -> bool {
        match self.direction {
            Direction::Long => {
                self.sl_price < self.entry_price
                    && self.entry_price < self.tp1_price
                    && self.tp1_price <= self.tp2_price
            }
            Direction::Short => {
                self.tp2_price <= self.tp1_price
                    && self.tp1_price < self.entry_price
                    && self.entry_price < self.sl_price
            }
        }
    }
}
