// =============================================================================
// RiskGate — entry policy checks and the daily risk ledger
// =============================================================================
//
// Ordered rejection list for `can_enter`:
//   1. consecutive-loss cooldown still running
//   2. daily loss cap reached
//   3. open positions + pending orders at the cap
//   4. same-direction exposure at the cap
//
// The ledger resets when the UTC calendar date rolls over. `record_pnl` is
// the only mutation path: losses accumulate `daily_loss` and consecutive
// counts; hitting the consecutive-loss limit arms the cooldown and zeroes
// the counter.
//
// Given the same ledger and exposure snapshot, `can_enter` always returns
// the same decision — it reads, never writes.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::RiskConfig;
use crate::types::Direction;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// What the coordinator currently has on the books, per `can_enter` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExposureSnapshot {
    pub open_positions: usize,
    pub pending_orders: usize,
    pub long_count: usize,
    pub short_count: usize,
}

/// Serialisable view of the ledger for the status API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLedger {
    pub daily_loss: f64,
    pub consecutive_losses: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub today_trade_count: u32,
    pub today_win_count: u32,
    pub today_loss_count: u32,
    pub last_reset_date: String,
}

struct Inner {
    daily_loss: f64,
    consecutive_losses: u32,
    cooldown_until: Option<DateTime<Utc>>,
    today_trade_count: u32,
    today_win_count: u32,
    today_loss_count: u32,
    current_date: String,
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

pub struct RiskGate {
    state: RwLock<Inner>,
    config: RiskConfig,
}

impl RiskGate {
    pub fn new(config: RiskConfig) -> Self {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        info!(
            max_positions = config.max_positions,
            max_same_direction = config.max_same_direction,
            max_daily_loss = config.max_daily_loss,
            consecutive_loss_limit = config.consecutive_loss_limit,
            cooldown_minutes = config.cooldown_minutes,
            "risk gate initialised"
        );
        Self {
            state: RwLock::new(Inner {
                daily_loss: 0.0,
                consecutive_losses: 0,
                cooldown_until: None,
                today_trade_count: 0,
                today_win_count: 0,
                today_loss_count: 0,
                current_date: today,
            }),
            config,
        }
    }

    // -------------------------------------------------------------------------
    // Entry gate
    // -------------------------------------------------------------------------

    /// Check whether a new entry in `direction` is currently allowed.
    pub fn can_enter(&self, direction: Direction, exposure: ExposureSnapshot) -> (bool, Option<String>) {
        self.maybe_reset_daily();
        let state = self.state.read();
        let now = Utc::now();

        // 1. Cooldown
        if let Some(until) = state.cooldown_until {
            if now < until {
                let msg = format!("cooldown active until {}", until.format("%H:%M:%S"));
                return (false, Some(msg));
            }
        }

        // 2. Daily loss cap
        if state.daily_loss >= self.config.max_daily_loss {
            let msg = format!(
                "daily loss cap reached: {:.2}% (limit {:.2}%)",
                state.daily_loss * 100.0,
                self.config.max_daily_loss * 100.0
            );
            return (false, Some(msg));
        }

        // 3. Total exposure cap
        if exposure.open_positions + exposure.pending_orders >= self.config.max_positions {
            let msg = format!(
                "max positions reached: {} open + {} pending (limit {})",
                exposure.open_positions, exposure.pending_orders, self.config.max_positions
            );
            return (false, Some(msg));
        }

        // 4. Per-direction cap
        let same_direction = match direction {
            Direction::Long => exposure.long_count,
            Direction::Short => exposure.short_count,
        };
        if same_direction >= self.config.max_same_direction {
            let msg = format!(
                "max {direction} exposure reached: {same_direction} (limit {})",
                self.config.max_same_direction
            );
            return (false, Some(msg));
        }

        (true, None)
    }

    // -------------------------------------------------------------------------
    // Ledger mutation
    // -------------------------------------------------------------------------

    /// Record a completed trade. `pnl_pct` is the price-based return of the
    /// trade as a fraction; negative values are losses.
    pub fn record_pnl(&self, pnl_pct: f64, reason: &str) {
        self.maybe_reset_daily();
        let mut state = self.state.write();

        state.today_trade_count += 1;

        if pnl_pct < 0.0 {
            state.daily_loss += pnl_pct.abs();
            state.consecutive_losses += 1;
            state.today_loss_count += 1;

            if state.consecutive_losses >= self.config.consecutive_loss_limit {
                let until = Utc::now() + Duration::minutes(self.config.cooldown_minutes);
                state.cooldown_until = Some(until);
                state.consecutive_losses = 0;
                warn!(
                    reason,
                    cooldown_until = %until,
                    "consecutive-loss limit hit — cooldown armed"
                );
            }
        } else {
            state.today_win_count += 1;
            state.consecutive_losses = 0;
        }

        info!(
            pnl_pct,
            reason,
            daily_loss = state.daily_loss,
            consecutive_losses = state.consecutive_losses,
            trades_today = state.today_trade_count,
            "trade result recorded"
        );
    }

    /// Ledger snapshot for the status API.
    pub fn ledger(&self) -> RiskLedger {
        self.maybe_reset_daily();
        let state = self.state.read();
        RiskLedger {
            daily_loss: state.daily_loss,
            consecutive_losses: state.consecutive_losses,
            cooldown_until: state.cooldown_until,
            today_trade_count: state.today_trade_count,
            today_win_count: state.today_win_count,
            today_loss_count: state.today_loss_count,
            last_reset_date: state.current_date.clone(),
        }
    }

    // -------------------------------------------------------------------------
    // Daily rollover
    // -------------------------------------------------------------------------

    fn maybe_reset_daily(&self) {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        {
            let state = self.state.read();
            if state.current_date == today {
                return;
            }
        }
        let mut state = self.state.write();
        // Re-check under the write lock; another thread may have reset.
        if state.current_date != today {
            info!(
                old_date = %state.current_date,
                new_date = %today,
                "UTC date rolled — resetting daily risk counters"
            );
            Self::reset(&mut state, today);
        }
    }

    fn reset(state: &mut Inner, date: String) {
        state.daily_loss = 0.0;
        state.consecutive_losses = 0;
        state.today_trade_count = 0;
        state.today_win_count = 0;
        state.today_loss_count = 0;
        state.current_date = date;
        // The cooldown deliberately survives the rollover: three losses at
        // 23:55 still block entries at 00:05.
    }
}
