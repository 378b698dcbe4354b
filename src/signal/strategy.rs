// =============================================================================
// Pluggable strategies — candle-close hooks feeding the signal snapshot
// =============================================================================
//
// A `Strategy` watches closed candles and may emit a fully-priced signal.
// `StrategyIntake` adapts registered strategies onto the aggregator's
// fan-out and pushes their output into the shared signal snapshot, where the
// coordinator consumes it exactly like scanner output.
//
// The shipped variant is the Order-Block (ORB) engine: a strong-volume bar
// that breaks the recent range leaves a zone at its body; a later retest of
// that zone — passed through SMA / RSI gates, with ADX switching TREND vs
// REVERSAL target parameters — produces a signal.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::BotConfig;
use crate::indicators::adx::adx;
use crate::indicators::atr::atr_or_range_mean;
use crate::indicators::cvd::cvd;
use crate::indicators::ma::sma;
use crate::indicators::rsi::rsi;
use crate::market_data::{Candle, CandleKey, CandleSubscriber, MarketDataStore};
use crate::types::{Direction, MomentumState, TrendDirection};

use super::{Signal, SignalEngine};

pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Inspect one closed candle; return a signal when a setup completes.
    fn on_candle_close(&self, symbol: &str, interval: &str, candle: &Candle) -> Option<Signal>;
}

// ---------------------------------------------------------------------------
// Aggregator adapter
// ---------------------------------------------------------------------------

pub struct StrategyIntake {
    strategies: Vec<Arc<dyn Strategy>>,
    engine: Arc<SignalEngine>,
}

impl StrategyIntake {
    pub fn new(strategies: Vec<Arc<dyn Strategy>>, engine: Arc<SignalEngine>) -> Self {
        Self { strategies, engine }
    }
}

impl CandleSubscriber for StrategyIntake {
    fn on_candle_close(&self, symbol: &str, interval: &str, candle: &Candle) {
        for strategy in &self.strategies {
            if let Some(mut signal) = strategy.on_candle_close(symbol, interval, candle) {
                signal.external = true;
                info!(
                    strategy = strategy.name(),
                    symbol,
                    direction = %signal.direction,
                    strength = signal.strength,
                    "strategy signal queued"
                );
                self.engine.push_external(signal);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Order-Block strategy
// ---------------------------------------------------------------------------

/// Volume multiple over the look-back average that marks an order block.
const OB_VOLUME_MULT: f64 = 1.5;
/// Bars considered for the breakout range and the volume average.
const OB_LOOKBACK: usize = 20;
/// Zones tracked per symbol.
const MAX_ZONES: usize = 8;
/// Zones older than this are forgotten.
const ZONE_MAX_AGE_MS: i64 = 12 * 60 * 60 * 1000;
/// ADX at or above this switches to TREND parameters.
const ADX_TREND_MIN: f64 = 25.0;
/// REVERSAL regime shrinks target distances by this factor.
const REVERSAL_TP_FACTOR: f64 = 0.6;
const REVERSAL_SL_FACTOR: f64 = 0.8;
/// Extreme-RSI exclusion bounds.
const RSI_UPPER: f64 = 85.0;
const RSI_LOWER: f64 = 15.0;

#[derive(Debug, Clone)]
struct ObZone {
    low: f64,
    high: f64,
    direction: Direction,
    formed_at: i64,
}

pub struct OrbStrategy {
    store: Arc<MarketDataStore>,
    config: Arc<BotConfig>,
    zones: RwLock<HashMap<String, Vec<ObZone>>>,
}

impl OrbStrategy {
    pub fn new(store: Arc<MarketDataStore>, config: Arc<BotConfig>) -> Self {
        Self {
            store,
            config,
            zones: RwLock::new(HashMap::new()),
        }
    }

    /// A strong-volume bar closing beyond the prior range leaves a zone at
    /// its body.
    fn detect_zone(&self, symbol: &str, prior: &[Candle], candle: &Candle) {
        if prior.len() < OB_LOOKBACK {
            return;
        }
        let lookback = &prior[prior.len() - OB_LOOKBACK..];
        let avg_volume = lookback.iter().map(|c| c.volume).sum::<f64>() / lookback.len() as f64;
        if candle.volume <= OB_VOLUME_MULT * avg_volume {
            return;
        }

        let range_high = lookback.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
        let range_low = lookback.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);

        let direction = if candle.close > range_high {
            Direction::Long // breakout bar body becomes support
        } else if candle.close < range_low {
            Direction::Short
        } else {
            return;
        };

        let zone = ObZone {
            low: candle.open.min(candle.close),
            high: candle.open.max(candle.close),
            direction,
            formed_at: candle.open_time,
        };
        debug!(symbol, ?zone, "order block zone formed");

        let mut zones = self.zones.write();
        let list = zones.entry(symbol.to_string()).or_default();
        list.push(zone);
        if list.len() > MAX_ZONES {
            list.remove(0);
        }
    }

    /// A bar trading back into a zone (while holding it) fires the setup.
    fn find_retest(&self, symbol: &str, candle: &Candle) -> Option<ObZone> {
        let mut zones = self.zones.write();
        let list = zones.get_mut(symbol)?;
        list.retain(|z| candle.open_time - z.formed_at < ZONE_MAX_AGE_MS);

        let hit = list.iter().position(|z| {
            if z.formed_at == candle.open_time {
                return false; // the forming bar itself is not a retest
            }
            match z.direction {
                Direction::Long => candle.low <= z.high && candle.close >= z.low,
                Direction::Short => candle.high >= z.low && candle.close <= z.high,
            }
        })?;
        Some(list.remove(hit)) // a zone fires once
    }

    fn build_signal(&self, symbol: &str, window: &[Candle], zone: &ObZone, candle: &Candle) -> Option<Signal> {
        let orders = &self.config.orders;
        let closes: Vec<f64> = window.iter().map(|c| c.close).collect();
        let direction = zone.direction;

        // SMA gate: price on the trend side of the 20-bar mean.
        let mean = sma(&closes, OB_LOOKBACK)?;
        match direction {
            Direction::Long if candle.close <= mean => return None,
            Direction::Short if candle.close >= mean => return None,
            _ => {}
        }

        // RSI gate: exclude exhausted extremes only.
        let rsi_value = rsi(&closes, 14)?;
        match direction {
            Direction::Long if rsi_value >= RSI_UPPER => return None,
            Direction::Short if rsi_value <= RSI_LOWER => return None,
            _ => {}
        }

        // ADX picks the parameter regime rather than rejecting.
        let adx_value = adx(window, 14).unwrap_or(0.0);
        let trending = adx_value >= ADX_TREND_MIN;
        let (tp_factor, sl_factor) = if trending {
            (1.0, 1.0)
        } else {
            (REVERSAL_TP_FACTOR, REVERSAL_SL_FACTOR)
        };

        let atr = atr_or_range_mean(window, orders.atr_period)?;
        let current_price = candle.close;
        if current_price <= 0.0 {
            return None;
        }
        let atr_pct = atr / current_price;
        if atr_pct < orders.min_atr_pct {
            return None;
        }

        let spread_pct = self
            .store
            .spread(symbol)
            .map(|s| s.spread_pct)
            .unwrap_or(0.0);
        let entry_offset = atr * orders.entry_offset_atr;
        let entry_price = match direction {
            Direction::Long => current_price - entry_offset,
            Direction::Short => current_price + entry_offset,
        };

        let floor = entry_price * self.config.min_target_pct(spread_pct);
        let tp1_dist = (atr * orders.tp1_atr * tp_factor).max(floor);
        let tp2_dist = (atr * orders.tp2_atr * tp_factor).max(floor).max(tp1_dist);
        let sl_dist = (atr * orders.sl_atr * sl_factor).max(floor);

        let (tp1_price, tp2_price, sl_price) = match direction {
            Direction::Long => (
                entry_price + tp1_dist,
                entry_price + tp2_dist,
                entry_price - sl_dist,
            ),
            Direction::Short => (
                entry_price - tp1_dist,
                entry_price - tp2_dist,
                entry_price + sl_dist,
            ),
        };

        let cvd_tail = &window[window.len().saturating_sub(self.config.filters.cvd_bars)..];
        let strength = (50.0 + adx_value.min(50.0)).min(100.0);

        Some(
            Signal {
                id: Signal::new_id(),
                symbol: symbol.to_string(),
                direction,
                strength,
                current_price,
                entry_price,
                tp1_price,
                tp2_price,
                sl_price,
                atr,
                atr_pct,
                trend: match direction {
                    Direction::Long => TrendDirection::Up,
                    Direction::Short => TrendDirection::Down,
                },
                momentum: MomentumState::Momentum,
                cvd: cvd(cvd_tail),
                funding_rate: self.store.funding(symbol).map(|f| f.rate).unwrap_or(0.0),
                oi_change_pct: self.store.oi(symbol).map(|o| o.change_pct).unwrap_or(0.0),
                spread_pct,
                created_at: Utc::now(),
                expires_at: Utc::now(),
                external: true,
            }
            .with_ttl(Utc::now()),
        )
    }
}

impl Strategy for OrbStrategy {
    fn name(&self) -> &'static str {
        "orb"
    }

    fn on_candle_close(&self, symbol: &str, interval: &str, candle: &Candle) -> Option<Signal> {
        if interval != self.config.htf_interval {
            return None;
        }

        let key = CandleKey::new(symbol, interval);
        let window = self.store.window(&key, 50);
        if window.len() <= OB_LOOKBACK {
            return None;
        }
        // The window already contains `candle` (the aggregator stores before
        // fanning out); everything before it is the prior range.
        let prior = &window[..window.len() - 1];

        self.detect_zone(symbol, prior, candle);

        let zone = self.find_retest(symbol, candle)?;
        let signal = self.build_signal(symbol, &window, &zone, candle);
        if signal.is_none() {
            debug!(symbol, "order block retest rejected by gates");
        }
        signal
    }
}
