// =============================================================================
// Momentum analysis — last-bar character vs the recent lower-timeframe window
// =============================================================================
//
// The window's overall direction comes from the net move first-open →
// last-close (±0.1 % dead zone). The last bar is then sized against the
// preceding bars:
//
//   bodySizeRatio = |lastBody| / mean(|prevBodies|)
//   volumeRatio   = lastVolume / mean(prevVolumes)
//
// State machine, checked in order:
//   EXHAUSTED — body and volume both fading (ratio < exhausted, vol < decrease)
//   MOMENTUM  — expanding body on sustained volume
//   PULLBACK  — counter-bar or sub-momentum body, while the retracement stays
//               shallow (UP: low > 0.995 · min(prevLows); DOWN mirrored)
//   NEUTRAL   — anything else
//
// Strength blends the two ratios, each capped at 2: value lands in [0, 1].

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::FilterConfig;
use crate::market_data::Candle;
use crate::types::{MomentumState, TrendDirection};

/// Net-move dead zone: ±0.1 %.
const DIRECTION_THRESHOLD: f64 = 0.001;
/// Pullback validity bounds.
const PULLBACK_LOW_FLOOR: f64 = 0.995;
const PULLBACK_HIGH_CAP: f64 = 1.005;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumAnalysis {
    pub state: MomentumState,
    pub direction: TrendDirection,
    pub body_size_ratio: f64,
    pub volume_ratio: f64,
    /// In [0, 1].
    pub strength: f64,
}

/// Classify momentum over the trailing `momentum_bars` candles of `window`
/// (oldest first). Returns `None` when the window is too short.
pub fn analyze_momentum(window: &[Candle], filters: &FilterConfig) -> Option<MomentumAnalysis> {
    let bars_needed = filters.momentum_bars.max(2);
    if window.len() < bars_needed {
        return None;
    }
    let bars = &window[window.len() - bars_needed..];
    let (prev, last) = bars.split_at(bars.len() - 1);
    let last = &last[0];

    // Overall window direction from first open to last close.
    let first_open = prev[0].open;
    let direction = if first_open.abs() <= f64::EPSILON {
        TrendDirection::Neutral
    } else {
        let net_move = (last.close - first_open) / first_open;
        if net_move > DIRECTION_THRESHOLD {
            TrendDirection::Up
        } else if net_move < -DIRECTION_THRESHOLD {
            TrendDirection::Down
        } else {
            TrendDirection::Neutral
        }
    };

    let mean_body = prev.iter().map(|c| c.body().abs()).sum::<f64>() / prev.len() as f64;
    let mean_volume = prev.iter().map(|c| c.volume).sum::<f64>() / prev.len() as f64;

    let body_size_ratio = last.body().abs() / mean_body.max(f64::EPSILON);
    let volume_ratio = last.volume / mean_volume.max(f64::EPSILON);

    // Counter-bar: the last bar runs against the window direction.
    let last_bar_counter = match direction {
        TrendDirection::Up => last.body() < 0.0,
        TrendDirection::Down => last.body() > 0.0,
        TrendDirection::Neutral => false,
    };

    // Shallow-retracement bound relative to the preceding bars.
    let pullback_valid = match direction {
        TrendDirection::Up => {
            let min_prev_low = prev.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
            last.low > PULLBACK_LOW_FLOOR * min_prev_low
        }
        TrendDirection::Down => {
            let max_prev_high = prev.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
            last.high < PULLBACK_HIGH_CAP * max_prev_high
        }
        TrendDirection::Neutral => false,
    };

    let state = if body_size_ratio < filters.body_exhausted && volume_ratio < filters.volume_decrease
    {
        MomentumState::Exhausted
    } else if body_size_ratio > filters.body_momentum && volume_ratio >= filters.volume_decrease {
        MomentumState::Momentum
    } else if (last_bar_counter || body_size_ratio < filters.body_momentum) && pullback_valid {
        MomentumState::Pullback
    } else {
        MomentumState::Neutral
    };

    let strength = (body_size_ratio.min(2.0) / 2.0 + volume_ratio.min(2.0) / 2.0) / 2.0;

    debug!(
        state = %state,
        direction = %direction,
        body_size_ratio,
        volume_ratio,
        strength,
        "momentum classified"
    );

    Some(MomentumAnalysis {
        state,
        direction,
        body_size_ratio,
        volume_ratio,
        strength,
    })
}
