// =============================================================================
// Trend analysis — structural highs/lows over the higher timeframe
// =============================================================================
//
// Four structural patterns are extracted from the window, each true when at
// least ⌈(n−1)/2⌉ of the consecutive-pair comparisons agree:
//
//   higherHighs ∧ higherLows            → UP    (full structure)
//   lowerHighs  ∧ lowerLows             → DOWN  (full structure)
//   higherLows  ∧ ¬lowerHighs           → UP    (weak, strength 0.5)
//   lowerHighs  ∧ ¬higherLows           → DOWN  (weak, strength 0.5)
//   otherwise                           → NEUTRAL
//
// Full-structure strength is the window's net close move:
// clamp(|Δclose / firstClose| · 100, 0, 1) — a 1 % move saturates it.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::market_data::Candle;
use crate::types::TrendDirection;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub direction: TrendDirection,
    /// In [0, 1]; 0.5 for weak (one-sided) structures.
    pub strength: f64,
    pub higher_highs: bool,
    pub higher_lows: bool,
    pub lower_highs: bool,
    pub lower_lows: bool,
}

/// Majority vote over consecutive pairs: true when at least ⌈(n−1)/2⌉
/// comparisons agree.
fn majority(values: &[f64], rising: bool) -> bool {
    let pairs = values.len() - 1;
    let needed = pairs.div_ceil(2);
    let agreeing = values
        .windows(2)
        .filter(|w| if rising { w[1] > w[0] } else { w[1] < w[0] })
        .count();
    agreeing >= needed
}

/// Classify the trend over the trailing `trend_bars` candles of `window`
/// (oldest first). Returns `None` when the window is too short.
pub fn analyze_trend(window: &[Candle], trend_bars: usize) -> Option<TrendAnalysis> {
    if trend_bars < 2 || window.len() < trend_bars {
        return None;
    }
    let bars = &window[window.len() - trend_bars..];

    let highs: Vec<f64> = bars.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = bars.iter().map(|c| c.low).collect();

    let higher_highs = majority(&highs, true);
    let higher_lows = majority(&lows, true);
    let lower_highs = majority(&highs, false);
    let lower_lows = majority(&lows, false);

    let first_close = bars.first()?.close;
    let last_close = bars.last()?.close;
    let move_strength = if first_close.abs() > f64::EPSILON {
        (((last_close - first_close) / first_close).abs() * 100.0).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let (direction, strength) = if higher_highs && higher_lows {
        (TrendDirection::Up, move_strength)
    } else if lower_highs && lower_lows {
        (TrendDirection::Down, move_strength)
    } else if higher_lows && !lower_highs {
        (TrendDirection::Up, 0.5)
    } else if lower_highs && !higher_lows {
        (TrendDirection::Down, 0.5)
    } else {
        (TrendDirection::Neutral, 0.0)
    };

    debug!(
        direction = %direction,
        strength,
        higher_highs,
        higher_lows,
        lower_highs,
        lower_lows,
        "trend classified"
    );

    Some(TrendAnalysis {
        direction,
        strength,
        higher_highs,
        higher_lows,
        lower_highs,
        lower_lows,
    })
}
