// =============================================================================
// Cumulative Volume Delta — body-ratio approximation
// =============================================================================
//
// Without tick data, per-bar buyer-vs-seller volume is approximated from how
// much of the bar's range the body covers:
//
//   delta = clamp((close - open) / (high - low), -1, +1) · volume
//
// A full-body up bar contributes +volume, a doji contributes ~0. Summing the
// deltas over a short window gives a directional pressure estimate; dividing
// by total volume normalises it into [-1, +1].

use crate::market_data::Candle;

/// Sum of clamped body-ratio deltas over `candles`. Zero-range bars
/// contribute nothing.
pub fn cvd(candles: &[Candle]) -> f64 {
    candles
        .iter()
        .map(|c| {
            let range = c.high - c.low;
            if range <= 0.0 {
                return 0.0;
            }
            let ratio = ((c.close - c.open) / range).clamp(-1.0, 1.0);
            ratio * c.volume
        })
        .sum()
}

/// CVD together with its volume-normalised ratio `|cvd| / Σvolume`.
///
/// Returns `None` when total volume is zero (the ratio would be undefined).
pub fn cvd_with_ratio(candles: &[Candle]) -> Option<(f64, f64)> {
    let total_volume: f64 = candles.iter().map(|c| c.volume).sum();
    if total_volume <= 0.0 {
        return None;
    }
    let delta = cvd(candles);
    let ratio = delta.abs() / total_volume;
    (delta.is_finite() && ratio.is_finite()).then_some((delta, ratio))
}
