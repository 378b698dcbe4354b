// =============================================================================
// Average True Range — Wilder's smoothing
// =============================================================================
//
// TR   = max(H - L, |H - prevClose|, |L - prevClose|)
// ATR₀ = SMA of the first `period` TR values
// ATRₜ = (ATRₜ₋₁ · (period - 1) + TRₜ) / period

use crate::market_data::Candle;

/// Most recent ATR value over `candles` (oldest first).
///
/// Returns `None` when `period` is zero, when fewer than `period + 1` candles
/// are available (each TR needs a predecessor), or when any intermediate
/// value goes non-finite.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let mut tr_values = Vec::with_capacity(candles.len() - 1);
    for pair in candles.windows(2) {
        let prev_close = pair[0].close;
        let bar = &pair[1];
        let tr = (bar.high - bar.low)
            .max((bar.high - prev_close).abs())
            .max((bar.low - prev_close).abs());
        tr_values.push(tr);
    }

    let period_f = period as f64;
    let mut value = tr_values[..period].iter().sum::<f64>() / period_f;
    if !value.is_finite() {
        return None;
    }

    for &tr in &tr_values[period..] {
        value = (value * (period_f - 1.0) + tr) / period_f;
        if !value.is_finite() {
            return None;
        }
    }

    Some(value)
}

/// ATR with a degraded-data fallback: when the window is too short for a
/// full Wilder ATR, fall back to the plain mean of (high - low) over the
/// bars that are present.
pub fn atr_or_range_mean(candles: &[Candle], period: usize) -> Option<f64> {
    if let Some(value) = atr(candles, period) {
        return Some(value);
    }
    if candles.is_empty() {
        return None;
    }
    let mean = candles.iter().map(|c| c.high - c.low).sum::<f64>() / candles.len() as f64;
    mean.is_finite().then_some(mean)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: 0,
            open,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn atr_rejects_period_zero() {
        let candles = vec![candle(100.0, 105.0, 95.0, 102.0); 20];
        assert!(atr(&candles, 0).is_none());
    }

    #[test]
    fn atr_rejects_short_window() {
        let candles = vec![candle(100.0, 105.0, 95.0, 102.0); 10];
        assert!(atr(&candles, 14).is_none());
    }

    #[test]
    fn atr_constant_range_converges() {
        // Every bar spans exactly 10; ATR must land on 10.
        let candles: Vec<Candle> = (0..30)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.1;
                candle(base, base + 5.0, base - 5.0, base)
            })
            .collect();
        let value = atr(&candles, 14).unwrap();
        assert!((value - 10.0).abs() < 1.0, "expected ~10, got {value}");
    }

    #[test]
    fn atr_sees_gaps_through_prev_close() {
        // Gap up: |H - prevClose| dominates H - L.
        let candles = vec![
            candle(100.0, 105.0, 95.0, 95.0),
            candle(110.0, 115.0, 108.0, 112.0),
            candle(112.0, 118.0, 110.0, 115.0),
            candle(115.0, 120.0, 113.0, 118.0),
        ];
        let value = atr(&candles, 3).unwrap();
        assert!(value > 7.0, "gap should lift ATR above bar range, got {value}");
    }

    #[test]
    fn atr_nan_input_yields_none() {
        let candles = vec![
            candle(100.0, 105.0, 95.0, 100.0),
            candle(100.0, f64::NAN, 95.0, 100.0),
            candle(100.0, 105.0, 95.0, 100.0),
            candle(100.0, 105.0, 95.0, 100.0),
        ];
        assert!(atr(&candles, 3).is_none());
    }

    #[test]
    fn fallback_uses_range_mean_when_short() {
        let candles = vec![
            candle(100.0, 104.0, 98.0, 101.0), // range 6
            candle(101.0, 103.0, 99.0, 102.0), // range 4
        ];
        // period 14 cannot be satisfied; mean range = 5.
        let value = atr_or_range_mean(&candles, 14).unwrap();
        assert!((value - 5.0).abs() < 1e-10);
    }

    #[test]
    fn fallback_prefers_real_atr() {
        let candles: Vec<Candle> = (0..30)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.1;
                candle(base, base + 5.0, base - 5.0, base)
            })
            .collect();
        assert_eq!(atr_or_range_mean(&candles, 14), atr(&candles, 14));
    }

    #[test]
    fn fallback_empty_is_none() {
        assert!(atr_or_range_mean(&[], 14).is_none());
    }
}
