// =============================================================================
// Average Directional Index — trend strength regardless of direction
// =============================================================================
//
// +DM / -DM and TR per bar → Wilder-smoothed → +DI / -DI →
// DX = |+DI − −DI| / (+DI + −DI) · 100 → ADX = Wilder-smoothed DX.
// Readings above ~25 indicate a trending market.

use crate::market_data::Candle;

/// Most recent ADX over `candles` (oldest first).
///
/// Needs at least `2 · period + 1` candles: `period` bars seed the DM/TR
/// smoothing and another `period` DX values seed the ADX average. Returns
/// `None` on short input, `period == 0`, or non-finite intermediates.
pub fn adx(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < 2 * period + 1 {
        return None;
    }

    let transitions = candles.len() - 1;
    let mut plus_dm = Vec::with_capacity(transitions);
    let mut minus_dm = Vec::with_capacity(transitions);
    let mut tr_vals = Vec::with_capacity(transitions);

    for pair in candles.windows(2) {
        let prev = &pair[0];
        let bar = &pair[1];

        let tr = (bar.high - bar.low)
            .max((bar.high - prev.close).abs())
            .max((bar.low - prev.close).abs());

        let up_move = bar.high - prev.high;
        let down_move = prev.low - bar.low;

        plus_dm.push(if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 });
        minus_dm.push(if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 });
        tr_vals.push(tr);
    }

    let period_f = period as f64;
    let mut smooth_plus: f64 = plus_dm[..period].iter().sum();
    let mut smooth_minus: f64 = minus_dm[..period].iter().sum();
    let mut smooth_tr: f64 = tr_vals[..period].iter().sum();

    let mut dx_values = Vec::with_capacity(transitions - period + 1);
    dx_values.push(dx(smooth_plus, smooth_minus, smooth_tr)?);

    for i in period..transitions {
        smooth_plus = smooth_plus - smooth_plus / period_f + plus_dm[i];
        smooth_minus = smooth_minus - smooth_minus / period_f + minus_dm[i];
        smooth_tr = smooth_tr - smooth_tr / period_f + tr_vals[i];
        dx_values.push(dx(smooth_plus, smooth_minus, smooth_tr)?);
    }

    if dx_values.len() < period {
        return None;
    }

    let mut value = dx_values[..period].iter().sum::<f64>() / period_f;
    for &d in &dx_values[period..] {
        value = (value * (period_f - 1.0) + d) / period_f;
        if !value.is_finite() {
            return None;
        }
    }

    value.is_finite().then_some(value)
}

fn dx(smooth_plus: f64, smooth_minus: f64, smooth_tr: f64) -> Option<f64> {
    if smooth_tr == 0.0 {
        return None;
    }
    let plus_di = smooth_plus / smooth_tr * 100.0;
    let minus_di = smooth_minus / smooth_tr * 100.0;
    let di_sum = plus_di + minus_di;
    if di_sum == 0.0 {
        return Some(0.0);
    }
    let value = (plus_di - minus_di).abs() / di_sum * 100.0;
    value.is_finite().then_some(value)
}
