// =============================================================================
// Moving averages — SMA and EMA
// =============================================================================
//
// EMA: multiplier = 2 / (period + 1); seeded with the SMA of the first
// `period` values, so each output element corresponds to an input starting
// at index `period - 1`.

/// Simple moving average of the last `period` values.
///
/// Returns `None` when `period` is zero, the input is shorter than `period`,
/// or the mean is non-finite.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let mean = values[values.len() - period..].iter().sum::<f64>() / period as f64;
    mean.is_finite().then_some(mean)
}

/// Full EMA series for `values` with look-back `period`.
///
/// Returns an empty `Vec` on short input or `period == 0`. A non-finite
/// intermediate truncates the series; consumers must not trust a broken tail.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let multiplier = 2.0 / (period + 1) as f64;

    let seed = values[..period].iter().sum::<f64>() / period as f64;
    if !seed.is_finite() {
        return Vec::new();
    }

    let mut series = Vec::with_capacity(values.len() - period + 1);
    series.push(seed);

    let mut prev = seed;
    for &value in &values[period..] {
        let next = value * multiplier + prev * (1.0 - multiplier);
        if !next.is_finite() {
            break;
        }
        series.push(next);
        prev = next;
    }

    series
}

/// Most recent EMA value, if the series can be computed at all.
pub fn ema_last(values: &[f64], period: usize) -> Option<f64> {
    ema(values, period).last().copied()
}
