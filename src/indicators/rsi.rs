// =============================================================================
// Relative Strength Index — Wilder's smoothing
// =============================================================================
//
// avg_gain / avg_loss are seeded with the SMA of the first `period` deltas,
// then smoothed: avg = (prev · (period - 1) + current) / period.
// RSI = 100 - 100 / (1 + avg_gain / avg_loss), clamped by construction to
// [0, 100]; flat input reads 50, gain-only input reads 100.

/// Most recent RSI value over `closes` (oldest first).
///
/// Returns `None` when `period` is zero, there are fewer than `period + 1`
/// closes, or the computation goes non-finite.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let period_f = period as f64;
    let (mut avg_gain, mut avg_loss) =
        deltas[..period].iter().fold((0.0_f64, 0.0_f64), |(g, l), &d| {
            if d > 0.0 {
                (g + d / period_f, l)
            } else {
                (g, l + d.abs() / period_f)
            }
        });

    for &delta in &deltas[period..] {
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;
    }

    from_averages(avg_gain, avg_loss)
}

fn from_averages(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    let value = if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    };
    value.is_finite().then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_input() {
        assert!(rsi(&[], 14).is_none());
        let fourteen: Vec<f64> = (1..=14).map(|x| x as f64).collect();
        assert!(rsi(&fourteen, 14).is_none());
        assert!(rsi(&[1.0, 2.0, 3.0], 0).is_none());
    }

    #[test]
    fn all_gains_reads_100() {
        let closes: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        assert!((rsi(&closes, 14).unwrap() - 100.0).abs() < 1e-10);
    }

    #[test]
    fn all_losses_reads_0() {
        let closes: Vec<f64> = (1..=30).rev().map(|x| x as f64).collect();
        assert!(rsi(&closes, 14).unwrap().abs() < 1e-10);
    }

    #[test]
    fn flat_reads_50() {
        let closes = vec![100.0; 30];
        assert!((rsi(&closes, 14).unwrap() - 50.0).abs() < 1e-10);
    }

    #[test]
    fn always_in_range() {
        let closes = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            44.18, 44.22, 44.57, 43.42, 42.66, 43.13,
        ];
        let value = rsi(&closes, 14).unwrap();
        assert!((0.0..=100.0).contains(&value), "RSI {value} out of range");
    }
}
