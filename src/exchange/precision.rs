// =============================================================================
// Final-precision rounding — tick size and lot size
// =============================================================================
//
// Intermediate filter math runs on f64; everything that leaves for the
// exchange is rounded here through `rust_decimal` so that 0.1 + 0.2 style
// artifacts can never produce an off-step quantity or price.

use rust_decimal::prelude::*;

/// Round `value` down to a multiple of `step` (lot-size rounding).
///
/// A non-positive or non-finite step passes the value through unchanged;
/// unrepresentable inputs collapse to 0.0, which callers treat as
/// "too small to trade".
pub fn floor_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 || !step.is_finite() || !value.is_finite() {
        return if value.is_finite() { value } else { 0.0 };
    }
    let (Some(v), Some(s)) = (Decimal::from_f64(value), Decimal::from_f64(step)) else {
        return 0.0;
    };
    if s.is_zero() {
        return value;
    }
    ((v / s).floor() * s).to_f64().unwrap_or(0.0)
}

/// Round `price` to the nearest multiple of `tick` (price rounding).
pub fn round_to_tick(price: f64, tick: f64) -> f64 {
    if tick <= 0.0 || !tick.is_finite() || !price.is_finite() {
        return if price.is_finite() { price } else { 0.0 };
    }
    let (Some(p), Some(t)) = (Decimal::from_f64(price), Decimal::from_f64(tick)) else {
        return 0.0;
    };
    if t.is_zero() {
        return price;
    }
    ((p / t).round() * t).to_f64().unwrap_or(0.0)
}

/// True when `value` sits on a multiple of `step` within half a step's
/// floating-point slack.
pub fn is_step_aligned(value: f64, step: f64) -> bool {
    if step <= 0.0 {
        return true;
    }
    (value - floor_to_step(value + step * 1e-9, step)).abs() < step * 1e-6
}
