// =============================================================================
// Scheduler alignment — "poll at :00, scan at :30"
// =============================================================================
//
// The aux poller and the signal scanner share a one-minute period but must
// not run at the same instant: the poller refreshes quotes at second 0 and
// the scanner reads them at second 30. Each loop sleeps to its alignment
// point once, then runs on a fixed-period interval so the offset cannot
// drift.

use std::time::Duration;

use chrono::{Timelike, Utc};

/// Milliseconds from a position inside the minute (`now_second`,
/// `now_millis`) to the next occurrence of `target_second`.
pub fn millis_until_minute_second(now_second: u32, now_millis: u32, target_second: u32) -> u64 {
    let now_in_minute = u64::from(now_second) * 1000 + u64::from(now_millis);
    let target_in_minute = u64::from(target_second % 60) * 1000;
    if target_in_minute > now_in_minute {
        target_in_minute - now_in_minute
    } else {
        60_000 - now_in_minute + target_in_minute
    }
}

/// Sleep until the wall clock next passes `target_second` of a minute.
pub async fn align_to_minute_second(target_second: u32) {
    let now = Utc::now();
    let millis = millis_until_minute_second(
        now.second(),
        now.timestamp_subsec_millis(),
        target_second,
    );
    tokio::time::sleep(Duration::from_millis(millis)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_ahead_in_same_minute() {
        assert_eq!(millis_until_minute_second(10, 0, 30), 20_000);
        assert_eq!(millis_until_minute_second(29, 500, 30), 500);
    }

    #[test]
    fn target_behind_wraps_to_next_minute() {
        assert_eq!(millis_until_minute_second(30, 0, 30), 60_000);
        assert_eq!(millis_until_minute_second(45, 250, 0), 14_750);
        assert_eq!(millis_until_minute_second(59, 999, 0), 1);
    }

    #[test]
    fn never_zero_never_above_a_minute() {
        for second in 0..60 {
            for target in [0_u32, 30] {
                let millis = millis_until_minute_second(second, 123, target);
                assert!(millis > 0 && millis <= 60_000, "sec={second} target={target} → {millis}");
            }
        }
    }
}
