//! Warm-up limit calculation

/// Daily send cap for a sender on `current_day` of its warm-up.
///
/// During warm-up the cap ramps linearly from 10% of `daily_limit` on day 1
/// to 100% on day `warm_up_days`. Once warm-up is over (or when there is
/// none) the full `daily_limit` applies. The result is never below 1 for a
/// sender with capacity, and 0 when `daily_limit <= 0`.
pub fn effective_limit(daily_limit: i32, current_day: i32, warm_up_days: i32) -> i32 {
    if daily_limit <= 0 {
        return 0;
    }
    if warm_up_days <= 1 || current_day > warm_up_days {
        return daily_limit;
    }

    let day = i64::from(current_day.max(1));
    let span = i64::from(warm_up_days) - 1;
    // floor(daily * (0.10 + 0.90 * (day - 1) / span)) in integer arithmetic
    let numerator = i64::from(daily_limit) * (10 * span + 90 * (day - 1));
    let limit = numerator / (100 * span);

    limit.clamp(1, i64::from(daily_limit)) as i32
}
