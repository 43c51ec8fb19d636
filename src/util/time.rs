//! Short human descriptions of token lifetimes.

use chrono::{DateTime, TimeDelta, Utc};

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("{n} {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

/// Time left until `target`: `in 45s`, `in 12m`, `in 3h 5m`, `in 2 days`.
#[must_use]
pub fn format_countdown(target: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let left = target - now;
    if left <= TimeDelta::zero() {
        return "expired".to_string();
    }
    match (left.num_hours(), left.num_minutes() % 60) {
        (h, _) if h > 24 => format!("in {}", plural(h / 24, "day")),
        (0, 0) => format!("in {}s", left.num_seconds()),
        (0, m) => format!("in {m}m"),
        (h, m) => format!("in {h}h {m}m"),
    }
}

/// `target` relative to `now` at the coarsest nonzero unit, such as
/// `2 hours ago` or `1 day from now`. Under a minute is `just now`.
#[must_use]
pub fn format_relative_time(target: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = now - target;
    let span = delta.abs();
    if span < TimeDelta::minutes(1) {
        return "just now".to_string();
    }
    let amount = if span.num_days() > 0 {
        plural(span.num_days(), "day")
    } else if span.num_hours() > 0 {
        plural(span.num_hours(), "hour")
    } else {
        plural(span.num_minutes(), "minute")
    };
    let direction = if delta > TimeDelta::zero() { "ago" } else { "from now" };
    format!("{amount} {direction}")
}
