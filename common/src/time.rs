use chrono::Utc;

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Seconds → milliseconds, saturating.
pub fn secs_to_ms(secs: u64) -> u64 {
    secs.saturating_mul(1_000)
}
