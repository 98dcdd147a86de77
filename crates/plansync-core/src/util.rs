//! Small shared helpers

/// Current wall-clock time as Unix milliseconds
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
