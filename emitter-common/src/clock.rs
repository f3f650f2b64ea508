use std::time::{SystemTime, UNIX_EPOCH};

/// Convert a `SystemTime` to milliseconds since Unix epoch.
///
/// Returns 0 for times before the epoch.
pub fn system_time_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_system_time_millis() {
        let time = UNIX_EPOCH + Duration::from_millis(1_234_567_890_123);
        assert_eq!(system_time_millis(time), 1_234_567_890_123);
    }

    #[test]
    fn test_before_epoch_is_zero() {
        let time = UNIX_EPOCH - Duration::from_secs(10);
        assert_eq!(system_time_millis(time), 0);
    }

    #[test]
    fn test_now_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(system_time_millis(SystemTime::now()) > 1_577_836_800_000);
    }
}
