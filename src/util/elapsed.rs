use chrono::{DateTime, TimeZone, Utc};

/// Short "time since posted" label: `42m`, `5h`, `3d 4h`, `2w`.
///
/// `created_at_ms` is epoch milliseconds. Timestamps in the future read as `0m`.
pub fn elapsed_label(created_at_ms: i64, now: DateTime<Utc>) -> String {
    let Some(created) = Utc.timestamp_millis_opt(created_at_ms).single() else {
        return "0m".to_string();
    };
    let diff = (now - created).max(chrono::Duration::zero());

    let minutes = diff.num_minutes();
    let hours = diff.num_hours();
    let days = diff.num_days();

    if minutes < 60 {
        format!("{minutes}m")
    } else if hours < 24 {
        format!("{hours}h")
    } else if days < 7 {
        format!("{days}d {}h", hours % 24)
    } else {
        format!("{}w", days / 7)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).single().unwrap()
    }

    const MIN: i64 = 60_000;
    const HOUR: i64 = 60 * MIN;
    const DAY: i64 = 24 * HOUR;

    #[test]
    fn test_minutes() {
        let posted = 1_591_017_038_380;
        assert_eq!(elapsed_label(posted, at(posted)), "0m");
        assert_eq!(elapsed_label(posted, at(posted + 59 * MIN)), "59m");
    }

    #[test]
    fn test_hours() {
        let posted = 1_591_017_038_380;
        assert_eq!(elapsed_label(posted, at(posted + HOUR)), "1h");
        assert_eq!(elapsed_label(posted, at(posted + 23 * HOUR + 59 * MIN)), "23h");
    }

    #[test]
    fn test_days_carry_hours() {
        let posted = 1_591_017_038_380;
        assert_eq!(elapsed_label(posted, at(posted + 3 * DAY + 4 * HOUR)), "3d 4h");
        assert_eq!(elapsed_label(posted, at(posted + DAY)), "1d 0h");
    }

    #[test]
    fn test_weeks() {
        let posted = 1_591_017_038_380;
        assert_eq!(elapsed_label(posted, at(posted + 7 * DAY)), "1w");
        assert_eq!(elapsed_label(posted, at(posted + 20 * DAY)), "2w");
    }

    #[test]
    fn test_future_timestamp_clamps_to_zero() {
        let posted = 1_591_017_038_380;
        assert_eq!(elapsed_label(posted, at(posted - HOUR)), "0m");
    }
}
