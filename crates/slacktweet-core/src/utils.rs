use std::time::Duration;

use chrono::Utc;

/// RFC3339 timestamp in UTC (for logs/banners).
pub fn iso_timestamp_utc() -> String {
    Utc::now().to_rfc3339()
}

/// `1d 2h 3m 4s`, leading zero units omitted; always at least seconds.
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let mins = (total % 3600) / 60;
    let secs = total % 60;

    if days > 0 {
        return format!("{days}d {hours}h {mins}m {secs}s");
    }
    if hours > 0 {
        return format!("{hours}h {mins}m {secs}s");
    }
    if mins > 0 {
        return format!("{mins}m {secs}s");
    }
    format!("{secs}s")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_millis(1_999)), "1s");
        assert_eq!(format_duration(Duration::from_secs(61)), "1m 1s");
        assert_eq!(format_duration(Duration::from_secs(3_600)), "1h 0m 0s");
        assert_eq!(
            format_duration(Duration::from_secs(90_061)),
            "1d 1h 1m 1s"
        );
    }

    #[test]
    fn timestamp_is_rfc3339() {
        assert!(chrono::DateTime::parse_from_rfc3339(&iso_timestamp_utc()).is_ok());
    }
}
