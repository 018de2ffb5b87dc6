use std::time::Duration;

const TEN_SECONDS: Duration = Duration::from_secs(10);

/// Format an elapsed time for a node header.
///
/// - under 10s: tenths of a second, e.g. `3.4s`
/// - under a minute: whole seconds, e.g. `45s`
/// - under an hour: `MM:SS`, e.g. `02:15`
/// - otherwise: `HH:MM:SS`, e.g. `01:01:02`
pub fn format_duration(d: Duration) -> String {
    if d < TEN_SECONDS {
        return format!("{:.1}s", d.as_millis() as f64 / 1000.0);
    }

    let secs = d.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{:02}:{:02}", secs / 60, secs % 60)
    } else {
        format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration_zero() {
        assert_eq!(format_duration(Duration::ZERO), "0.0s");
    }

    #[test]
    fn test_format_duration_tenths() {
        assert_eq!(format_duration(Duration::from_millis(3400)), "3.4s");
        assert_eq!(format_duration(Duration::from_millis(1234)), "1.2s");
    }

    #[test]
    fn test_format_duration_ignores_sub_millisecond() {
        let d = Duration::from_millis(2500) + Duration::from_micros(999);
        assert_eq!(format_duration(d), "2.5s");
    }

    #[test]
    fn test_format_duration_ten_second_edge() {
        assert_eq!(format_duration(Duration::from_millis(9999)), "10.0s");
        assert_eq!(format_duration(Duration::from_millis(10000)), "10s");
    }

    #[test]
    fn test_format_duration_whole_seconds_floor() {
        assert_eq!(format_duration(Duration::from_millis(45_900)), "45s");
        assert_eq!(format_duration(Duration::from_millis(59_999)), "59s");
    }

    #[test]
    fn test_format_duration_minutes() {
        assert_eq!(format_duration(Duration::from_secs(60)), "01:00");
        assert_eq!(format_duration(Duration::from_secs(135)), "02:15");
        assert_eq!(format_duration(Duration::from_secs(3599)), "59:59");
    }

    #[test]
    fn test_format_duration_hours_are_modulo_reduced() {
        assert_eq!(format_duration(Duration::from_secs(3600)), "01:00:00");
        assert_eq!(format_duration(Duration::from_secs(3662)), "01:01:02");
        assert_eq!(format_duration(Duration::from_secs(36_000 + 59 * 60 + 59)), "10:59:59");
    }
}
