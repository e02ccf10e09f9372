/// Returns a string representing a duration like "1m15s" or "1.50s", for
/// human-mode output lines such as "circuit opened 1m15s ago".
pub fn format_duration(duration: std::time::Duration) -> String {
    let millis = duration.as_millis() as i64;
    format_elapsed_millis(millis)
}

fn format_elapsed_millis(millis: i64) -> String {
    if millis < 1000 {
        format!("{}ms", millis)
    } else if millis < 60_000 {
        format!("{:.2}s", millis as f64 / 1000.0)
    } else {
        let minutes = millis / 60_000;
        let seconds = (millis % 60_000) / 1000;
        format!("{minutes}m{seconds:02}s")
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn subsecond_durations_render_as_milliseconds() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(0)), "0ms");
    }

    #[test]
    fn durations_under_a_minute_render_with_two_decimal_seconds() {
        assert_eq!(format_duration(Duration::from_millis(1_500)), "1.50s");
        assert_eq!(format_duration(Duration::from_millis(59_999)), "60.00s");
    }

    #[test]
    fn durations_of_a_minute_or_more_render_as_mmss() {
        assert_eq!(format_duration(Duration::from_millis(75_000)), "1m15s");
        assert_eq!(format_duration(Duration::from_millis(60_000)), "1m00s");
        assert_eq!(format_duration(Duration::from_millis(3_601_000)), "60m01s");
    }
}
