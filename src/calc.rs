use std::fmt;
use std::time::Duration;

/// Percent string reported once a stream has reached its last known height.
pub const COMPLETE_PERCENT: &str = "100.00%";

/// Highest percentage reported for a stream that has not reached its end,
/// so that only a finished stream ever reads as 100.00%.
const MAX_INCOMPLETE_PERCENT: f64 = 99.99;

const SECONDS_PER_DAY: u64 = 86_400;

/// Estimated time until a stream reaches its last known height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eta {
    /// Already at or past the last known height.
    Live,
    /// No measurable progress yet, so no estimate exists.
    Unknown,
    /// Remaining time, truncated to whole seconds.
    Remaining(Duration),
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => f.write_str("live"),
            Self::Unknown => f.write_str("unknown"),
            Self::Remaining(d) => f.write_str(&format_duration(*d)),
        }
    }
}

/// Events per second over `elapsed`, measured at millisecond resolution.
///
/// Returns 0.0 when less than a millisecond has elapsed.
pub fn rate_per_sec(count: u64, elapsed: Duration) -> f64 {
    let millis = elapsed.as_millis();
    if millis == 0 {
        return 0.0;
    }

    1000.0 * count as f64 / millis as f64
}

/// Completion of `height` within `[first, last]`, formatted with two decimals.
///
/// A zero-width range counts as complete.
pub fn percent_complete(height: i64, first: i64, last: i64) -> String {
    if height >= last || last <= first {
        return COMPLETE_PERCENT.to_string();
    }

    let ratio = (height - first) as f64 / (last - first) as f64;
    let percent = (100.0 * ratio).clamp(0.0, MAX_INCOMPLETE_PERCENT);

    format!("{percent:.2}%")
}

/// Time left until `height` reaches `last` at `avg_speed` events per second.
pub fn eta(height: i64, first: i64, last: i64, avg_speed: f64) -> Eta {
    if height >= last || last <= first {
        return Eta::Live;
    }

    if !avg_speed.is_finite() || avg_speed <= 0.0 {
        return Eta::Unknown;
    }

    let secs = (last - height) as f64 / avg_speed;
    if !secs.is_finite() {
        return Eta::Unknown;
    }

    // Float-to-int casts saturate and truncate toward zero.
    Eta::Remaining(Duration::from_secs(secs as u64))
}

/// Left-pads `s` with zeros up to `width` characters.
pub fn pad_leading_zeros(s: &str, width: usize) -> String {
    if s.len() >= width {
        return s.to_string();
    }

    let mut out = "0".repeat(width - s.len());
    out.push_str(s);
    out
}

/// Formats `n` in decimal, zero-padded to `width` digits. The sign of a
/// negative number is placed before the padding.
pub fn int_with_leading_zeros(n: i64, width: usize) -> String {
    let digits = pad_leading_zeros(&n.unsigned_abs().to_string(), width);
    if n < 0 {
        format!("-{digits}")
    } else {
        digits
    }
}

/// Formats a duration as `HH:MM:SS`, with a `Nd ` prefix past one day.
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let days = total / SECONDS_PER_DAY;
    let rem = total % SECONDS_PER_DAY;

    let hms = format!(
        "{}:{}:{}",
        int_with_leading_zeros((rem / 3600) as i64, 2),
        int_with_leading_zeros((rem % 3600 / 60) as i64, 2),
        int_with_leading_zeros((rem % 60) as i64, 2),
    );

    if days > 0 {
        format!("{days}d {hms}")
    } else {
        hms
    }
}

/// Truncates a duration to whole seconds.
pub fn truncate_to_secs(d: Duration) -> Duration {
    Duration::from_secs(d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_per_sec() {
        assert_eq!(rate_per_sec(10, Duration::from_secs(2)), 5.0);
        assert_eq!(rate_per_sec(3, Duration::from_millis(1500)), 2.0);
    }

    #[test]
    fn test_rate_per_sec_zero_elapsed() {
        assert_eq!(rate_per_sec(100, Duration::ZERO), 0.0);
        assert_eq!(rate_per_sec(100, Duration::from_micros(999)), 0.0);
    }

    #[test]
    fn test_percent_complete() {
        assert_eq!(percent_complete(50, 0, 200), "25.00%");
        assert_eq!(percent_complete(110, 100, 400), "3.33%");
        assert_eq!(percent_complete(100, 100, 400), "0.00%");
    }

    #[test]
    fn test_percent_complete_at_or_past_end() {
        assert_eq!(percent_complete(200, 0, 200), COMPLETE_PERCENT);
        assert_eq!(percent_complete(250, 0, 200), COMPLETE_PERCENT);
    }

    #[test]
    fn test_percent_complete_degenerate_range() {
        assert_eq!(percent_complete(5, 7, 7), COMPLETE_PERCENT);
        assert_eq!(percent_complete(7, 7, 7), COMPLETE_PERCENT);
    }

    #[test]
    fn test_percent_complete_never_rounds_up_to_complete() {
        assert_eq!(percent_complete(999_999, 0, 1_000_000), "99.99%");
    }

    #[test]
    fn test_percent_complete_below_first_clamps_to_zero() {
        assert_eq!(percent_complete(5, 10, 20), "0.00%");
    }

    #[test]
    fn test_percent_complete_monotonic() {
        let mut prev = -1.0f64;
        for height in 0..=1000 {
            let pct = percent_complete(height, 0, 1000);
            let value: f64 = pct.trim_end_matches('%').parse().expect("numeric percent");
            assert!(value >= prev, "height={height} pct={pct} prev={prev}");
            prev = value;
        }
        assert_eq!(percent_complete(1000, 0, 1000), COMPLETE_PERCENT);
    }

    #[test]
    fn test_eta() {
        assert_eq!(
            eta(100, 0, 400, 10.0),
            Eta::Remaining(Duration::from_secs(30))
        );
        // 7 / 2 = 3.5s, truncated.
        assert_eq!(eta(3, 0, 10, 2.0), Eta::Remaining(Duration::from_secs(3)));
    }

    #[test]
    fn test_eta_live() {
        assert_eq!(eta(400, 0, 400, 0.0), Eta::Live);
        assert_eq!(eta(9, 9, 9, 0.0), Eta::Live);
    }

    #[test]
    fn test_eta_unknown_without_speed() {
        assert_eq!(eta(1, 0, 400, 0.0), Eta::Unknown);
        assert_eq!(eta(1, 0, 400, f64::NAN), Eta::Unknown);
        assert_eq!(eta(1, 0, 400, -1.0), Eta::Unknown);
    }

    #[test]
    fn test_eta_display() {
        assert_eq!(Eta::Live.to_string(), "live");
        assert_eq!(Eta::Unknown.to_string(), "unknown");
        assert_eq!(
            Eta::Remaining(Duration::from_secs(3725)).to_string(),
            "01:02:05"
        );
    }

    #[test]
    fn test_pad_leading_zeros() {
        assert_eq!(pad_leading_zeros("42", 5), "00042");
        assert_eq!(pad_leading_zeros("123456", 3), "123456");
        assert_eq!(pad_leading_zeros("", 2), "00");
    }

    #[test]
    fn test_int_with_leading_zeros() {
        assert_eq!(int_with_leading_zeros(7, 3), "007");
        assert_eq!(int_with_leading_zeros(1234, 2), "1234");
        assert_eq!(int_with_leading_zeros(-5, 3), "-005");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "00:00:00");
        assert_eq!(format_duration(Duration::from_millis(59_999)), "00:00:59");
        assert_eq!(
            format_duration(Duration::from_secs(2 * 86_400 + 3 * 3600 + 4)),
            "2d 03:00:04"
        );
    }

    #[test]
    fn test_truncate_to_secs() {
        assert_eq!(
            truncate_to_secs(Duration::from_millis(2_999)),
            Duration::from_secs(2)
        );
    }
}
