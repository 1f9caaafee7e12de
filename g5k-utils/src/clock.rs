//! Conversions between plain second counts and wall-clock notation.
//!
//! OAR expects walltimes as `HH:MM:SS`, where the hour field may exceed 24 for long
//! reservations. Nothing in here wraps around a day.

use time::{Duration, OffsetDateTime};

/// Split a number of seconds into `(hours, minutes, seconds)` using integer division only.
pub fn seconds_to_clock(seconds: u64) -> (u64, u64, u64) {
    let hours = seconds / 3600;
    let remainder = seconds % 3600;
    (hours, remainder / 60, remainder % 60)
}

/// Format a number of seconds as `HH:MM:SS`. Every field is zero-padded to two digits, and the
/// hours grow beyond two digits if needed.
pub fn format_clock(seconds: u64) -> String {
    let (hours, minutes, seconds) = seconds_to_clock(seconds);
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// Offset a timestamp by the given amount of hours, minutes and seconds. Returns `None` if the
/// result is not representable.
pub fn add_duration(
    timestamp: OffsetDateTime,
    hours: i64,
    minutes: i64,
    seconds: i64,
) -> Option<OffsetDateTime> {
    let total = hours
        .checked_mul(3600)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_add(seconds)?;
    timestamp.checked_add(Duration::seconds(total))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_seconds_to_clock() {
        assert_eq!(seconds_to_clock(0), (0, 0, 0));
        assert_eq!(seconds_to_clock(59), (0, 0, 59));
        assert_eq!(seconds_to_clock(60), (0, 1, 0));
        assert_eq!(seconds_to_clock(3661), (1, 1, 1));
        assert_eq!(seconds_to_clock(380), (0, 6, 20));
        assert_eq!(seconds_to_clock(90_000), (25, 0, 0));
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(3661), "01:01:01");
        assert_eq!(format_clock(0), "00:00:00");
        assert_eq!(format_clock(380), "00:06:20");
        // hours are not wrapped at 24
        assert_eq!(format_clock(100 * 3600 + 5), "100:00:05");
    }

    #[test]
    fn test_format_clock_fields() {
        for h in [0, 1, 9, 10, 23, 24, 99, 123] {
            for m in 0..60 {
                for s in [0, 1, 30, 59] {
                    assert_eq!(
                        format_clock(h * 3600 + m * 60 + s),
                        format!("{h:02}:{m:02}:{s:02}")
                    );
                }
            }
        }
    }

    #[test]
    fn test_add_duration() {
        let t = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(add_duration(t, 0, 0, 0), Some(t));
        assert_eq!(
            add_duration(t, 1, 2, 3),
            OffsetDateTime::from_unix_timestamp(1_700_000_000 + 3723).ok()
        );
        assert_eq!(
            add_duration(t, 0, 0, 380),
            OffsetDateTime::from_unix_timestamp(1_700_000_380).ok()
        );
        assert_eq!(
            add_duration(t, 0, 0, -60),
            OffsetDateTime::from_unix_timestamp(1_699_999_940).ok()
        );
    }

    #[test]
    fn test_add_duration_out_of_range() {
        let t = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(add_duration(t, i64::MAX, 0, 0), None);
        assert_eq!(add_duration(t, 0, i64::MIN, 0), None);
        assert_eq!(add_duration(t, 0, 0, i64::MAX), None);
        // representable as seconds, but beyond the supported year range
        assert_eq!(add_duration(t, 0, 0, u32::MAX as i64 * 100), None);
        assert_eq!(add_duration(t, 1, 59, 59 - i64::MAX), None);
    }
}
