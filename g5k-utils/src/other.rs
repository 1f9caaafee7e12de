//! Module containing some utility functions that didn't fit anywhere else.

use time::{format_description::BorrowedFormatItem, macros::format_description, OffsetDateTime};

const FILE_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]-[hour]-[minute]-[second]");
const NAME_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]-[hour]:[minute]:[second]");
const TIME_OF_DAY_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[hour]:[minute]:[second]");

/// Current time in the local timezone, falling back to UTC if the offset cannot be determined.
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn format_with(timestamp: OffsetDateTime, format: &[BorrowedFormatItem<'_>]) -> String {
    timestamp.format(format).unwrap_or_else(|e| {
        log::debug!("Cannot format {timestamp}: {e}");
        timestamp.to_string()
    })
}

/// Produces a timestamp `String` in YYYY-MM-DD-HH-mm-SS format, safe to use in file names.
pub fn get_timestamp(timestamp: OffsetDateTime) -> String {
    format_with(timestamp, FILE_FORMAT)
}

/// Produces a timestamp `String` in YYYY-MM-DD-HH:mm:SS format, as used in experiment names.
pub fn get_datetime_string(timestamp: OffsetDateTime) -> String {
    format_with(timestamp, NAME_FORMAT)
}

/// HH:mm:SS of the given timestamp.
pub fn format_time_of_day(timestamp: OffsetDateTime) -> String {
    format_with(timestamp, TIME_OF_DAY_FORMAT)
}

#[cfg(test)]
mod test {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_formats() {
        let t = datetime!(2024-03-05 07:08:09 UTC);
        assert_eq!(get_timestamp(t), "2024-03-05-07-08-09");
        assert_eq!(get_datetime_string(t), "2024-03-05-07:08:09");
        assert_eq!(format_time_of_day(t), "07:08:09");
    }
}
