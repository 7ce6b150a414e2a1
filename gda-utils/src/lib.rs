//! Shared utility functions for GDA crates.

/// Date utility functions
pub mod dates {
    use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

    /// Date format used on the command line and in albedo tables: "YYYY-MM-DD"
    pub const DATE_FORMAT: &str = "%Y-%m-%d";

    /// Timestamp format used in output tables: "YYYY-MM-DD HH:MM"
    pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M";

    /// Hourly slice stamp used in gridded file names: "YYYYMMDDHH"
    pub const SLICE_STAMP_FORMAT: &str = "%Y%m%d%H";

    /// Format a NaiveDate as "YYYY-MM-DD"
    pub fn format_date(date: &NaiveDate) -> String {
        date.format(DATE_FORMAT).to_string()
    }

    /// Format a timestamp as "YYYY-MM-DD HH:MM"
    pub fn format_datetime(timestamp: &NaiveDateTime) -> String {
        timestamp.format(DATETIME_FORMAT).to_string()
    }

    /// Parse a date string in "YYYY-MM-DD" format
    pub fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
        Ok(NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)?)
    }

    /// Parse either "YYYY-MM-DD HH:MM", "YYYY-MM-DDTHH:MM" or a bare "YYYY-MM-DD"
    /// (midnight).
    pub fn parse_datetime(s: &str) -> anyhow::Result<NaiveDateTime> {
        let s = s.trim();
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, DATETIME_FORMAT) {
            return Ok(ts);
        }
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M") {
            return Ok(ts);
        }
        let date = parse_date(s)?;
        Ok(date.and_time(NaiveTime::MIN))
    }

    /// Format the hourly slice stamp of a timestamp, e.g. 2023-07-01 05:00 -> "2023070105"
    pub fn format_slice_stamp(timestamp: &NaiveDateTime) -> String {
        timestamp.format(SLICE_STAMP_FORMAT).to_string()
    }

    /// Parse a "YYYYMMDDHH" slice stamp.
    pub fn parse_slice_stamp(s: &str) -> anyhow::Result<NaiveDateTime> {
        let s = s.trim();
        if s.len() != 10 {
            anyhow::bail!("slice stamp must be 10 digits, got {s:?}");
        }
        let date = NaiveDate::parse_from_str(&s[..8], "%Y%m%d")?;
        let hour: u32 = s[8..].parse()?;
        date.and_hms_opt(hour, 0, 0)
            .ok_or_else(|| anyhow::anyhow!("hour out of range in slice stamp {s:?}"))
    }

    /// An iterator that yields timestamps from the start through the end
    /// (inclusive), advancing by a fixed step.
    #[derive(Clone, Eq, PartialEq, Copy, Debug)]
    pub struct HourRange {
        next: NaiveDateTime,
        end: NaiveDateTime,
        step: Duration,
    }

    impl HourRange {
        /// Hourly range from `start` to `end` inclusive.
        pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
            Self::with_step(start, end, 1)
        }

        /// Range stepping by `step_hours`; a step of zero is treated as one hour.
        pub fn with_step(start: NaiveDateTime, end: NaiveDateTime, step_hours: u32) -> Self {
            HourRange {
                next: start,
                end,
                step: Duration::hours(i64::from(step_hours.max(1))),
            }
        }
    }

    impl Iterator for HourRange {
        type Item = NaiveDateTime;
        fn next(&mut self) -> Option<Self::Item> {
            if self.next <= self.end {
                let current = self.next;
                self.next = current + self.step;
                Some(current)
            } else {
                None
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use chrono::NaiveDate;

        fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
            NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(h, 0, 0)
                .unwrap()
        }

        #[test]
        fn test_hour_range_iteration() {
            let hours: Vec<NaiveDateTime> = HourRange::new(at(2023, 7, 1, 22), at(2023, 7, 2, 1)).collect();
            assert_eq!(hours.len(), 4);
            assert_eq!(hours[0], at(2023, 7, 1, 22));
            assert_eq!(hours[3], at(2023, 7, 2, 1));
        }

        #[test]
        fn test_hour_range_step_and_empty() {
            let hours: Vec<NaiveDateTime> =
                HourRange::with_step(at(2023, 7, 1, 0), at(2023, 7, 1, 6), 3).collect();
            assert_eq!(hours, vec![at(2023, 7, 1, 0), at(2023, 7, 1, 3), at(2023, 7, 1, 6)]);

            let empty: Vec<NaiveDateTime> = HourRange::new(at(2023, 7, 2, 0), at(2023, 7, 1, 0)).collect();
            assert!(empty.is_empty());
        }

        #[test]
        fn test_slice_stamp() {
            let ts = at(2023, 7, 1, 5);
            assert_eq!(format_slice_stamp(&ts), "2023070105");
            assert_eq!(parse_slice_stamp("2023070105").unwrap(), ts);
            assert!(parse_slice_stamp("20230701").is_err());
            assert!(parse_slice_stamp("2023070125").is_err());
        }

        #[test]
        fn test_parse_datetime_variants() {
            assert_eq!(parse_datetime("2023-07-01 05:00").unwrap(), at(2023, 7, 1, 5));
            assert_eq!(parse_datetime("2023-07-01T05:00").unwrap(), at(2023, 7, 1, 5));
            assert_eq!(parse_datetime("2023-07-01").unwrap(), at(2023, 7, 1, 0));
            assert!(parse_datetime("July 1st").is_err());
        }

        #[test]
        fn test_format_and_parse_date() {
            let date = NaiveDate::from_ymd_opt(2023, 6, 15).unwrap();
            let formatted = format_date(&date);
            assert_eq!(formatted, "2023-06-15");
            assert_eq!(parse_date(&formatted).unwrap(), date);
        }
    }
}
