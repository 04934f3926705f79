use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, Duration};

use crate::error::ValidationError;

const ISO_DATE: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Parses a `YYYY-MM-DD` calendar date.
pub fn parse_date(value: &str) -> Result<Date, ValidationError> {
    Date::parse(value.trim(), ISO_DATE).map_err(|_| ValidationError::InvalidDate {
        value: value.to_owned(),
    })
}

/// Formats a date as `YYYY-MM-DD`.
pub fn format_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// Serde adapter for `YYYY-MM-DD` dates.
pub mod iso_date {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    pub fn serialize<S: Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_date(*date))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_date(&raw).map_err(serde::de::Error::custom)
    }
}

/// Inclusive calendar date range. `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "DateRangeRepr", into = "DateRangeRepr")]
pub struct DateRange {
    start: Date,
    end: Date,
}

impl DateRange {
    pub fn new(start: Date, end: Date) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvertedDateRange {
                start: format_date(start),
                end: format_date(end),
            });
        }

        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, ValidationError> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    /// The `days` calendar days ending at `today`, inclusive of both ends.
    pub fn trailing_days(days: u32, today: Date) -> Self {
        let start = today
            .checked_sub(Duration::days(i64::from(days)))
            .unwrap_or(Date::MIN);
        Self { start, end: today }
    }

    pub const fn single_day(date: Date) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub const fn start_date(&self) -> Date {
        self.start
    }

    pub const fn end_date(&self) -> Date {
        self.end
    }

    pub fn contains(&self, date: Date) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn overlaps(&self, start: Date, end: Date) -> bool {
        start <= self.end && self.start <= end
    }

    /// Number of calendar days covered, counting both ends.
    pub fn days(&self) -> i64 {
        (self.end - self.start).whole_days() + 1
    }
}

impl Display for DateRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", format_date(self.start), format_date(self.end))
    }
}

#[derive(Serialize, Deserialize)]
struct DateRangeRepr {
    start_date: String,
    end_date: String,
}

impl TryFrom<DateRangeRepr> for DateRange {
    type Error = ValidationError;

    fn try_from(value: DateRangeRepr) -> Result<Self, Self::Error> {
        Self::parse(&value.start_date, &value.end_date)
    }
}

impl From<DateRange> for DateRangeRepr {
    fn from(value: DateRange) -> Self {
        Self {
            start_date: format_date(value.start),
            end_date: format_date(value.end),
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    #[test]
    fn rejects_inverted_range() {
        let error = DateRange::new(date!(2024 - 02 - 01), date!(2024 - 01 - 01))
            .expect_err("start after end must fail");

        assert_eq!(
            error,
            ValidationError::InvertedDateRange {
                start: String::from("2024-02-01"),
                end: String::from("2024-01-01"),
            }
        );
    }

    #[test]
    fn contains_is_inclusive_on_both_ends() {
        let range = DateRange::parse("2024-01-01", "2024-01-31").expect("valid range");

        assert!(range.contains(date!(2024 - 01 - 01)));
        assert!(range.contains(date!(2024 - 01 - 31)));
        assert!(!range.contains(date!(2024 - 02 - 01)));
        assert_eq!(range.days(), 31);
    }

    #[test]
    fn trailing_days_ends_today() {
        let range = DateRange::trailing_days(30, date!(2024 - 03 - 31));

        assert_eq!(range.start_date(), date!(2024 - 03 - 01));
        assert_eq!(range.end_date(), date!(2024 - 03 - 31));
    }

    #[test]
    fn serializes_as_iso_strings() {
        let range = DateRange::parse("2023-12-29", "2024-01-05").expect("valid range");
        let json = serde_json::to_string(&range).expect("serialize");

        assert_eq!(json, r#"{"start_date":"2023-12-29","end_date":"2024-01-05"}"#);
        let parsed: DateRange = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, range);
    }

    #[test]
    fn rejects_malformed_dates() {
        assert!(matches!(
            parse_date("01/02/2024"),
            Err(ValidationError::InvalidDate { .. })
        ));
    }
}
