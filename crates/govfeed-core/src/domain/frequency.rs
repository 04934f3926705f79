use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{Date, Duration, Month};

use crate::error::ValidationError;

/// Resampling granularity for batch collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFrequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Annual,
}

impl DataFrequency {
    pub const ALL: [Self; 5] = [
        Self::Daily,
        Self::Weekly,
        Self::Monthly,
        Self::Quarterly,
        Self::Annual,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Annual => "annual",
        }
    }

    /// First day of the period that contains `date`. Weeks start on Monday.
    pub fn period_start(self, date: Date) -> Date {
        match self {
            Self::Daily => date,
            Self::Weekly => {
                let offset = i64::from(date.weekday().number_days_from_monday());
                date.checked_sub(Duration::days(offset)).unwrap_or(date)
            }
            Self::Monthly => date.replace_day(1).unwrap_or(date),
            Self::Quarterly => {
                let first_month = (u8::from(date.month()) - 1) / 3 * 3 + 1;
                Month::try_from(first_month)
                    .and_then(|month| Date::from_calendar_date(date.year(), month, 1))
                    .unwrap_or(date)
            }
            Self::Annual => Date::from_ordinal_date(date.year(), 1).unwrap_or(date),
        }
    }
}

impl Display for DataFrequency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataFrequency {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "daily" | "d" => Ok(Self::Daily),
            "weekly" | "w" => Ok(Self::Weekly),
            "monthly" | "m" => Ok(Self::Monthly),
            "quarterly" | "q" => Ok(Self::Quarterly),
            "annual" | "yearly" | "a" => Ok(Self::Annual),
            other => Err(ValidationError::InvalidFrequency {
                value: other.to_owned(),
            }),
        }
    }
}
