//! # Domain Models
//!
//! Value types shared by every collector.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`DateRange`] | Inclusive calendar range, `start <= end` |
//! | [`DataFrequency`] | Resampling granularity with period bucketing |
//! | [`Observation`] | One normalized row (symbol, date, value, extras) |
//! | [`ObservationTable`] | Rows ordered by symbol, then date |
//! | [`Aggregation`] | Per-period reduction used when resampling |
//!
//! Construction validates invariants; invalid values surface as
//! [`ValidationError`](crate::ValidationError).

mod date_range;
mod frequency;
mod observation;
mod table;

pub use date_range::{format_date, iso_date, parse_date, DateRange};
pub use frequency::DataFrequency;
pub use observation::{Observation, ObservationValue};
pub use table::{Aggregation, ObservationTable};
