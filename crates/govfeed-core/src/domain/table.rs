use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::date_range::format_date;
use crate::error::CoreError;
use super::frequency::DataFrequency;
use super::observation::{Observation, ObservationValue};

/// How rows falling into the same resampling period are reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Point-in-time series: keep the last observation of the period.
    Last,
    Mean,
    Sum,
    /// Categorical rows: number of observations in the period.
    Count,
}

impl Aggregation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Last => "last",
            Self::Mean => "mean",
            Self::Sum => "sum",
            Self::Count => "count",
        }
    }

    /// Reduces chronologically sorted rows of one symbol into one row per period.
    ///
    /// Each reduced row keeps the date of the last observation in its period and
    /// records `period_start` and `observations` in its extras.
    pub fn resample(self, rows: Vec<Observation>, frequency: DataFrequency) -> Vec<Observation> {
        let mut reduced = Vec::new();
        let mut bucket: Vec<Observation> = Vec::new();
        let mut bucket_start = None;

        for row in rows {
            let start = frequency.period_start(row.date);
            if let Some(current) = bucket_start.filter(|current| *current != start) {
                reduced.extend(self.reduce(std::mem::take(&mut bucket), current));
            }
            bucket_start = Some(start);
            bucket.push(row);
        }
        if let Some(current) = bucket_start {
            reduced.extend(self.reduce(bucket, current));
        }

        reduced
    }

    fn reduce(self, bucket: Vec<Observation>, period_start: time::Date) -> Option<Observation> {
        let count = bucket.len();
        let numbers: Vec<f64> = bucket
            .iter()
            .filter_map(|row| row.value.as_number())
            .collect();
        let last = bucket.into_iter().last()?;

        let mut row = match self {
            Self::Last => last,
            Self::Mean | Self::Sum if numbers.is_empty() => last,
            Self::Mean => {
                let mean = numbers.iter().sum::<f64>() / numbers.len() as f64;
                Observation::new(last.symbol, last.date, mean)
            }
            Self::Sum => Observation::new(last.symbol, last.date, numbers.iter().sum::<f64>()),
            Self::Count => Observation::new(last.symbol, last.date, ObservationValue::Number(count as f64)),
        };

        row.extras.insert(
            String::from("period_start"),
            Value::String(format_date(period_start)),
        );
        row.extras
            .insert(String::from("observations"), Value::from(count as u64));
        Some(row)
    }
}

/// Canonical tabular result: rows grouped by symbol in request order, each group
/// in chronological order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationTable {
    rows: Vec<Observation>,
}

impl ObservationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the rows of the next symbol. Rows are stably sorted by date, so
    /// same-day rows keep their source order.
    pub fn push_symbol(&mut self, mut rows: Vec<Observation>) {
        rows.sort_by_key(|row| row.date);
        self.rows.extend(rows);
    }

    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Observation> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn for_symbol<'a>(&'a self, symbol: &'a str) -> impl Iterator<Item = &'a Observation> + 'a {
        self.rows.iter().filter(move |row| row.symbol == symbol)
    }

    pub fn last_for(&self, symbol: &str) -> Option<&Observation> {
        self.rows.iter().rev().find(|row| row.symbol == symbol)
    }

    /// Distinct symbols in table order.
    pub fn symbols(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for row in &self.rows {
            if !seen.contains(&row.symbol.as_str()) {
                seen.push(&row.symbol);
            }
        }
        seen
    }

    /// Serializes the rows as a JSON array.
    pub fn to_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string(&self.rows)?)
    }
}

impl IntoIterator for ObservationTable {
    type Item = Observation;
    type IntoIter = std::vec::IntoIter<Observation>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}
