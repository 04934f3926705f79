use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::Date;

use super::date_range::iso_date;

/// Observed value: numeric for series and yields, text for categorical rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObservationValue {
    Number(f64),
    Text(String),
}

impl ObservationValue {
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Number(_) => None,
            Self::Text(value) => Some(value),
        }
    }
}

impl Display for ObservationValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<f64> for ObservationValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for ObservationValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for ObservationValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// One normalized row: identifier, calendar date, value, source-specific extras.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub symbol: String,
    #[serde(with = "iso_date")]
    pub date: Date,
    pub value: ObservationValue,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, Value>,
}

impl Observation {
    pub fn new(symbol: impl Into<String>, date: Date, value: impl Into<ObservationValue>) -> Self {
        Self {
            symbol: symbol.into(),
            date,
            value: value.into(),
            extras: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }

    /// Inserts `value` only when present; `None` leaves extras untouched.
    pub fn with_optional_extra<V: Into<Value>>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.with_extra(key, value),
            None => self,
        }
    }

    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extras.get(key)
    }
}
