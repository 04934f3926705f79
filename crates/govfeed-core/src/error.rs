use std::fmt::{Display, Formatter};

use thiserror::Error;

/// Validation errors raised while constructing configuration and request values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("base_url cannot be empty")]
    EmptyBaseUrl,
    #[error("base_url must start with http:// or https://: '{value}'")]
    InvalidBaseUrl { value: String },
    #[error("field '{field}' must be greater than zero")]
    NonPositive { field: &'static str },

    #[error("date range start {start} is after end {end}")]
    InvertedDateRange { start: String, end: String },
    #[error("date must be formatted as YYYY-MM-DD: '{value}'")]
    InvalidDate { value: String },

    #[error("invalid frequency '{value}', expected one of daily, weekly, monthly, quarterly, annual")]
    InvalidFrequency { value: String },
    #[error("invalid source '{value}', expected one of sec_edgar, fred, treasury")]
    InvalidSource { value: String },
    #[error("invalid environment '{value}', expected one of dev, staging, prod")]
    InvalidEnvironment { value: String },

    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("batch request must include at least one symbol")]
    EmptySymbolList,
}

/// Top-level error type for value construction and serialization.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Collector-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectorErrorKind {
    Authentication,
    Transport,
    TransportTimeout,
    RateLimitExceeded,
    MalformedResponse,
    InvalidSymbol,
    InvalidRequest,
    UnsupportedDataType,
    Configuration,
    Internal,
}

impl CollectorErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Transport => "transport",
            Self::TransportTimeout => "transport_timeout",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::MalformedResponse => "malformed_response",
            Self::InvalidSymbol => "invalid_symbol",
            Self::InvalidRequest => "invalid_request",
            Self::UnsupportedDataType => "unsupported_data_type",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }

    /// Transport-class failures are the ones a collector may retry.
    pub const fn is_transport(self) -> bool {
        matches!(self, Self::Transport | Self::TransportTimeout)
    }
}

impl Display for CollectorErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured collector error returned by lifecycle and collection operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorError {
    kind: CollectorErrorKind,
    message: String,
    retryable: bool,
}

impl CollectorError {
    pub fn new(kind: CollectorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.is_transport() || kind == CollectorErrorKind::RateLimitExceeded,
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self {
            kind: CollectorErrorKind::Authentication,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: CollectorErrorKind::Transport,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: CollectorErrorKind::TransportTimeout,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: CollectorErrorKind::RateLimitExceeded,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            kind: CollectorErrorKind::MalformedResponse,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn invalid_symbol(symbol: &str) -> Self {
        Self {
            kind: CollectorErrorKind::InvalidSymbol,
            message: format!("'{symbol}' is not a known identifier for this source"),
            retryable: false,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: CollectorErrorKind::InvalidRequest,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn unsupported_data_type(data_type: &str, source: &str) -> Self {
        Self {
            kind: CollectorErrorKind::UnsupportedDataType,
            message: format!("data type '{data_type}' is not supported by {source}"),
            retryable: false,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self {
            kind: CollectorErrorKind::Configuration,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: CollectorErrorKind::Internal,
            message: message.into(),
            retryable: false,
        }
    }

    pub const fn kind(&self) -> CollectorErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            CollectorErrorKind::Authentication => "collector.authentication",
            CollectorErrorKind::Transport => "collector.transport",
            CollectorErrorKind::TransportTimeout => "collector.transport_timeout",
            CollectorErrorKind::RateLimitExceeded => "collector.rate_limit_exceeded",
            CollectorErrorKind::MalformedResponse => "collector.malformed_response",
            CollectorErrorKind::InvalidSymbol => "collector.invalid_symbol",
            CollectorErrorKind::InvalidRequest => "collector.invalid_request",
            CollectorErrorKind::UnsupportedDataType => "collector.unsupported_data_type",
            CollectorErrorKind::Configuration => "collector.configuration",
            CollectorErrorKind::Internal => "collector.internal",
        }
    }
}

impl Display for CollectorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for CollectorError {}

impl From<ValidationError> for CollectorError {
    fn from(error: ValidationError) -> Self {
        Self::invalid_request(error.to_string())
    }
}
