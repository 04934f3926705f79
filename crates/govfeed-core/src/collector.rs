//! Caller-facing collector contract and its request/result types.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use crate::config::Environment;
use crate::data_source::SourceKind;
use crate::domain::{DataFrequency, DateRange, Observation, ObservationTable};
use crate::error::{CollectorError, CollectorErrorKind, ValidationError};
use crate::throttling::RateLimitStatus;

pub type CollectorFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Uniform operation set implemented by every government data collector.
pub trait Collector: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn source_name(&self) -> &'static str;

    fn requires_api_key(&self) -> bool;

    fn supported_data_types(&self) -> Vec<&'static str>;

    fn info(&self) -> CollectorInfo;

    /// Confirms credentials or reachability. Expected failures yield `false`.
    fn authenticate<'a>(&'a self) -> CollectorFuture<'a, bool>;

    /// One lightweight round trip. Only transport failures are raised.
    fn test_connection<'a>(&'a self) -> CollectorFuture<'a, Result<ConnectionReport, CollectorError>>;

    fn get_rate_limits(&self) -> RateLimitStatus;

    fn validate_symbols<'a>(&'a self, symbols: &'a [String]) -> CollectorFuture<'a, ValidationResult>;

    fn collect_batch<'a>(
        &'a self,
        request: BatchRequest,
    ) -> CollectorFuture<'a, Result<BatchOutcome, CollectorError>>;

    fn get_latest_observation<'a>(
        &'a self,
        symbol: &'a str,
    ) -> CollectorFuture<'a, Result<Option<Observation>, CollectorError>>;
}

/// Cooperative cancellation handle shared between a caller and a running batch.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A validated batch: at least one symbol, none blank. Built only through
/// [`BatchRequest::new`].
///
/// ```compile_fail
/// use govfeed_core::{BatchRequest, DateRange};
///
/// let range = DateRange::parse("2024-01-01", "2024-01-31").unwrap();
/// let request = BatchRequest {
///     symbols: Vec::new(),
///     date_range: range,
///     frequency: None,
///     data_type: None,
///     cancel: None,
/// };
/// ```
#[derive(Debug, Clone)]
pub struct BatchRequest {
    symbols: Vec<String>,
    date_range: DateRange,
    frequency: Option<DataFrequency>,
    data_type: Option<String>,
    cancel: Option<CancelFlag>,
}

impl BatchRequest {
    pub fn new(symbols: Vec<String>, date_range: DateRange) -> Result<Self, ValidationError> {
        if symbols.is_empty() {
            return Err(ValidationError::EmptySymbolList);
        }
        if symbols.iter().any(|symbol| symbol.trim().is_empty()) {
            return Err(ValidationError::EmptySymbol);
        }

        Ok(Self {
            symbols,
            date_range,
            frequency: None,
            data_type: None,
            cancel: None,
        })
    }

    pub fn with_frequency(mut self, frequency: DataFrequency) -> Self {
        self.frequency = Some(frequency);
        self
    }

    pub fn with_data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub const fn date_range(&self) -> DateRange {
        self.date_range
    }

    pub const fn frequency(&self) -> Option<DataFrequency> {
        self.frequency
    }

    pub fn data_type(&self) -> Option<&str> {
        self.data_type.as_deref()
    }

    pub fn cancel(&self) -> Option<&CancelFlag> {
        self.cancel.as_ref()
    }

    /// Symbols with duplicates collapsed to their first occurrence.
    pub fn unique_symbols(&self) -> Vec<&str> {
        dedupe(self.symbols.iter().map(String::as_str))
    }
}

pub(crate) fn dedupe<'a>(symbols: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut unique: Vec<&str> = Vec::new();
    for symbol in symbols {
        if !unique.contains(&symbol) {
            unique.push(symbol);
        }
    }
    unique
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The collector's own window was exhausted in abort mode.
    RateLimited,
    /// The remote answered HTTP 429.
    RemoteThrottled,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolStatus {
    Collected { rows: usize, truncated: bool },
    NoData,
    InvalidSymbol,
    Skipped(SkipReason),
    Failed {
        kind: CollectorErrorKind,
        message: String,
    },
}

impl SymbolStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Skipped(_) | Self::Failed { .. })
    }
}

/// Result of a batch: the rows gathered plus an explicit status per symbol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub table: ObservationTable,
    pub statuses: Vec<(String, SymbolStatus)>,
    pub dropped_rows: usize,
    pub interrupted: bool,
}

impl BatchOutcome {
    pub fn status_of(&self, symbol: &str) -> Option<&SymbolStatus> {
        self.statuses
            .iter()
            .find(|(name, _)| name == symbol)
            .map(|(_, status)| status)
    }

    /// True when any symbol was skipped or failed. Empty data is not an error.
    pub fn has_errors(&self) -> bool {
        self.statuses.iter().any(|(_, status)| status.is_error())
    }

    /// Symbols that produced no data because of a failure or a skip.
    pub fn skipped_symbols(&self) -> Vec<&str> {
        self.statuses
            .iter()
            .filter(|(_, status)| status.is_error())
            .map(|(symbol, _)| symbol.as_str())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Per-symbol validity in input order, duplicates collapsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    entries: Vec<(String, bool)>,
}

impl ValidationResult {
    pub(crate) fn push(&mut self, symbol: &str, valid: bool) {
        self.entries.push((symbol.to_owned(), valid));
    }

    pub fn entries(&self) -> &[(String, bool)] {
        &self.entries
    }

    pub fn is_valid(&self, symbol: &str) -> Option<bool> {
        self.entries
            .iter()
            .find(|(name, _)| name == symbol)
            .map(|(_, valid)| *valid)
    }

    pub fn all_valid(&self) -> bool {
        self.entries.iter().all(|(_, valid)| *valid)
    }

    pub fn invalid(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, valid)| !valid)
            .map(|(symbol, _)| symbol.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionReport {
    pub connected: bool,
    pub status_code: Option<u16>,
    pub response_time_ms: u64,
    pub authenticated: bool,
    pub rate_limit: RateLimitStatus,
    pub diagnostics: BTreeMap<String, String>,
    pub error: Option<String>,
    pub checked_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectorInfo {
    pub source_name: &'static str,
    pub kind: SourceKind,
    pub data_types: Vec<&'static str>,
    pub requires_api_key: bool,
    pub authenticated: bool,
    pub environment: Environment,
    pub timeout: Duration,
    pub max_retries: u32,
    pub rate_limit_per_minute: u32,
}

impl Display for CollectorInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] env={} types={} key_required={} authenticated={} timeout={}s retries={} limit={}/min",
            self.source_name,
            self.kind,
            self.environment,
            self.data_types.join(","),
            self.requires_api_key,
            self.authenticated,
            self.timeout.as_secs(),
            self.max_retries,
            self.rate_limit_per_minute,
        )
    }
}
