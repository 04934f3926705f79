//! Collector engine shared by every source.
//!
//! [`GovCollector`] owns the configuration, rate limiter, transport, clock and
//! auth session, and implements [`Collector`] once on top of a
//! [`SourceAdapter`]. Every outbound attempt, retries included, passes the
//! limiter gate.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::collector::{
    dedupe, BatchOutcome, BatchRequest, CancelFlag, Collector, CollectorFuture, CollectorInfo,
    ConnectionReport, SkipReason, SymbolStatus, ValidationResult,
};
use crate::config::{CollectorConfig, RateLimitPolicy};
use crate::data_source::{
    DataTypeSpec, LatestLookup, PageQuery, SourceAdapter, SourceKind, SymbolCheck,
};
use crate::domain::{DateRange, Observation};
use crate::error::{CollectorError, CollectorErrorKind, ValidationError};
use crate::http_client::{HttpClient, HttpError, HttpErrorKind, HttpRequest, HttpResponse, ReqwestHttpClient};
use crate::throttling::{RateLimitStatus, RateLimiter};

const DEFAULT_LIMIT_WAIT: Duration = Duration::from_secs(1);

pub struct GovCollector<S> {
    config: CollectorConfig,
    limiter: RateLimiter,
    http: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    session_expires_at: Mutex<Option<OffsetDateTime>>,
    source: S,
}

/// Why a batch stops before its last symbol.
enum Halt {
    Skip(SkipReason),
    Abort(CollectorError),
}

struct SymbolRun {
    rows: Vec<Observation>,
    malformed: usize,
    status: SymbolStatus,
    halt: Option<Halt>,
}

impl SymbolRun {
    fn finished(rows: Vec<Observation>, malformed: usize, status: SymbolStatus) -> Self {
        Self {
            rows,
            malformed,
            status,
            halt: None,
        }
    }

    fn failed(rows: Vec<Observation>, malformed: usize, error: &CollectorError) -> Self {
        let status = match error.kind() {
            CollectorErrorKind::InvalidSymbol => SymbolStatus::InvalidSymbol,
            kind => SymbolStatus::Failed {
                kind,
                message: error.message().to_owned(),
            },
        };
        Self::finished(rows, malformed, status)
    }

    fn halted(rows: Vec<Observation>, malformed: usize, halt: Halt) -> Self {
        let status = match &halt {
            Halt::Skip(reason) => SymbolStatus::Skipped(*reason),
            Halt::Abort(error) => SymbolStatus::Failed {
                kind: error.kind(),
                message: error.message().to_owned(),
            },
        };
        Self {
            rows,
            malformed,
            status,
            halt: Some(halt),
        }
    }
}

impl<S: SourceAdapter> GovCollector<S> {
    /// Fails with `Configuration` when the source needs a key and none is set.
    pub fn new(config: CollectorConfig, source: S) -> Result<Self, CollectorError> {
        if source.requires_api_key() && config.api_key().is_none() {
            return Err(CollectorError::configuration(format!(
                "{} requires an api_key",
                source.source_name()
            )));
        }

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Ok(Self {
            limiter: Self::limiter_for(&config, clock.clone()),
            config,
            http: Arc::new(ReqwestHttpClient::default()),
            clock,
            session_expires_at: Mutex::new(None),
            source,
        })
    }

    pub fn with_http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = http;
        self
    }

    /// Replaces the time source. The rate window restarts on the new clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.limiter = Self::limiter_for(&self.config, clock.clone());
        self.clock = clock;
        self
    }

    fn limiter_for(config: &CollectorConfig, clock: Arc<dyn Clock>) -> RateLimiter {
        RateLimiter::with_clock(
            config.rate_limit_per_minute(),
            config.burst_per_second(),
            clock,
        )
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn is_authenticated(&self) -> bool {
        let now = self.clock.now();
        self.session()
            .is_some_and(|expires_at| expires_at > now)
    }

    fn session(&self) -> Option<OffsetDateTime> {
        *self
            .session_expires_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_session(&self, expires_at: Option<OffsetDateTime>) {
        *self
            .session_expires_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = expires_at;
    }

    fn resolve_data_type(&self, requested: Option<&str>) -> Result<&'static DataTypeSpec, CollectorError> {
        let name = requested.unwrap_or_else(|| self.source.default_data_type());
        self.source
            .data_type(name)
            .ok_or_else(|| CollectorError::unsupported_data_type(name, self.source.source_name()))
    }

    async fn acquire(&self) -> Result<(), CollectorError> {
        loop {
            let status = match self.limiter.try_acquire() {
                Ok(()) => return Ok(()),
                Err(status) => status,
            };

            match self.config.on_rate_limit() {
                RateLimitPolicy::Abort => {
                    warn!(
                        source = self.source.source_name(),
                        used = status.requests_made_in_window,
                        limit = status.limit_per_minute,
                        "rate window exhausted, failing fast"
                    );
                    return Err(CollectorError::rate_limited(format!(
                        "{} rate limit of {}/min reached; retry in {:.1}s",
                        self.source.source_name(),
                        status.limit_per_minute,
                        status.retry_after.unwrap_or_default().as_secs_f64()
                    )));
                }
                RateLimitPolicy::Wait => {
                    let wait = status
                        .retry_after
                        .filter(|wait| !wait.is_zero())
                        .unwrap_or(DEFAULT_LIMIT_WAIT);
                    debug!(
                        source = self.source.source_name(),
                        wait_ms = wait.as_millis() as u64,
                        "rate window exhausted, waiting"
                    );
                    self.clock.sleep(wait).await;
                }
            }
        }
    }

    async fn execute_once(&self, request: HttpRequest) -> Result<HttpResponse, CollectorError> {
        let timeout = request.timeout;
        match tokio::time::timeout(timeout, self.http.execute(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(error)) => Err(transport_error(self.source.source_name(), &error)),
            Err(_) => Err(CollectorError::timeout(format!(
                "{} request timed out after {}s",
                self.source.source_name(),
                timeout.as_secs()
            ))),
        }
    }

    /// Sends one logical request: limiter gate, timeout and bounded retries.
    /// Non-success statuses are returned as responses.
    pub(crate) async fn send(&self, request: HttpRequest) -> Result<HttpResponse, CollectorError> {
        let request = self
            .source
            .authorize(request, &self.config)
            .with_timeout(self.config.timeout());
        let retry = self.config.retry();
        let mut attempt = 0_u32;

        loop {
            self.acquire().await?;
            debug!(
                source = self.source.source_name(),
                url = %request.redacted_url(),
                attempt,
                "sending request"
            );

            let outcome = self.execute_once(request.clone()).await;
            let can_retry = attempt < retry.max_retries;
            match outcome {
                Ok(response) if can_retry && retry.should_retry_status(response.status) => {
                    warn!(
                        source = self.source.source_name(),
                        status = response.status,
                        attempt,
                        "retrying after server error"
                    );
                }
                Ok(response) => return Ok(response),
                Err(error) if can_retry && retry.should_retry_error(error.kind()) => {
                    warn!(
                        source = self.source.source_name(),
                        error = %error,
                        attempt,
                        "retrying after transport failure"
                    );
                }
                Err(error) => return Err(error),
            }

            self.clock.sleep(retry.delay_for_attempt(attempt)).await;
            attempt += 1;
        }
    }

    fn classify(&self, response: &HttpResponse) -> Result<(), CollectorError> {
        let name = self.source.source_name();
        if response.is_success() {
            return Ok(());
        }
        if self.source.rejects_credentials(response) {
            return Err(CollectorError::authentication(format!(
                "{name} rejected the configured credentials (status {})",
                response.status
            )));
        }
        if self.source.is_unknown_symbol(response) {
            return Err(CollectorError::new(
                CollectorErrorKind::InvalidSymbol,
                format!("{name} does not recognize the identifier (status {})", response.status),
            ));
        }

        match response.status {
            429 => Err(CollectorError::rate_limited(format!(
                "{name} throttled the request (HTTP 429)"
            ))),
            500..=599 => Err(CollectorError::transport(format!(
                "{name} returned server error {}",
                response.status
            ))),
            status => Err(CollectorError::invalid_request(format!(
                "{name} rejected the request with status {status}"
            ))),
        }
    }

    /// Sends and requires a success status, returning the body.
    pub(crate) async fn fetch(&self, request: HttpRequest) -> Result<String, CollectorError> {
        let response = self.send(request).await?;
        self.classify(&response)?;
        Ok(response.body)
    }

    pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(&self, body: &str) -> Result<T, CollectorError> {
        serde_json::from_str(body).map_err(|e| {
            CollectorError::malformed(format!(
                "failed to parse {} response: {e}",
                self.source.source_name()
            ))
        })
    }

    pub(crate) fn today(&self) -> time::Date {
        self.clock.now().date()
    }

    async fn authenticate_session(&self) -> bool {
        if self.is_authenticated() {
            return true;
        }

        let probe = self.source.connection_probe(&self.config);
        let outcome = match self.send(probe).await {
            Ok(response) => self.classify(&response),
            Err(error) => Err(error),
        };

        match outcome {
            Ok(()) => {
                let expires_at = self.clock.now() + self.config.session_ttl();
                self.set_session(Some(expires_at));
                info!(source = self.source.source_name(), "authenticated");
                true
            }
            Err(error) => {
                self.set_session(None);
                warn!(
                    source = self.source.source_name(),
                    code = error.code(),
                    error = %error,
                    "authentication failed"
                );
                false
            }
        }
    }

    async fn probe_connection(&self) -> Result<ConnectionReport, CollectorError> {
        let probe = self.source.connection_probe(&self.config);
        let started = Instant::now();
        let outcome = self.send(probe).await;
        let response_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (status_code, diagnostics, error) = match outcome {
            Ok(response) => {
                let error = self.classify(&response).err().map(|e| e.message().to_owned());
                (
                    Some(response.status),
                    self.source.diagnostics(&response),
                    error,
                )
            }
            Err(error) if error.kind().is_transport() => return Err(error),
            Err(error) => (None, Default::default(), Some(error.message().to_owned())),
        };

        debug!(
            source = self.source.source_name(),
            status = ?status_code,
            response_time_ms,
            "connection probed"
        );
        Ok(ConnectionReport {
            connected: error.is_none(),
            status_code,
            response_time_ms,
            authenticated: self.is_authenticated(),
            rate_limit: self.limiter.status(),
            diagnostics,
            error,
            checked_at: self.clock.now(),
        })
    }

    async fn validate(&self, symbols: &[String]) -> ValidationResult {
        let mut result = ValidationResult::default();
        for symbol in dedupe(symbols.iter().map(String::as_str)) {
            let normalized = self.source.normalize_symbol(symbol);
            let valid = if normalized.is_empty() {
                false
            } else {
                match self.source.symbol_check(&normalized, &self.config) {
                    SymbolCheck::Known(known) => known,
                    SymbolCheck::Probe(request) => match self.send(request).await {
                        Ok(response) => {
                            response.is_success() && self.source.probe_confirms_symbol(&response)
                        }
                        Err(error) => {
                            debug!(
                                source = self.source.source_name(),
                                symbol,
                                error = %error,
                                "symbol probe failed"
                            );
                            false
                        }
                    },
                }
            };
            result.push(symbol, valid);
        }
        result
    }

    async fn collect_symbol(
        &self,
        symbol: &str,
        spec: &DataTypeSpec,
        date_range: DateRange,
        cancel: Option<&CancelFlag>,
        newest_first: bool,
    ) -> SymbolRun {
        let mut rows = Vec::new();
        let mut malformed = 0;
        let mut token: Option<String> = None;
        let mut seen_tokens = HashSet::new();
        let mut page_number = 1_u32;
        let mut truncated = false;

        loop {
            if cancel.is_some_and(CancelFlag::is_cancelled) {
                return SymbolRun::halted(rows, malformed, Halt::Skip(SkipReason::Cancelled));
            }

            let query = PageQuery {
                symbol,
                date_range,
                data_type: spec.name,
                page_number,
                token: token.as_deref(),
                page_size: if newest_first { 1 } else { self.config.page_size() },
                newest_first,
            };
            let request = match self.source.page_request(&query, &self.config) {
                Ok(request) => request,
                Err(error) => return SymbolRun::failed(rows, malformed, &error),
            };

            let response = match self.send(request).await {
                Ok(response) => response,
                Err(error) if error.kind() == CollectorErrorKind::RateLimitExceeded => {
                    return SymbolRun::halted(rows, malformed, Halt::Skip(SkipReason::RateLimited));
                }
                Err(error) => return SymbolRun::failed(rows, malformed, &error),
            };

            if let Err(error) = self.classify(&response) {
                return match error.kind() {
                    CollectorErrorKind::Authentication => {
                        SymbolRun::halted(rows, malformed, Halt::Abort(error))
                    }
                    CollectorErrorKind::RateLimitExceeded => {
                        SymbolRun::halted(rows, malformed, Halt::Skip(SkipReason::RemoteThrottled))
                    }
                    _ => SymbolRun::failed(rows, malformed, &error),
                };
            }

            let page = match self.source.parse_page(&query, &response.body) {
                Ok(page) => page,
                Err(error) => return SymbolRun::failed(rows, malformed, &error),
            };
            malformed += page.malformed;
            rows.extend(page.observations);
            if newest_first {
                break;
            }

            let Some(next) = page.next else {
                break;
            };
            if !seen_tokens.insert(next.clone()) {
                warn!(
                    source = self.source.source_name(),
                    symbol,
                    token = %next,
                    "source repeated a page token, stopping pagination"
                );
                break;
            }
            if page_number >= self.config.max_pages() {
                warn!(
                    source = self.source.source_name(),
                    symbol,
                    max_pages = self.config.max_pages(),
                    "pagination ceiling reached"
                );
                truncated = true;
                break;
            }
            token = Some(next);
            page_number += 1;
        }

        let status = if rows.is_empty() {
            SymbolStatus::NoData
        } else {
            SymbolStatus::Collected {
                rows: rows.len(),
                truncated,
            }
        };
        SymbolRun::finished(rows, malformed, status)
    }

    async fn run_batch(&self, request: BatchRequest) -> Result<BatchOutcome, CollectorError> {
        let spec = self.resolve_data_type(request.data_type())?;
        let symbols = request.unique_symbols();
        let mut outcome = BatchOutcome::default();
        let mut halted: Option<SkipReason> = None;

        for symbol in symbols {
            if let Some(reason) = halted {
                outcome
                    .statuses
                    .push((symbol.to_owned(), SymbolStatus::Skipped(reason)));
                continue;
            }
            if request.cancel().is_some_and(CancelFlag::is_cancelled) {
                halted = Some(SkipReason::Cancelled);
                outcome.interrupted = true;
                outcome
                    .statuses
                    .push((symbol.to_owned(), SymbolStatus::Skipped(SkipReason::Cancelled)));
                continue;
            }

            let normalized = self.source.normalize_symbol(symbol);
            let run = self
                .collect_symbol(&normalized, spec, request.date_range(), request.cancel(), false)
                .await;
            outcome.dropped_rows += run.malformed;

            let mut rows: Vec<Observation> = run
                .rows
                .into_iter()
                .filter(|row| request.date_range().contains(row.date))
                .collect();
            rows.sort_by_key(|row| row.date);
            if let Some(frequency) = request.frequency() {
                rows = spec.aggregation.resample(rows, frequency);
            }

            let status = match run.status {
                SymbolStatus::Collected { truncated, .. } if rows.is_empty() && !truncated => {
                    SymbolStatus::NoData
                }
                SymbolStatus::Collected { truncated, .. } => SymbolStatus::Collected {
                    rows: rows.len(),
                    truncated,
                },
                other => other,
            };
            debug!(
                source = self.source.source_name(),
                symbol,
                rows = rows.len(),
                status = ?status,
                "symbol collected"
            );
            outcome.table.push_symbol(rows);
            outcome.statuses.push((symbol.to_owned(), status));

            match run.halt {
                None => {}
                Some(Halt::Abort(error)) => {
                    self.set_session(None);
                    warn!(
                        source = self.source.source_name(),
                        error = %error,
                        "credentials rejected, aborting batch"
                    );
                    return Err(error);
                }
                Some(Halt::Skip(reason)) => {
                    info!(
                        source = self.source.source_name(),
                        symbol,
                        reason = ?reason,
                        "batch halted, remaining symbols skipped"
                    );
                    halted = Some(reason);
                    outcome.interrupted = true;
                }
            }
        }

        Ok(outcome)
    }

    async fn latest(&self, symbol: &str) -> Result<Option<Observation>, CollectorError> {
        let today = self.today();
        match self.source.latest_lookup() {
            LatestLookup::Trailing { days } => {
                let date_range = DateRange::trailing_days(days, today);
                let request = BatchRequest::new(vec![symbol.to_owned()], date_range)?;
                let outcome = self.run_batch(request).await?;

                if let Some(status) = outcome.status_of(symbol) {
                    self.status_error(symbol, status)?;
                }
                Ok(outcome.table.into_rows().pop())
            }
            LatestLookup::NewestFirst => {
                let symbol = symbol.trim();
                if symbol.is_empty() {
                    return Err(ValidationError::EmptySymbol.into());
                }
                let spec = self.resolve_data_type(None)?;
                let normalized = self.source.normalize_symbol(symbol);
                let run = self
                    .collect_symbol(&normalized, spec, DateRange::single_day(today), None, true)
                    .await;

                if let Some(Halt::Abort(error)) = run.halt {
                    self.set_session(None);
                    return Err(error);
                }
                self.status_error(symbol, &run.status)?;
                Ok(run
                    .rows
                    .into_iter()
                    .filter(|row| row.date <= today)
                    .max_by_key(|row| row.date))
            }
        }
    }

    /// Turns a failed or skipped single-symbol status back into an error.
    pub(crate) fn status_error(&self, symbol: &str, status: &SymbolStatus) -> Result<(), CollectorError> {
        match status {
            SymbolStatus::Failed { kind, message } => Err(CollectorError::new(*kind, message.clone())),
            SymbolStatus::Skipped(reason) => Err(CollectorError::rate_limited(format!(
                "{} request for '{symbol}' was skipped ({reason:?})",
                self.source.source_name()
            ))),
            _ => Ok(()),
        }
    }
}

fn transport_error(source: &str, error: &HttpError) -> CollectorError {
    match error.kind() {
        HttpErrorKind::Timeout => CollectorError::timeout(format!("{source}: {}", error.message())),
        HttpErrorKind::Connect | HttpErrorKind::Other => {
            CollectorError::transport(format!("{source}: {}", error.message()))
        }
    }
}

impl<S: SourceAdapter> Collector for GovCollector<S> {
    fn kind(&self) -> SourceKind {
        self.source.kind()
    }

    fn source_name(&self) -> &'static str {
        self.source.source_name()
    }

    fn requires_api_key(&self) -> bool {
        self.source.requires_api_key()
    }

    fn supported_data_types(&self) -> Vec<&'static str> {
        self.source.data_types().iter().map(|spec| spec.name).collect()
    }

    fn info(&self) -> CollectorInfo {
        CollectorInfo {
            source_name: self.source.source_name(),
            kind: self.source.kind(),
            data_types: self.supported_data_types(),
            requires_api_key: self.source.requires_api_key(),
            authenticated: self.is_authenticated(),
            environment: self.config.environment(),
            timeout: self.config.timeout(),
            max_retries: self.config.retry().max_retries,
            rate_limit_per_minute: self.config.rate_limit_per_minute(),
        }
    }

    fn authenticate<'a>(&'a self) -> CollectorFuture<'a, bool> {
        Box::pin(self.authenticate_session())
    }

    fn test_connection<'a>(&'a self) -> CollectorFuture<'a, Result<ConnectionReport, CollectorError>> {
        Box::pin(self.probe_connection())
    }

    fn get_rate_limits(&self) -> RateLimitStatus {
        self.limiter.status()
    }

    fn validate_symbols<'a>(&'a self, symbols: &'a [String]) -> CollectorFuture<'a, ValidationResult> {
        Box::pin(self.validate(symbols))
    }

    fn collect_batch<'a>(
        &'a self,
        request: BatchRequest,
    ) -> CollectorFuture<'a, Result<BatchOutcome, CollectorError>> {
        Box::pin(self.run_batch(request))
    }

    fn get_latest_observation<'a>(
        &'a self,
        symbol: &'a str,
    ) -> CollectorFuture<'a, Result<Option<Observation>, CollectorError>> {
        Box::pin(self.latest(symbol))
    }
}

impl<S: SourceAdapter> std::fmt::Debug for GovCollector<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovCollector")
            .field("source", &self.source.source_name())
            .field("base_url", &self.config.base_url())
            .field("limiter", &self.limiter)
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}
