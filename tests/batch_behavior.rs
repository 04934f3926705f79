//! Behavior-driven tests for batch collection
//!
//! These tests verify HOW a batch treats ranges, pagination, partial failures,
//! malformed rows, cancellation and resampling.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use govfeed_core::{
    BatchRequest, CancelFlag, Collector, CollectorConfig, CollectorConfigBuilder,
    CollectorErrorKind, DataFrequency, DateRange, Environment, Fred, FredCollector, HttpClient,
    HttpError, HttpRequest, HttpResponse, ManualClock, ObservationValue, ScriptedHttpClient,
    SecEdgar, SecEdgarCollector, SkipReason, SymbolStatus, Treasury, TreasuryCollector,
};
use serde_json::Value;

fn fred_with(
    http: Arc<ScriptedHttpClient>,
    configure: impl FnOnce(CollectorConfigBuilder) -> CollectorConfigBuilder,
) -> FredCollector {
    let config = configure(CollectorConfig::fred(Environment::Development, "test-key"))
        .build()
        .expect("config");
    FredCollector::new(config, Fred::new())
        .expect("collector builds")
        .with_http_client(http)
        .with_clock(Arc::new(ManualClock::at_epoch()))
}

fn fred(http: Arc<ScriptedHttpClient>) -> FredCollector {
    fred_with(http, |builder| builder)
}

fn observations(count: usize, offset: usize, rows: &[(&str, &str)]) -> String {
    let rows = rows
        .iter()
        .map(|(date, value)| format!(r#"{{"date":"{date}","value":"{value}"}}"#))
        .collect::<Vec<_>>()
        .join(",");
    format!(r#"{{"count":{count},"offset":{offset},"observations":[{rows}]}}"#)
}

fn symbols(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| (*name).to_owned()).collect()
}

fn range(start: &str, end: &str) -> DateRange {
    DateRange::parse(start, end).expect("valid range")
}

/// Scripted transport that cancels the batch once a matching request is served.
struct CancelOnRequest {
    inner: Arc<ScriptedHttpClient>,
    needle: &'static str,
    cancel: CancelFlag,
}

impl HttpClient for CancelOnRequest {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        if request.full_url().contains(self.needle) {
            self.cancel.cancel();
        }
        self.inner.execute(request)
    }
}

// =============================================================================
// Batch: Range Containment
// =============================================================================

#[tokio::test]
async fn rows_outside_the_requested_range_are_dropped() {
    // Given: A source that returns rows on both sides of the range
    let body = observations(
        4,
        0,
        &[
            ("2023-12-29", "3.88"),
            ("2024-01-02", "3.95"),
            ("2024-01-31", "3.99"),
            ("2024-02-01", "3.87"),
        ],
    );
    let http = Arc::new(ScriptedHttpClient::new().route_json("series/observations", 200, &body));
    let collector = fred(http);

    // When: January is collected
    let request = BatchRequest::new(symbols(&["DGS10"]), range("2024-01-01", "2024-01-31"))
        .expect("request");
    let outcome = collector.collect_batch(request).await.expect("batch succeeds");

    // Then: Only in-range rows remain, in date order
    let dates: Vec<_> = outcome.table.rows().iter().map(|row| row.date.to_string()).collect();
    assert_eq!(dates, vec!["2024-01-02", "2024-01-31"]);
    assert_eq!(
        outcome.status_of("DGS10"),
        Some(&SymbolStatus::Collected {
            rows: 2,
            truncated: false
        })
    );
}

// =============================================================================
// Batch: Partial Failure
// =============================================================================

#[tokio::test]
async fn timeout_on_one_symbol_keeps_the_others() {
    // Given: The second of three symbols times out
    let good = observations(1, 0, &[("2024-01-02", "3.95")]);
    let http = Arc::new(
        ScriptedHttpClient::new()
            .route("series_id=DGS2&", Err(HttpError::timeout("deadline elapsed")))
            .route_json("series/observations", 200, &good),
    );
    let collector = fred(http);

    // When: The batch runs
    let request = BatchRequest::new(
        symbols(&["DGS10", "DGS2", "UNRATE"]),
        range("2024-01-01", "2024-01-31"),
    )
    .expect("request");
    let outcome = collector.collect_batch(request).await.expect("batch completes");

    // Then: The failure is marked and the other symbols are collected
    assert!(matches!(
        outcome.status_of("DGS2"),
        Some(SymbolStatus::Failed {
            kind: CollectorErrorKind::TransportTimeout,
            ..
        })
    ));
    assert!(matches!(
        outcome.status_of("DGS10"),
        Some(SymbolStatus::Collected { rows: 1, .. })
    ));
    assert!(matches!(
        outcome.status_of("UNRATE"),
        Some(SymbolStatus::Collected { rows: 1, .. })
    ));
    assert_eq!(outcome.skipped_symbols(), vec!["DGS2"]);
    assert_eq!(outcome.table.symbols(), vec!["DGS10", "UNRATE"]);
    assert!(!outcome.interrupted);
}

#[tokio::test]
async fn empty_result_is_no_data_rather_than_an_error() {
    let http = Arc::new(ScriptedHttpClient::new().route_json(
        "series/observations",
        200,
        &observations(0, 0, &[]),
    ));
    let collector = fred(http);

    let request = BatchRequest::new(symbols(&["DGS10"]), range("2024-01-01", "2024-01-31"))
        .expect("request");
    let outcome = collector.collect_batch(request).await.expect("batch succeeds");

    assert!(outcome.is_empty());
    assert!(!outcome.has_errors());
    assert_eq!(outcome.status_of("DGS10"), Some(&SymbolStatus::NoData));
}

#[tokio::test]
async fn unknown_series_is_reported_as_invalid_symbol() {
    let http = Arc::new(ScriptedHttpClient::new().route_json(
        "series/observations",
        400,
        r#"{"error_code":400,"error_message":"Bad Request.  The series does not exist."}"#,
    ));
    let collector = fred(http);

    let request = BatchRequest::new(symbols(&["NOPE"]), range("2024-01-01", "2024-01-31"))
        .expect("request");
    let outcome = collector.collect_batch(request).await.expect("batch completes");

    assert_eq!(outcome.status_of("NOPE"), Some(&SymbolStatus::InvalidSymbol));
    assert!(outcome.is_empty());
}

#[tokio::test]
async fn duplicate_symbols_are_collected_once() {
    let body = observations(1, 0, &[("2024-01-02", "3.95")]);
    let http = Arc::new(ScriptedHttpClient::new().route_json("series/observations", 200, &body));
    let collector = fred(http.clone());

    let request = BatchRequest::new(
        symbols(&["DGS10", "DGS10"]),
        range("2024-01-01", "2024-01-31"),
    )
    .expect("request");
    let outcome = collector.collect_batch(request).await.expect("batch succeeds");

    assert_eq!(outcome.statuses.len(), 1);
    assert_eq!(outcome.table.len(), 1);
    assert_eq!(http.request_count(), 1);
}

// =============================================================================
// Batch: Malformed Rows
// =============================================================================

#[tokio::test]
async fn malformed_rows_are_dropped_and_counted() {
    // Given: One missing value and one unparseable date among valid rows
    let body = observations(
        4,
        0,
        &[
            ("2024-01-02", "3.95"),
            ("2024-01-03", "."),
            ("not-a-date", "3.90"),
            ("2024-01-05", "4.01"),
        ],
    );
    let http = Arc::new(ScriptedHttpClient::new().route_json("series/observations", 200, &body));
    let collector = fred(http);

    // When: The batch runs
    let request = BatchRequest::new(symbols(&["DGS10"]), range("2024-01-01", "2024-01-31"))
        .expect("request");
    let outcome = collector.collect_batch(request).await.expect("batch succeeds");

    // Then: Valid rows survive and the drop count is reported
    assert_eq!(outcome.table.len(), 2);
    assert_eq!(outcome.dropped_rows, 2);
    assert!(!outcome.has_errors());
}

#[tokio::test]
async fn unparseable_body_fails_only_that_symbol() {
    let http = Arc::new(
        ScriptedHttpClient::new()
            .route_json("series_id=BROKEN&", 200, "<html>maintenance</html>")
            .route_json(
                "series/observations",
                200,
                &observations(1, 0, &[("2024-01-02", "3.95")]),
            ),
    );
    let collector = fred(http);

    let request = BatchRequest::new(
        symbols(&["BROKEN", "DGS10"]),
        range("2024-01-01", "2024-01-31"),
    )
    .expect("request");
    let outcome = collector.collect_batch(request).await.expect("batch completes");

    assert!(matches!(
        outcome.status_of("BROKEN"),
        Some(SymbolStatus::Failed {
            kind: CollectorErrorKind::MalformedResponse,
            ..
        })
    ));
    assert!(matches!(
        outcome.status_of("DGS10"),
        Some(SymbolStatus::Collected { .. })
    ));
}

// =============================================================================
// Batch: Pagination
// =============================================================================

#[tokio::test]
async fn pagination_stops_at_the_page_ceiling_and_flags_truncation() {
    // Given: A series with far more rows than two pages of two
    let pages = [
        observations(10, 0, &[("2024-01-02", "1"), ("2024-01-03", "2")]),
        observations(10, 2, &[("2024-01-04", "3"), ("2024-01-05", "4")]),
        observations(10, 4, &[("2024-01-08", "5"), ("2024-01-09", "6")]),
    ];
    let http = Arc::new(ScriptedHttpClient::new().route_all(
        &["series/observations"],
        pages
            .iter()
            .map(|body| Ok(HttpResponse::ok_json(body.as_str())))
            .collect(),
    ));
    let collector = fred_with(http.clone(), |builder| {
        builder.with_page_size(2).with_max_pages(2)
    });

    // When: The batch runs
    let request = BatchRequest::new(symbols(&["DGS10"]), range("2024-01-01", "2024-01-31"))
        .expect("request");
    let outcome = collector.collect_batch(request).await.expect("batch succeeds");

    // Then: Exactly two pages were fetched and the result is marked truncated
    assert_eq!(http.request_count(), 2);
    assert_eq!(
        outcome.status_of("DGS10"),
        Some(&SymbolStatus::Collected {
            rows: 4,
            truncated: true
        })
    );
    let offsets: Vec<_> = http
        .requests()
        .iter()
        .map(|request| request.query_value("offset").unwrap_or_default().to_owned())
        .collect();
    assert_eq!(offsets, vec!["0", "2"]);
}

#[tokio::test]
async fn treasury_pages_follow_total_pages() {
    let first = r#"{"data":[{"record_date":"2024-01-02","maturity":"10 Yr","value":"3.95"}],"meta":{"total-pages":2,"total-count":2}}"#;
    let second = r#"{"data":[{"record_date":"2024-01-03","maturity":"10 Yr","value":"3.91"}],"meta":{"total-pages":2,"total-count":2}}"#;
    let http = Arc::new(ScriptedHttpClient::new().route_all(
        &["daily_treasury_yield_curve"],
        vec![Ok(HttpResponse::ok_json(first)), Ok(HttpResponse::ok_json(second))],
    ));
    let config = CollectorConfig::treasury(Environment::Development)
        .with_page_size(1)
        .build()
        .expect("config");
    let collector = TreasuryCollector::new(config, Treasury::new())
        .expect("collector builds")
        .with_http_client(http.clone())
        .with_clock(Arc::new(ManualClock::at_epoch()));

    let request = BatchRequest::new(symbols(&["10 yr"]), range("2024-01-01", "2024-01-31"))
        .expect("request");
    let outcome = collector.collect_batch(request).await.expect("batch succeeds");

    assert_eq!(outcome.table.len(), 2);
    let requests = http.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].query_value("page[number]"), Some("1"));
    assert_eq!(requests[1].query_value("page[number]"), Some("2"));
    assert!(requests[0]
        .query_value("filter")
        .is_some_and(|filter| filter.ends_with("maturity:eq:10 Yr")));
}

#[tokio::test]
async fn sec_filings_walk_older_filing_files_that_overlap_the_range() {
    let submissions = r#"{"cik":"320193","name":"Apple Inc.","filings":{
        "recent":{"accessionNumber":["a-1"],"filingDate":["2015-02-01"],"reportDate":[""],"form":["8-K"],"primaryDocument":["x.htm"]},
        "files":[
            {"name":"CIK0000320193-submissions-001.json","filingFrom":"2010-01-01","filingTo":"2014-12-31"},
            {"name":"CIK0000320193-submissions-002.json","filingFrom":"1994-01-01","filingTo":"2009-12-31"}
        ]}}"#;
    let older = r#"{"accessionNumber":["a-2","a-3"],"filingDate":["2014-10-27","2013-10-30"],"reportDate":["2014-09-27","2013-09-28"],"form":["10-K","10-K"],"primaryDocument":["y.htm","z.htm"]}"#;
    let http = Arc::new(
        ScriptedHttpClient::new()
            .route_json("submissions-001.json", 200, older)
            .route_json("CIK0000320193.json", 200, submissions),
    );
    let config = CollectorConfig::sec_edgar(Environment::Development)
        .without_burst()
        .build()
        .expect("config");
    let collector = SecEdgarCollector::new(config, SecEdgar::new())
        .expect("collector builds")
        .with_http_client(http.clone())
        .with_clock(Arc::new(ManualClock::at_epoch()));

    let request = BatchRequest::new(symbols(&["aapl"]), range("2013-01-01", "2015-12-31"))
        .expect("request");
    let outcome = collector.collect_batch(request).await.expect("batch succeeds");

    assert_eq!(http.request_count(), 2);
    let forms: Vec<_> = outcome
        .table
        .rows()
        .iter()
        .map(|row| row.value.to_string())
        .collect();
    assert_eq!(forms, vec!["10-K", "10-K", "8-K"]);
    assert!(outcome.table.rows().iter().all(|row| row.symbol == "AAPL"));
}

// =============================================================================
// Batch: Resampling
// =============================================================================

#[tokio::test]
async fn monthly_resampling_keeps_the_last_observation_of_each_month() {
    let body = observations(
        4,
        0,
        &[
            ("2024-01-02", "3.90"),
            ("2024-01-31", "4.00"),
            ("2024-02-01", "4.10"),
            ("2024-02-15", "4.20"),
        ],
    );
    let http = Arc::new(ScriptedHttpClient::new().route_json("series/observations", 200, &body));
    let collector = fred(http);

    let request = BatchRequest::new(symbols(&["DGS10"]), range("2024-01-01", "2024-02-29"))
        .expect("request")
        .with_frequency(DataFrequency::Monthly);
    let outcome = collector.collect_batch(request).await.expect("batch succeeds");

    let rows = outcome.table.rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].value, ObservationValue::Number(4.0));
    assert_eq!(rows[0].extra("period_start"), Some(&Value::from("2024-01-01")));
    assert_eq!(rows[0].extra("observations"), Some(&Value::from(2_u64)));
    assert_eq!(rows[1].value, ObservationValue::Number(4.2));
    assert_eq!(
        outcome.status_of("DGS10"),
        Some(&SymbolStatus::Collected {
            rows: 2,
            truncated: false
        })
    );
}

// =============================================================================
// Batch: Interruption
// =============================================================================

#[tokio::test]
async fn cancelled_batch_skips_remaining_symbols_without_requests() {
    let http = Arc::new(ScriptedHttpClient::new().route_json(
        "series/observations",
        200,
        &observations(1, 0, &[("2024-01-02", "3.95")]),
    ));
    let collector = fred(http.clone());
    let cancel = CancelFlag::new();
    cancel.cancel();

    let request = BatchRequest::new(
        symbols(&["DGS10", "UNRATE"]),
        range("2024-01-01", "2024-01-31"),
    )
    .expect("request")
    .with_cancel(cancel);
    let outcome = collector.collect_batch(request).await.expect("batch returns");

    assert!(outcome.interrupted);
    assert_eq!(http.request_count(), 0);
    assert!(outcome
        .statuses
        .iter()
        .all(|(_, status)| *status == SymbolStatus::Skipped(SkipReason::Cancelled)));
}

#[tokio::test]
async fn cancelling_mid_batch_keeps_rows_already_gathered() {
    // Given: DGS2 has a second page, and the caller cancels while its first page is in flight
    let scripted = Arc::new(
        ScriptedHttpClient::new()
            .route_json(
                "series_id=DGS10&",
                200,
                &observations(1, 0, &[("2024-01-02", "3.95")]),
            )
            .route_json(
                "series_id=DGS2&",
                200,
                &observations(3, 0, &[("2024-01-02", "4.33"), ("2024-01-03", "4.31")]),
            )
            .route_json(
                "series_id=UNRATE&",
                200,
                &observations(1, 0, &[("2024-01-01", "3.7")]),
            ),
    );
    let cancel = CancelFlag::new();
    let collector = fred(scripted.clone()).with_http_client(Arc::new(CancelOnRequest {
        inner: scripted.clone(),
        needle: "series_id=DGS2&",
        cancel: cancel.clone(),
    }));

    // When: Three symbols are collected
    let request = BatchRequest::new(
        symbols(&["DGS10", "DGS2", "UNRATE"]),
        range("2024-01-01", "2024-01-31"),
    )
    .expect("request")
    .with_cancel(cancel);
    let outcome = collector.collect_batch(request).await.expect("batch returns");

    // Then: Rows from the first symbol and DGS2's first page survive
    assert!(outcome.interrupted);
    assert_eq!(scripted.request_count(), 2);
    assert!(matches!(
        outcome.status_of("DGS10"),
        Some(SymbolStatus::Collected { rows: 1, .. })
    ));
    assert_eq!(
        outcome.status_of("DGS2"),
        Some(&SymbolStatus::Skipped(SkipReason::Cancelled))
    );
    assert_eq!(
        outcome.status_of("UNRATE"),
        Some(&SymbolStatus::Skipped(SkipReason::Cancelled))
    );
    let kept: Vec<_> = outcome
        .table
        .rows()
        .iter()
        .map(|row| (row.symbol.as_str(), row.date.to_string()))
        .collect();
    assert_eq!(
        kept,
        vec![
            ("DGS10", String::from("2024-01-02")),
            ("DGS2", String::from("2024-01-02")),
            ("DGS2", String::from("2024-01-03")),
        ]
    );
}

#[tokio::test]
async fn rejected_credentials_abort_the_batch() {
    // Given: FRED rejects the key mid-session
    let http = Arc::new(ScriptedHttpClient::new().route_json(
        "series/observations",
        400,
        r#"{"error_code":400,"error_message":"Bad Request.  The value for variable api_key is not registered."}"#,
    ));
    let collector = fred(http.clone());

    // When: A batch runs
    let request = BatchRequest::new(
        symbols(&["DGS10", "UNRATE"]),
        range("2024-01-01", "2024-01-31"),
    )
    .expect("request");
    let error = collector
        .collect_batch(request)
        .await
        .expect_err("credential failure aborts");

    // Then: The batch stops at the first symbol with an authentication error
    assert_eq!(error.kind(), CollectorErrorKind::Authentication);
    assert_eq!(http.request_count(), 1);
    assert!(!collector.is_authenticated());
}

#[tokio::test]
async fn remote_throttling_skips_the_rest_of_the_batch() {
    let http = Arc::new(ScriptedHttpClient::new().route_json(
        "series/observations",
        429,
        r#"{"error_code":429,"error_message":"Too Many Requests."}"#,
    ));
    let collector = fred(http.clone());

    let request = BatchRequest::new(
        symbols(&["DGS10", "UNRATE", "GDP"]),
        range("2024-01-01", "2024-01-31"),
    )
    .expect("request");
    let outcome = collector.collect_batch(request).await.expect("batch returns");

    assert!(outcome.interrupted);
    assert_eq!(http.request_count(), 1);
    assert_eq!(outcome.skipped_symbols(), vec!["DGS10", "UNRATE", "GDP"]);
    assert!(outcome
        .statuses
        .iter()
        .all(|(_, status)| *status == SymbolStatus::Skipped(SkipReason::RemoteThrottled)));
}
