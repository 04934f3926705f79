use std::sync::Arc;

use govfeed_core::{
    BatchRequest, Clock, Collector, CollectorConfig, CollectorErrorKind, DateRange, Environment, Fred,
    GovCollector, HttpError, ManualClock, ScriptedHttpClient, SecEdgar, SourceKind, SymbolStatus,
    Treasury,
};

const SEC_SUBMISSIONS: &str = r#"{"cik":"320193","name":"Apple Inc.","filings":{
    "recent":{
        "accessionNumber":["0000320193-24-000006","0000320193-23-000106"],
        "filingDate":["2024-01-12","2023-11-03"],
        "reportDate":["","2023-09-30"],
        "form":["8-K","10-K"],
        "primaryDocument":["aapl-20240112.htm","aapl-20230930.htm"]
    },
    "files":[]
}}"#;

const FRED_SERIES: &str = r#"{"seriess":[{"id":"DGS10","title":"Market Yield on U.S. Treasury Securities at 10-Year Constant Maturity","frequency":"Daily","units":"Percent"}]}"#;

const FRED_OBSERVATIONS: &str = r#"{"count":2,"offset":0,"observations":[
    {"date":"2024-01-02","value":"3.95"},
    {"date":"2024-01-03","value":"3.91"}
]}"#;

const TREASURY_YIELDS: &str = r#"{"data":[
    {"record_date":"2024-01-02","maturity":"10 Yr","value":"3.95"},
    {"record_date":"2024-01-03","maturity":"10 Yr","value":"3.91"}
],"meta":{"count":2,"total-count":2,"total-pages":1}}"#;

struct SourceCase {
    kind: SourceKind,
    collector: Arc<dyn Collector>,
    http: Arc<ScriptedHttpClient>,
    symbol: &'static str,
    requires_api_key: bool,
    rate_limit_per_minute: u32,
}

fn build<S: govfeed_core::SourceAdapter>(
    config: CollectorConfig,
    source: S,
    http: Arc<ScriptedHttpClient>,
) -> Arc<dyn Collector> {
    let collector = GovCollector::new(config, source)
        .expect("collector builds")
        .with_http_client(http)
        .with_clock(Arc::new(ManualClock::at_epoch()));
    Arc::new(collector)
}

fn source_cases() -> Vec<SourceCase> {
    let sec_http = Arc::new(
        ScriptedHttpClient::new().route_json("CIK0000320193.json", 200, SEC_SUBMISSIONS),
    );
    let fred_http = Arc::new(
        ScriptedHttpClient::new()
            .route_json("category?category_id=0", 200, r#"{"categories":[]}"#)
            .route_json("series?series_id=DGS10", 200, FRED_SERIES)
            .route_json("series/observations", 200, FRED_OBSERVATIONS),
    );
    let treasury_http = Arc::new(
        ScriptedHttpClient::new().route_json("daily_treasury_yield_curve", 200, TREASURY_YIELDS),
    );

    vec![
        SourceCase {
            kind: SourceKind::SecEdgar,
            collector: build(
                CollectorConfig::sec_edgar(Environment::Development)
                    .build()
                    .expect("config"),
                SecEdgar::new(),
                sec_http.clone(),
            ),
            http: sec_http,
            symbol: "AAPL",
            requires_api_key: false,
            rate_limit_per_minute: 600,
        },
        SourceCase {
            kind: SourceKind::Fred,
            collector: build(
                CollectorConfig::fred(Environment::Development, "test-key")
                    .build()
                    .expect("config"),
                Fred::new(),
                fred_http.clone(),
            ),
            http: fred_http,
            symbol: "DGS10",
            requires_api_key: true,
            rate_limit_per_minute: 120,
        },
        SourceCase {
            kind: SourceKind::Treasury,
            collector: build(
                CollectorConfig::treasury(Environment::Development)
                    .build()
                    .expect("config"),
                Treasury::new(),
                treasury_http.clone(),
            ),
            http: treasury_http,
            symbol: "10 Yr",
            requires_api_key: false,
            rate_limit_per_minute: 60,
        },
    ]
}

fn january() -> DateRange {
    DateRange::parse("2024-01-01", "2024-01-31").expect("valid range")
}

// =============================================================================
// Contract: Metadata
// =============================================================================

#[test]
fn info_describes_every_source() {
    for case in source_cases() {
        let info = case.collector.info();

        assert_eq!(info.kind, case.kind);
        assert_eq!(info.requires_api_key, case.requires_api_key);
        assert_eq!(info.rate_limit_per_minute, case.rate_limit_per_minute);
        assert_eq!(info.environment, Environment::Development);
        assert!(!info.authenticated, "{} starts unauthenticated", case.kind);
        assert_eq!(info.data_types, case.collector.supported_data_types());
        assert!(!info.data_types.is_empty());
        assert!(info.to_string().contains(case.collector.source_name()));
    }
}

// =============================================================================
// Contract: Session and Connection
// =============================================================================

#[tokio::test]
async fn authenticate_opens_a_session_for_every_source() {
    for case in source_cases() {
        // Given: A reachable source
        // When: The caller authenticates
        let authenticated = case.collector.authenticate().await;

        // Then: The session is reported as open
        assert!(authenticated, "{} should authenticate", case.kind);
        assert!(case.collector.info().authenticated);
    }
}

#[tokio::test]
async fn live_session_skips_the_probe() {
    for case in source_cases() {
        assert!(case.collector.authenticate().await);
        let after_first = case.http.request_count();

        assert!(case.collector.authenticate().await);

        assert_eq!(case.http.request_count(), after_first, "{}", case.kind);
    }
}

#[tokio::test]
async fn test_connection_reports_status_and_budget() {
    for case in source_cases() {
        let report = case
            .collector
            .test_connection()
            .await
            .expect("reachable source reports");

        assert!(report.connected, "{} should be connected", case.kind);
        assert_eq!(report.status_code, Some(200));
        assert_eq!(report.error, None);
        assert_eq!(report.rate_limit.limit_per_minute, case.rate_limit_per_minute);
        assert_eq!(report.rate_limit.requests_made_in_window, 1);
    }
}

#[tokio::test]
async fn test_connection_leaves_the_session_unchanged() {
    for case in source_cases() {
        // Given: A collector that has not authenticated
        // When: The connection is tested twice
        for _ in 0..2 {
            case.collector.test_connection().await.expect("reachable source reports");
        }

        // Then: No session was opened
        assert!(!case.collector.info().authenticated, "{} stays closed", case.kind);

        // Given: An authenticated collector
        assert!(case.collector.authenticate().await);

        // When: The connection is tested twice more
        for _ in 0..2 {
            let report = case
                .collector
                .test_connection()
                .await
                .expect("reachable source reports");
            assert!(report.connected);
        }

        // Then: The session is still open
        assert!(case.collector.info().authenticated, "{} stays open", case.kind);
    }
}

#[tokio::test]
async fn unreachable_source_raises_transport_error() {
    let http = Arc::new(
        ScriptedHttpClient::new().route("https://", Err(HttpError::connect("connection refused"))),
    );
    let collector = build(
        CollectorConfig::treasury(Environment::Development)
            .build()
            .expect("config"),
        Treasury::new(),
        http.clone(),
    );

    let error = collector
        .test_connection()
        .await
        .expect_err("transport failures propagate");

    assert_eq!(error.kind(), CollectorErrorKind::Transport);
    assert!(!collector.authenticate().await);
    // Development tier retries once per logical request.
    assert_eq!(http.request_count(), 4);
}

// =============================================================================
// Contract: Validation
// =============================================================================

#[tokio::test]
async fn validate_symbols_answers_each_unique_symbol_in_order() {
    for case in source_cases() {
        let symbols = vec![
            case.symbol.to_owned(),
            case.symbol.to_owned(),
            String::from("BOGUS1"),
        ];

        let result = case.collector.validate_symbols(&symbols).await;

        assert_eq!(result.len(), 2, "{} collapses duplicates", case.kind);
        assert_eq!(result.entries()[0].0, case.symbol);
        assert_eq!(result.is_valid(case.symbol), Some(true));
        assert_eq!(result.is_valid("BOGUS1"), Some(false));
        assert_eq!(result.invalid(), vec!["BOGUS1"]);
    }
}

// =============================================================================
// Contract: Collection
// =============================================================================

#[tokio::test]
async fn collect_batch_returns_rows_inside_the_range() {
    for case in source_cases() {
        let request = BatchRequest::new(vec![case.symbol.to_owned()], january()).expect("request");

        let outcome = case
            .collector
            .collect_batch(request)
            .await
            .expect("batch succeeds");

        assert!(!outcome.is_empty(), "{} returns rows", case.kind);
        assert!(!outcome.has_errors());
        assert!(matches!(
            outcome.status_of(case.symbol),
            Some(SymbolStatus::Collected { truncated: false, .. })
        ));
        assert!(outcome
            .table
            .rows()
            .iter()
            .all(|row| january().contains(row.date)));
    }
}

#[tokio::test]
async fn unsupported_data_type_is_rejected_before_any_request() {
    for case in source_cases() {
        let request = BatchRequest::new(vec![case.symbol.to_owned()], january())
            .expect("request")
            .with_data_type("bogus");

        let error = case
            .collector
            .collect_batch(request)
            .await
            .expect_err("unknown data type");

        assert_eq!(error.kind(), CollectorErrorKind::UnsupportedDataType);
        assert_eq!(case.http.request_count(), 0);
    }
}

#[tokio::test]
async fn latest_observation_is_the_most_recent_row_up_to_today() {
    let today = ManualClock::at_epoch().now().date();
    for case in source_cases() {
        let latest = case
            .collector
            .get_latest_observation(case.symbol)
            .await
            .expect("latest succeeds")
            .expect("a row within the lookback window");

        assert!(latest.date <= today, "{} latest is not in the future", case.kind);
    }
}

#[tokio::test]
async fn rate_limit_snapshot_counts_each_request() {
    for case in source_cases() {
        let request = BatchRequest::new(vec![case.symbol.to_owned()], january()).expect("request");
        case.collector
            .collect_batch(request)
            .await
            .expect("batch succeeds");

        let status = case.collector.get_rate_limits();

        assert_eq!(status.requests_made_in_window as usize, case.http.request_count());
        assert!(status.can_proceed);
        assert_eq!(status.retry_after, None);
    }
}
