//! # Govfeed Core
//!
//! Collector framework and source adapters for public government data.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **One collector contract** ([`Collector`]) shared by every source
//! - **Source adapters** for SEC EDGAR, FRED and Treasury Fiscal Data
//! - **Per-collector rate limiting** over a 60-second window, safe under
//!   concurrent callers
//! - **Batch collection** with date-range filtering, pagination ceilings,
//!   per-symbol statuses and frequency resampling
//! - **Structured errors** that separate credential, transport, throttling and
//!   response-shape failures
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | SEC EDGAR, FRED and Treasury adapters plus the registry |
//! | [`clock`] | Time source for rate windows and sessions |
//! | [`collector`] | Collector trait, batch request and outcome types |
//! | [`config`] | Validated per-collector configuration and presets |
//! | [`data_source`] | Source adapter trait and source identifiers |
//! | [`domain`] | Observations, date ranges, frequencies and tables |
//! | [`engine`] | Shared collection engine |
//! | [`error`] | Validation and collector error types |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`retry`] | Retry and backoff policy |
//! | [`throttling`] | Rate limiter |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use govfeed_core::{
//!     BatchRequest, Collector, CollectorConfig, DataFrequency, DateRange, Environment,
//!     FredCollector, Fred,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CollectorConfig::fred(Environment::Production, "your-key").build()?;
//!     let fred = FredCollector::new(config, Fred::new())?;
//!
//!     let range = DateRange::parse("2024-01-01", "2024-06-30")?;
//!     let request = BatchRequest::new(vec!["DGS10".into(), "UNRATE".into()], range)?
//!         .with_frequency(DataFrequency::Monthly);
//!     let outcome = fred.collect_batch(request).await?;
//!
//!     for row in outcome.table.rows() {
//!         println!("{} {} {}", row.symbol, row.date, row.value);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Caller         │
//! └────────┬────────┘
//!          │ Collector trait
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │  GovCollector   │────▶│ Rate Limiter     │
//! │  (engine)       │     │ (window + burst) │
//! └────────┬────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Source Adapter  │     │ HTTP Client      │
//! │ (SEC/FRED/UST)  │     │ (reqwest/script) │
//! └─────────────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ ObservationTable│
//! └─────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use govfeed_core::{CollectorError, CollectorErrorKind};
//!
//! fn handle_error(error: CollectorError) {
//!     match error.kind() {
//!         CollectorErrorKind::Authentication => {
//!             // Check the configured key
//!         }
//!         CollectorErrorKind::RateLimitExceeded => {
//!             // Back off until the window resets
//!         }
//!         kind if kind.is_transport() => {
//!             // Retries were already exhausted
//!         }
//!         _ => {}
//!     }
//! }
//! ```
//!
//! ## Security
//!
//! - API keys are masked in every logged URL
//! - Keys are supplied through configuration, never read from the environment

pub mod adapters;
pub mod clock;
pub mod collector;
pub mod config;
pub mod data_source;
pub mod domain;
pub mod engine;
pub mod error;
pub mod http_client;
pub mod retry;
pub mod throttling;

// Adapters and registry
pub use adapters::{
    create, Fred, FredCollector, SecEdgar, SecEdgarCollector, Treasury, TreasuryCollector,
};

// Clock
pub use clock::{Clock, ManualClock, SystemClock};

// Collector contract
pub use collector::{
    BatchOutcome, BatchRequest, CancelFlag, Collector, CollectorFuture, CollectorInfo,
    ConnectionReport, SkipReason, SymbolStatus, ValidationResult,
};

// Configuration
pub use config::{CollectorConfig, CollectorConfigBuilder, Environment, RateLimitPolicy};

// Source adapter contract
pub use data_source::{
    DataTypeSpec, LatestLookup, Page, PageQuery, SourceAdapter, SourceKind, SymbolCheck,
};

// Domain models
pub use domain::{
    Aggregation, DataFrequency, DateRange, Observation, ObservationTable, ObservationValue,
};

// Engine
pub use engine::GovCollector;

// Error types
pub use error::{CollectorError, CollectorErrorKind, CoreError, ValidationError};

// HTTP client types
pub use http_client::{
    HttpClient, HttpError, HttpErrorKind, HttpRequest, HttpResponse, NoopHttpClient,
    ReqwestHttpClient, ScriptedHttpClient,
};

// Retry logic
pub use retry::{Backoff, RetryConfig};

// Throttling
pub use throttling::{RateLimitStatus, RateLimiter};
