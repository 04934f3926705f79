//! Source adapter contract.
//!
//! An adapter is the source-specific half of a collector: it builds requests,
//! walks pagination tokens and maps response bodies into [`Observation`] rows.
//! It never performs I/O itself; the engine in [`crate::engine`] owns the
//! transport, rate limiter, retries and session, so every source shares one
//! batch algorithm.
//!
//! | Source | Kind | Key | Validation | Pagination |
//! |--------|------|-----|------------|------------|
//! | SEC EDGAR | [`SourceKind::SecEdgar`] | no | static catalog | `filings.files` |
//! | FRED | [`SourceKind::Fred`] | yes | `series` probe | offset/limit |
//! | Treasury | [`SourceKind::Treasury`] | no | static catalog | `page[number]` |

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::CollectorConfig;
use crate::domain::{Aggregation, DateRange, Observation};
use crate::error::{CollectorError, ValidationError};
use crate::http_client::{HttpRequest, HttpResponse};

/// Canonical source identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    SecEdgar,
    Fred,
    Treasury,
}

impl SourceKind {
    pub const ALL: [Self; 3] = [Self::SecEdgar, Self::Fred, Self::Treasury];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SecEdgar => "sec_edgar",
            Self::Fred => "fred",
            Self::Treasury => "treasury",
        }
    }
}

impl Display for SourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "sec_edgar" | "sec" | "edgar" => Ok(Self::SecEdgar),
            "fred" => Ok(Self::Fred),
            "treasury" => Ok(Self::Treasury),
            other => Err(ValidationError::InvalidSource {
                value: other.to_owned(),
            }),
        }
    }
}

/// A data type a source can collect and the reduction used when resampling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataTypeSpec {
    pub name: &'static str,
    pub aggregation: Aggregation,
    pub description: &'static str,
}

/// Parameters of one page request.
#[derive(Debug, Clone, Copy)]
pub struct PageQuery<'a> {
    pub symbol: &'a str,
    pub date_range: DateRange,
    pub data_type: &'a str,
    /// 1-based page counter.
    pub page_number: u32,
    /// Token returned by the previous page, `None` for the first page.
    pub token: Option<&'a str>,
    pub page_size: u32,
    /// Newest rows first with no lower date bound; only `date_range.end_date()`
    /// is sent. Used for latest-observation lookups.
    pub newest_first: bool,
}

/// Rows mapped from one response body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub observations: Vec<Observation>,
    /// Rows present in the body that could not be mapped.
    pub malformed: usize,
    /// Token for the following page, if the source signals one.
    pub next: Option<String>,
}

impl Page {
    pub fn last(observations: Vec<Observation>, malformed: usize) -> Self {
        Self {
            observations,
            malformed,
            next: None,
        }
    }
}

/// How `get_latest_observation` finds the newest row of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatestLookup {
    /// Collect a trailing window ending today and keep its last row.
    Trailing { days: u32 },
    /// One page of size one, newest first, bounded only by today.
    NewestFirst,
}

/// How an identifier is checked during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolCheck {
    /// Answered from a static catalog.
    Known(bool),
    /// Requires a lightweight existence request.
    Probe(HttpRequest),
}

pub trait SourceAdapter: Send + Sync + 'static {
    fn kind(&self) -> SourceKind;

    fn source_name(&self) -> &'static str;

    fn requires_api_key(&self) -> bool {
        false
    }

    /// Supported data types; the first entry is the default.
    fn data_types(&self) -> &'static [DataTypeSpec];

    fn default_data_type(&self) -> &'static str {
        self.data_types().first().map_or("", |spec| spec.name)
    }

    fn data_type(&self, name: &str) -> Option<&'static DataTypeSpec> {
        self.data_types().iter().find(|spec| spec.name == name)
    }

    fn normalize_symbol(&self, symbol: &str) -> String {
        symbol.trim().to_owned()
    }

    /// Applies credentials and required headers to an outbound request.
    fn authorize(&self, request: HttpRequest, config: &CollectorConfig) -> HttpRequest {
        request.with_header("user-agent", config.user_agent())
    }

    /// Cheapest request that proves reachability and, where relevant, the key.
    fn connection_probe(&self, config: &CollectorConfig) -> HttpRequest;

    fn rejects_credentials(&self, response: &HttpResponse) -> bool {
        matches!(response.status, 401 | 403)
    }

    /// Response meaning the identifier does not exist at the source.
    fn is_unknown_symbol(&self, response: &HttpResponse) -> bool {
        response.status == 404
    }

    fn symbol_check(&self, symbol: &str, config: &CollectorConfig) -> SymbolCheck;

    fn probe_confirms_symbol(&self, response: &HttpResponse) -> bool {
        response.is_success()
    }

    fn page_request(
        &self,
        query: &PageQuery<'_>,
        config: &CollectorConfig,
    ) -> Result<HttpRequest, CollectorError>;

    /// Maps a successful body. `Err` means the body as a whole is unusable.
    fn parse_page(&self, query: &PageQuery<'_>, body: &str) -> Result<Page, CollectorError>;

    fn latest_lookup(&self) -> LatestLookup {
        LatestLookup::Trailing { days: 30 }
    }

    /// Source-specific details reported by `test_connection`.
    fn diagnostics(&self, response: &HttpResponse) -> BTreeMap<String, String> {
        let _ = response;
        BTreeMap::new()
    }
}
