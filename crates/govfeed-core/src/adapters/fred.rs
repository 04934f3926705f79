//! FRED (Federal Reserve Economic Data) macro series.
//!
//! Requires an API key, sent as the `api_key` query parameter together with
//! `file_type=json`. Observations page by `offset`/`limit` against the
//! response `count`; `"."` marks a missing value.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::config::CollectorConfig;
use crate::data_source::{
    DataTypeSpec, LatestLookup, Page, PageQuery, SourceAdapter, SourceKind, SymbolCheck,
};
use crate::domain::{format_date, parse_date, Aggregation, Observation};
use crate::engine::GovCollector;
use crate::error::{CollectorError, CollectorErrorKind};
use crate::http_client::{HttpRequest, HttpResponse};

const DATA_TYPES: &[DataTypeSpec] = &[DataTypeSpec {
    name: "series",
    aggregation: Aggregation::Last,
    description: "Economic time series observations",
}];

/// Widely used indicators with their descriptions.
pub const POPULAR_SERIES: &[(&str, &str)] = &[
    ("GDP", "Gross Domestic Product"),
    ("GDPC1", "Real Gross Domestic Product"),
    ("GDPPOT", "Real Potential Gross Domestic Product"),
    ("UNRATE", "Unemployment Rate"),
    ("CIVPART", "Labor Force Participation Rate"),
    ("PAYEMS", "All Employees, Total Nonfarm"),
    ("UNEMPLOY", "Unemployment Level"),
    ("CPIAUCSL", "Consumer Price Index for All Urban Consumers: All Items"),
    (
        "CPILFESL",
        "Consumer Price Index for All Urban Consumers: All Items Less Food and Energy",
    ),
    ("PCEPI", "Personal Consumption Expenditures: Chain-type Price Index"),
    ("FEDFUNDS", "Federal Funds Effective Rate"),
    ("DGS3MO", "3-Month Treasury Constant Maturity Rate"),
    ("DGS10", "10-Year Treasury Constant Maturity Rate"),
    ("DGS30", "30-Year Treasury Constant Maturity Rate"),
    ("DEXUSEU", "U.S. / Euro Foreign Exchange Rate"),
    ("DEXJPUS", "Japan / U.S. Foreign Exchange Rate"),
    ("DEXCHUS", "China / U.S. Foreign Exchange Rate"),
    ("M1SL", "M1 Money Stock"),
    ("M2SL", "M2 Money Stock"),
    (
        "HOUST",
        "Housing Starts: Total: New Privately Owned Housing Units Started",
    ),
    ("CSUSHPISA", "S&P/Case-Shiller U.S. National Home Price Index"),
    ("INDPRO", "Industrial Production Index"),
    ("CAPACITY", "Capacity Utilization: Total Industry"),
];

/// Series metadata returned by the `series`, `series/search` and
/// `series/updates` endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesInfo {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub frequency: String,
    #[serde(default)]
    pub units: String,
    #[serde(default)]
    pub seasonal_adjustment: String,
    #[serde(default)]
    pub observation_start: String,
    #[serde(default)]
    pub observation_end: String,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default)]
    pub popularity: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub press_release: bool,
    #[serde(default)]
    pub link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeriesEnvelope {
    #[serde(default)]
    seriess: Vec<SeriesInfo>,
}

#[derive(Debug, Deserialize)]
struct ReleasesEnvelope {
    #[serde(default)]
    releases: Vec<Release>,
}

#[derive(Debug, Deserialize)]
struct ObservationsEnvelope {
    #[serde(default)]
    count: usize,
    #[serde(default)]
    offset: usize,
    observations: Vec<RawObservation>,
}

#[derive(Debug, Deserialize)]
struct RawObservation {
    date: Option<String>,
    value: Option<String>,
}

#[derive(Debug, Default)]
pub struct Fred {
    series_cache: Mutex<HashMap<String, SeriesInfo>>,
}

impl Fred {
    pub fn new() -> Self {
        Self::default()
    }

    fn cached(&self, series_id: &str) -> Option<SeriesInfo> {
        self.series_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(series_id)
            .cloned()
    }

    fn remember(&self, info: SeriesInfo) {
        self.series_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(info.id.clone(), info);
    }

    fn endpoint(config: &CollectorConfig, path: &str) -> HttpRequest {
        HttpRequest::get(format!("{}/{path}", config.base_url()))
    }

    fn series_request(config: &CollectorConfig, series_id: &str) -> HttpRequest {
        Self::endpoint(config, "series").with_query("series_id", series_id)
    }
}

fn body_mentions(response: &HttpResponse, needle: &str) -> bool {
    response.body.to_ascii_lowercase().contains(needle)
}

impl SourceAdapter for Fred {
    fn kind(&self) -> SourceKind {
        SourceKind::Fred
    }

    fn source_name(&self) -> &'static str {
        "FRED"
    }

    fn requires_api_key(&self) -> bool {
        true
    }

    fn data_types(&self) -> &'static [DataTypeSpec] {
        DATA_TYPES
    }

    fn normalize_symbol(&self, symbol: &str) -> String {
        symbol.trim().to_ascii_uppercase()
    }

    fn authorize(&self, request: HttpRequest, config: &CollectorConfig) -> HttpRequest {
        request
            .with_header("user-agent", config.user_agent())
            .with_query("api_key", config.api_key().unwrap_or_default())
            .with_query("file_type", "json")
    }

    fn connection_probe(&self, config: &CollectorConfig) -> HttpRequest {
        Self::endpoint(config, "category").with_query("category_id", "0")
    }

    /// FRED answers a bad key with HTTP 400 and an `api_key` error message.
    fn rejects_credentials(&self, response: &HttpResponse) -> bool {
        matches!(response.status, 401 | 403)
            || (response.status == 400 && body_mentions(response, "api_key"))
    }

    fn is_unknown_symbol(&self, response: &HttpResponse) -> bool {
        response.status == 404
            || (response.status == 400 && body_mentions(response, "does not exist"))
    }

    fn symbol_check(&self, symbol: &str, config: &CollectorConfig) -> SymbolCheck {
        if self.cached(symbol).is_some() {
            return SymbolCheck::Known(true);
        }
        SymbolCheck::Probe(Self::series_request(config, symbol))
    }

    fn probe_confirms_symbol(&self, response: &HttpResponse) -> bool {
        let Ok(envelope) = serde_json::from_str::<SeriesEnvelope>(&response.body) else {
            return false;
        };
        match envelope.seriess.into_iter().next() {
            Some(info) => {
                self.remember(info);
                true
            }
            None => false,
        }
    }

    fn page_request(
        &self,
        query: &PageQuery<'_>,
        config: &CollectorConfig,
    ) -> Result<HttpRequest, CollectorError> {
        let offset = match query.token {
            Some(token) => token.parse::<usize>().map_err(|_| {
                CollectorError::internal(format!("invalid FRED offset token '{token}'"))
            })?,
            None => 0,
        };

        let mut request =
            Self::endpoint(config, "series/observations").with_query("series_id", query.symbol);
        if !query.newest_first {
            request = request
                .with_query("observation_start", format_date(query.date_range.start_date()));
        }
        Ok(request
            .with_query("observation_end", format_date(query.date_range.end_date()))
            .with_query("sort_order", if query.newest_first { "desc" } else { "asc" })
            .with_query("limit", query.page_size.to_string())
            .with_query("offset", offset.to_string()))
    }

    fn parse_page(&self, query: &PageQuery<'_>, body: &str) -> Result<Page, CollectorError> {
        let envelope: ObservationsEnvelope = serde_json::from_str(body)
            .map_err(|e| CollectorError::malformed(format!("failed to parse FRED observations: {e}")))?;

        let returned = envelope.observations.len();
        let mut malformed = 0;
        let mut observations = Vec::with_capacity(returned);
        for raw in envelope.observations {
            let date = raw.date.as_deref().and_then(|value| parse_date(value).ok());
            let value = raw
                .value
                .as_deref()
                .filter(|value| *value != ".")
                .and_then(|value| value.trim().parse::<f64>().ok());
            match (date, value) {
                (Some(date), Some(value)) => {
                    observations.push(Observation::new(query.symbol, date, value));
                }
                _ => malformed += 1,
            }
        }

        let consumed = envelope.offset + returned;
        let next =
            (!query.newest_first && consumed < envelope.count).then(|| consumed.to_string());
        Ok(Page {
            observations,
            malformed,
            next,
        })
    }

    /// Monthly and quarterly series often have nothing in the last 30 days.
    fn latest_lookup(&self) -> LatestLookup {
        LatestLookup::NewestFirst
    }

    fn diagnostics(&self, response: &HttpResponse) -> BTreeMap<String, String> {
        BTreeMap::from([(
            String::from("api_key_valid"),
            (!self.rejects_credentials(response)).to_string(),
        )])
    }
}

/// FRED-specific read operations. All requests share the collector's rate
/// limiter, retries and error taxonomy.
impl GovCollector<Fred> {
    pub fn popular_indicators(&self) -> &'static [(&'static str, &'static str)] {
        POPULAR_SERIES
    }

    /// Series metadata, memoized per collector instance. Unknown ids give `None`.
    pub async fn get_series_info(&self, series_id: &str) -> Result<Option<SeriesInfo>, CollectorError> {
        let series_id = self.source().normalize_symbol(series_id);
        if let Some(info) = self.source().cached(&series_id) {
            return Ok(Some(info));
        }

        let request = Fred::series_request(self.config(), &series_id);
        let body = match self.fetch(request).await {
            Ok(body) => body,
            Err(error) if error.kind() == CollectorErrorKind::InvalidSymbol => return Ok(None),
            Err(error) => return Err(error),
        };

        let envelope: SeriesEnvelope = self.parse_json(&body)?;
        let info = envelope.seriess.into_iter().next();
        if let Some(info) = &info {
            self.source().remember(info.clone());
        }
        Ok(info)
    }

    pub async fn search_series(&self, text: &str, limit: u32) -> Result<Vec<SeriesInfo>, CollectorError> {
        let request = Fred::endpoint(self.config(), "series/search")
            .with_query("search_text", text)
            .with_query("limit", limit.to_string())
            .with_query("order_by", "search_rank");
        let envelope: SeriesEnvelope = self.parse_json(&self.fetch(request).await?)?;
        Ok(envelope.seriess)
    }

    pub async fn get_series_updates(&self, limit: u32) -> Result<Vec<SeriesInfo>, CollectorError> {
        let request = Fred::endpoint(self.config(), "series/updates")
            .with_query("limit", limit.to_string());
        let envelope: SeriesEnvelope = self.parse_json(&self.fetch(request).await?)?;
        Ok(envelope.seriess)
    }

    pub async fn get_releases(&self, limit: u32) -> Result<Vec<Release>, CollectorError> {
        let request = Fred::endpoint(self.config(), "releases")
            .with_query("limit", limit.to_string())
            .with_query("order_by", "release_id")
            .with_query("sort_order", "asc");
        let envelope: ReleasesEnvelope = self.parse_json(&self.fetch(request).await?)?;
        Ok(envelope.releases)
    }
}
