//! U.S. Treasury Fiscal Data.
//!
//! Keyless. Datasets are filtered with `filter=field:op:value,...`, sorted with
//! `sort`, and paged with `page[number]`/`page[size]`; `meta.total-pages`
//! tells whether another page exists.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::collector::{BatchOutcome, BatchRequest, Collector};
use crate::config::CollectorConfig;
use crate::data_source::{
    DataTypeSpec, LatestLookup, Page, PageQuery, SourceAdapter, SourceKind, SymbolCheck,
};
use crate::domain::{format_date, parse_date, Aggregation, DateRange, Observation};
use crate::engine::GovCollector;
use crate::error::CollectorError;
use crate::http_client::{HttpRequest, HttpResponse};

pub const DAILY_TREASURY_YIELD: &str = "daily_treasury_yield";
pub const AUCTION_DATA: &str = "auction_data";
pub const INTEREST_RATES: &str = "interest_rates";
pub const DEBT_TO_PENNY: &str = "debt_to_penny";

const DATA_TYPES: &[DataTypeSpec] = &[
    DataTypeSpec {
        name: DAILY_TREASURY_YIELD,
        aggregation: Aggregation::Last,
        description: "Daily yield curve rate by maturity",
    },
    DataTypeSpec {
        name: AUCTION_DATA,
        aggregation: Aggregation::Mean,
        description: "Auction results by security type",
    },
    DataTypeSpec {
        name: INTEREST_RATES,
        aggregation: Aggregation::Last,
        description: "Average interest rates on outstanding debt",
    },
    DataTypeSpec {
        name: DEBT_TO_PENNY,
        aggregation: Aggregation::Last,
        description: "Total public debt outstanding, daily",
    },
];

/// Yield curve maturities, shortest first.
pub const MATURITIES: &[&str] = &[
    "1 Mo", "2 Mo", "3 Mo", "4 Mo", "6 Mo", "1 Yr", "2 Yr", "3 Yr", "5 Yr", "7 Yr", "10 Yr",
    "20 Yr", "30 Yr",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityType {
    pub key: &'static str,
    /// Value of the dataset's `security_type` column.
    pub api_value: &'static str,
    pub description: &'static str,
    /// Value of the `security_desc` column in average interest rates.
    pub interest_desc: &'static str,
    pub auctioned: bool,
}

pub const SECURITY_TYPES: &[SecurityType] = &[
    SecurityType {
        key: "bills",
        api_value: "Bill",
        description: "Treasury Bills (T-Bills)",
        interest_desc: "Treasury Bills",
        auctioned: true,
    },
    SecurityType {
        key: "notes",
        api_value: "Note",
        description: "Treasury Notes (T-Notes)",
        interest_desc: "Treasury Notes",
        auctioned: true,
    },
    SecurityType {
        key: "bonds",
        api_value: "Bond",
        description: "Treasury Bonds (T-Bonds)",
        interest_desc: "Treasury Bonds",
        auctioned: true,
    },
    SecurityType {
        key: "tips",
        api_value: "TIPS",
        description: "Treasury Inflation-Protected Securities (TIPS)",
        interest_desc: "Treasury Inflation-Protected Securities (TIPS)",
        auctioned: true,
    },
    SecurityType {
        key: "frns",
        api_value: "FRN",
        description: "Floating Rate Notes (FRNs)",
        interest_desc: "Treasury Floating Rate Notes (FRN)",
        auctioned: true,
    },
    SecurityType {
        key: "savings",
        api_value: "Savings",
        description: "Savings Bonds (I and EE Bonds)",
        interest_desc: "United States Savings Securities",
        auctioned: false,
    },
];

/// Looks up a security type by key or interest-rate description,
/// case-insensitively; singular keys match.
pub fn security_type(symbol: &str) -> Option<&'static SecurityType> {
    let trimmed = symbol.trim();
    let lower = trimmed.to_ascii_lowercase();
    SECURITY_TYPES.iter().find(|kind| {
        kind.key == lower
            || kind.key.trim_end_matches('s') == lower
            || kind.interest_desc.eq_ignore_ascii_case(trimmed)
    })
}

/// Debt to the Penny series: symbol and the amount column it reads.
pub const DEBT_SERIES: &[(&str, &str)] = &[
    ("total_public_debt", "tot_pub_debt_out_amt"),
    ("debt_held_public", "debt_held_public_amt"),
    ("intragovernmental", "intragov_hold_amt"),
];

pub fn debt_series(symbol: &str) -> Option<(&'static str, &'static str)> {
    let lower = symbol.trim().to_ascii_lowercase();
    DEBT_SERIES.iter().copied().find(|(key, _)| *key == lower)
}

pub fn maturity(symbol: &str) -> Option<&'static str> {
    let trimmed = symbol.trim();
    MATURITIES
        .iter()
        .copied()
        .find(|maturity| maturity.eq_ignore_ascii_case(trimmed))
}

struct Dataset {
    path: &'static str,
    date_field: &'static str,
}

fn dataset(data_type: &str) -> Option<Dataset> {
    match data_type {
        DAILY_TREASURY_YIELD => Some(Dataset {
            path: "v1/accounting/od/daily_treasury_yield_curve",
            date_field: "record_date",
        }),
        AUCTION_DATA => Some(Dataset {
            path: "v1/accounting/od/auctions_query",
            date_field: "auction_date",
        }),
        INTEREST_RATES => Some(Dataset {
            path: "v2/accounting/od/avg_interest_rates",
            date_field: "record_date",
        }),
        DEBT_TO_PENNY => Some(Dataset {
            path: "v2/accounting/od/debt_to_penny",
            date_field: "record_date",
        }),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct FiscalEnvelope {
    data: Vec<Map<String, Value>>,
    #[serde(default)]
    meta: FiscalMeta,
}

#[derive(Debug, Default, Deserialize)]
struct FiscalMeta {
    #[serde(rename = "total-pages", default)]
    total_pages: Option<u32>,
    #[serde(rename = "total-count", default)]
    total_count: Option<u64>,
}

/// Reads a numeric field that may arrive as a JSON number or a string; `"null"`
/// and blanks are absent.
fn number_field(row: &Map<String, Value>, key: &str) -> Option<f64> {
    match row.get(key)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn text_field(row: &Map<String, Value>, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(text) if !text.is_empty() && text != "null" => Some(text.clone()),
        _ => None,
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Treasury;

impl Treasury {
    pub fn new() -> Self {
        Self
    }

    fn map_row(query: &PageQuery<'_>, date_field: &str, row: &Map<String, Value>) -> Option<Observation> {
        let date = text_field(row, date_field).and_then(|value| parse_date(&value).ok())?;

        match query.data_type {
            DAILY_TREASURY_YIELD => {
                let value = number_field(row, "value")?;
                Some(Observation::new(query.symbol, date, value).with_extra("maturity", query.symbol))
            }
            AUCTION_DATA => {
                let high_yield = number_field(row, "high_yield")?;
                Some(
                    Observation::new(query.symbol, date, high_yield)
                        .with_optional_extra("security_term", text_field(row, "security_term"))
                        .with_optional_extra("low_yield", number_field(row, "low_yield"))
                        .with_optional_extra("median_yield", number_field(row, "median_yield"))
                        .with_optional_extra("issue_date", text_field(row, "issue_date"))
                        .with_optional_extra("maturity_date", text_field(row, "maturity_date"))
                        .with_optional_extra("cusip", text_field(row, "cusip")),
                )
            }
            DEBT_TO_PENNY => {
                let (_, column) = debt_series(query.symbol)?;
                let amount = number_field(row, column)?;
                Some(
                    Observation::new(query.symbol, date, amount)
                        .with_optional_extra("tot_pub_debt_out_amt", number_field(row, "tot_pub_debt_out_amt"))
                        .with_optional_extra("debt_held_public_amt", number_field(row, "debt_held_public_amt"))
                        .with_optional_extra("intragov_hold_amt", number_field(row, "intragov_hold_amt")),
                )
            }
            _ => {
                let rate = number_field(row, "avg_interest_rate_amt")?;
                Some(
                    Observation::new(query.symbol, date, rate)
                        .with_optional_extra("security_type_desc", text_field(row, "security_type_desc")),
                )
            }
        }
    }
}

impl SourceAdapter for Treasury {
    fn kind(&self) -> SourceKind {
        SourceKind::Treasury
    }

    fn source_name(&self) -> &'static str {
        "Treasury Fiscal Data"
    }

    fn data_types(&self) -> &'static [DataTypeSpec] {
        DATA_TYPES
    }

    fn normalize_symbol(&self, symbol: &str) -> String {
        if let Some(maturity) = maturity(symbol) {
            return maturity.to_owned();
        }
        if let Some(kind) = security_type(symbol) {
            return kind.key.to_owned();
        }
        if let Some((key, _)) = debt_series(symbol) {
            return key.to_owned();
        }
        symbol.trim().to_owned()
    }

    fn connection_probe(&self, config: &CollectorConfig) -> HttpRequest {
        HttpRequest::get(format!(
            "{}/v1/accounting/od/daily_treasury_yield_curve",
            config.base_url()
        ))
        .with_query("page[size]", "1")
    }

    fn symbol_check(&self, symbol: &str, _config: &CollectorConfig) -> SymbolCheck {
        SymbolCheck::Known(
            maturity(symbol).is_some()
                || security_type(symbol).is_some()
                || debt_series(symbol).is_some(),
        )
    }

    /// Interest rates are monthly; a trailing window can miss the last release.
    fn latest_lookup(&self) -> LatestLookup {
        LatestLookup::NewestFirst
    }

    fn page_request(
        &self,
        query: &PageQuery<'_>,
        config: &CollectorConfig,
    ) -> Result<HttpRequest, CollectorError> {
        let dataset = dataset(query.data_type)
            .ok_or_else(|| CollectorError::unsupported_data_type(query.data_type, self.source_name()))?;
        let column_filter = match query.data_type {
            DAILY_TREASURY_YIELD => {
                let maturity = maturity(query.symbol)
                    .ok_or_else(|| CollectorError::invalid_symbol(query.symbol))?;
                Some(format!("maturity:eq:{maturity}"))
            }
            AUCTION_DATA => {
                let kind = security_type(query.symbol)
                    .filter(|kind| kind.auctioned)
                    .ok_or_else(|| CollectorError::invalid_symbol(query.symbol))?;
                Some(format!("security_type:eq:{}", kind.api_value))
            }
            DEBT_TO_PENNY => {
                debt_series(query.symbol).ok_or_else(|| CollectorError::invalid_symbol(query.symbol))?;
                None
            }
            _ => {
                let kind = security_type(query.symbol)
                    .ok_or_else(|| CollectorError::invalid_symbol(query.symbol))?;
                Some(format!("security_desc:eq:{}", kind.interest_desc))
            }
        };

        let field = dataset.date_field;
        let mut filters = Vec::with_capacity(3);
        if !query.newest_first {
            filters.push(format!("{field}:gte:{}", format_date(query.date_range.start_date())));
        }
        filters.push(format!("{field}:lte:{}", format_date(query.date_range.end_date())));
        filters.extend(column_filter);
        let sort = if query.newest_first {
            format!("-{field}")
        } else {
            field.to_owned()
        };
        let page_number = query.token.unwrap_or("1");

        Ok(HttpRequest::get(format!("{}/{}", config.base_url(), dataset.path))
            .with_query("filter", filters.join(","))
            .with_query("sort", sort)
            .with_query("page[number]", page_number)
            .with_query("page[size]", query.page_size.to_string()))
    }

    fn parse_page(&self, query: &PageQuery<'_>, body: &str) -> Result<Page, CollectorError> {
        let dataset = dataset(query.data_type)
            .ok_or_else(|| CollectorError::unsupported_data_type(query.data_type, self.source_name()))?;
        let envelope: FiscalEnvelope = serde_json::from_str(body).map_err(|e| {
            CollectorError::malformed(format!("failed to parse Treasury response: {e}"))
        })?;

        let mut malformed = 0;
        let mut observations = Vec::with_capacity(envelope.data.len());
        for row in &envelope.data {
            match Self::map_row(query, dataset.date_field, row) {
                Some(observation) => observations.push(observation),
                None => malformed += 1,
            }
        }

        let current = query
            .token
            .and_then(|token| token.parse::<u32>().ok())
            .unwrap_or(1);
        let next = envelope
            .meta
            .total_pages
            .filter(|total| !query.newest_first && current < *total)
            .map(|_| (current + 1).to_string());
        Ok(Page {
            observations,
            malformed,
            next,
        })
    }

    fn diagnostics(&self, response: &HttpResponse) -> BTreeMap<String, String> {
        let mut diagnostics = BTreeMap::new();
        if let Ok(envelope) = serde_json::from_str::<FiscalEnvelope>(&response.body) {
            if let Some(total) = envelope.meta.total_count {
                diagnostics.insert(String::from("total_records"), total.to_string());
            }
        }
        diagnostics
    }
}

/// Treasury-specific read operations layered on batch collection.
impl GovCollector<Treasury> {
    /// Maturities, then security type keys, then debt series.
    pub fn available_symbols(&self) -> Vec<&'static str> {
        MATURITIES
            .iter()
            .copied()
            .chain(SECURITY_TYPES.iter().map(|kind| kind.key))
            .chain(DEBT_SERIES.iter().map(|(key, _)| *key))
            .collect()
    }

    /// Daily yields for every maturity over `date_range`.
    pub async fn get_yield_curve(&self, date_range: DateRange) -> Result<BatchOutcome, CollectorError> {
        let symbols = MATURITIES.iter().map(|maturity| (*maturity).to_owned()).collect();
        let request = BatchRequest::new(symbols, date_range)?.with_data_type(DAILY_TREASURY_YIELD);
        self.collect_batch(request).await
    }

    /// Most recent daily yield for one maturity, or `None` if the dataset has
    /// no row for it.
    pub async fn get_latest_yield(&self, maturity_label: &str) -> Result<Option<Observation>, CollectorError> {
        let maturity = maturity(maturity_label).ok_or_else(|| CollectorError::invalid_symbol(maturity_label))?;
        self.get_latest_observation(maturity).await
    }

    /// Average interest rates for one security type, or every type.
    pub async fn get_interest_rates(
        &self,
        date_range: DateRange,
        security: Option<&str>,
    ) -> Result<BatchOutcome, CollectorError> {
        let symbols = match security {
            Some(symbol) => {
                let kind = security_type(symbol).ok_or_else(|| CollectorError::invalid_symbol(symbol))?;
                vec![kind.key.to_owned()]
            }
            None => SECURITY_TYPES.iter().map(|kind| kind.key.to_owned()).collect(),
        };
        let request = BatchRequest::new(symbols, date_range)?.with_data_type(INTEREST_RATES);
        self.collect_batch(request).await
    }

    /// Daily total public debt outstanding.
    pub async fn get_debt_to_penny(&self, date_range: DateRange) -> Result<BatchOutcome, CollectorError> {
        let request = BatchRequest::new(vec![String::from("total_public_debt")], date_range)?
            .with_data_type(DEBT_TO_PENNY);
        self.collect_batch(request).await
    }

    /// Auction results for one security type, or every auctioned type.
    pub async fn get_auction_data(
        &self,
        date_range: DateRange,
        security: Option<&str>,
    ) -> Result<BatchOutcome, CollectorError> {
        let symbols = match security {
            Some(symbol) => {
                let kind = security_type(symbol)
                    .filter(|kind| kind.auctioned)
                    .ok_or_else(|| CollectorError::invalid_symbol(symbol))?;
                vec![kind.key.to_owned()]
            }
            None => SECURITY_TYPES
                .iter()
                .filter(|kind| kind.auctioned)
                .map(|kind| kind.key.to_owned())
                .collect(),
        };
        let request = BatchRequest::new(symbols, date_range)?.with_data_type(AUCTION_DATA);
        self.collect_batch(request).await
    }
}
