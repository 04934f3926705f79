//! SEC EDGAR filings and XBRL company facts.
//!
//! Keyless, but every request must carry a descriptive `User-Agent`. Tickers
//! resolve to CIKs through a static catalog; a bare numeric CIK is accepted
//! as well. The submissions document holds the most recent filings in
//! columnar arrays and lists older filings in `filings.files`, which is walked
//! as the pagination token.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::collector::{BatchRequest, Collector, SymbolStatus};
use crate::config::CollectorConfig;
use crate::data_source::{
    DataTypeSpec, LatestLookup, Page, PageQuery, SourceAdapter, SourceKind, SymbolCheck,
};
use crate::domain::{iso_date, parse_date, Aggregation, DateRange, Observation};
use crate::engine::GovCollector;
use crate::error::CollectorError;
use crate::http_client::{HttpRequest, HttpResponse};

pub const FILINGS: &str = "filings";
pub const FINANCIAL_FACTS: &str = "financial_facts";

const DATA_TYPES: &[DataTypeSpec] = &[
    DataTypeSpec {
        name: FILINGS,
        aggregation: Aggregation::Count,
        description: "Filing index: form, accession number and filing date",
    },
    DataTypeSpec {
        name: FINANCIAL_FACTS,
        aggregation: Aggregation::Last,
        description: "XBRL us-gaap facts for key financial concepts",
    },
];

/// Ticker, CIK and registrant name.
pub const SAMPLE_COMPANIES: &[(&str, u64, &str)] = &[
    ("AAPL", 320_193, "Apple Inc."),
    ("MSFT", 789_019, "Microsoft Corporation"),
    ("GOOGL", 1_652_044, "Alphabet Inc."),
    ("AMZN", 1_018_724, "Amazon.com Inc."),
    ("TSLA", 1_318_605, "Tesla Inc."),
    ("META", 1_326_801, "Meta Platforms Inc."),
    ("NFLX", 1_065_280, "Netflix Inc."),
    ("NVDA", 1_045_810, "NVIDIA Corporation"),
    ("JPM", 19_617, "JPMorgan Chase & Co."),
    ("JNJ", 200_406, "Johnson & Johnson"),
    ("WMT", 104_169, "Walmart Inc."),
    ("UNH", 731_766, "UnitedHealth Group Inc."),
    ("V", 1_403_161, "Visa Inc."),
];

/// us-gaap concepts summarized by `get_company_facts` and emitted as
/// `financial_facts` rows.
pub const KEY_CONCEPTS: &[&str] = &[
    "Assets",
    "AssetsCurrent",
    "Liabilities",
    "LiabilitiesCurrent",
    "StockholdersEquity",
    "CashAndCashEquivalentsAtCarryingValue",
    "Revenues",
    "NetIncomeLoss",
    "OperatingIncomeLoss",
    "GrossProfit",
    "OperatingExpenses",
    "NetCashProvidedByUsedInOperatingActivities",
    "NetCashProvidedByUsedInInvestingActivities",
    "NetCashProvidedByUsedInFinancingActivities",
    "EarningsPerShareBasic",
    "EarningsPerShareDiluted",
    "WeightedAverageNumberOfSharesOutstandingBasic",
    "CommonStockSharesOutstanding",
];

const PROBE_CIK: u64 = 320_193;

/// Resolves a ticker from the catalog, or a numeric CIK of up to ten digits.
pub fn cik_for(symbol: &str) -> Option<u64> {
    let symbol = symbol.trim();
    if !symbol.is_empty() && symbol.len() <= 10 && symbol.bytes().all(|b| b.is_ascii_digit()) {
        return symbol.parse().ok();
    }
    SAMPLE_COMPANIES
        .iter()
        .find(|(ticker, _, _)| ticker.eq_ignore_ascii_case(symbol))
        .map(|(_, cik, _)| *cik)
}

fn padded_cik(cik: u64) -> String {
    format!("CIK{cik:010}")
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilingColumns {
    #[serde(default)]
    accession_number: Vec<String>,
    #[serde(default)]
    filing_date: Vec<String>,
    #[serde(default)]
    report_date: Vec<String>,
    #[serde(default)]
    form: Vec<String>,
    #[serde(default)]
    primary_document: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilingFile {
    name: String,
    #[serde(default)]
    filing_from: Option<String>,
    #[serde(default)]
    filing_to: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Filings {
    #[serde(default)]
    recent: FilingColumns,
    #[serde(default)]
    files: Vec<FilingFile>,
}

#[derive(Debug, Deserialize)]
struct Submissions {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    filings: Filings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompanyFacts {
    #[serde(default)]
    entity_name: String,
    #[serde(default)]
    facts: BTreeMap<String, BTreeMap<String, Concept>>,
}

#[derive(Debug, Deserialize)]
struct Concept {
    #[serde(default)]
    units: BTreeMap<String, Vec<FactEntry>>,
}

#[derive(Debug, Deserialize)]
struct FactEntry {
    end: Option<String>,
    val: Option<f64>,
    fy: Option<i64>,
    fp: Option<String>,
    form: Option<String>,
    filed: Option<String>,
    accn: Option<String>,
}

/// Most recent annual (10-K) value of one concept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactValue {
    pub concept: String,
    pub unit: String,
    pub value: f64,
    #[serde(with = "iso_date")]
    pub end: Date,
    pub fiscal_year: Option<i64>,
    pub fiscal_period: Option<String>,
    pub filed: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyFactsSummary {
    pub symbol: String,
    pub cik: u64,
    pub entity_name: String,
    pub facts: BTreeMap<String, FactValue>,
}

impl CompanyFactsSummary {
    pub fn value(&self, concept: &str) -> Option<f64> {
        self.facts.get(concept).map(|fact| fact.value)
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|value| !value.is_empty()).cloned()
}

fn filing_rows(symbol: &str, columns: &FilingColumns) -> (Vec<Observation>, usize) {
    let mut rows = Vec::with_capacity(columns.filing_date.len());
    let mut malformed = 0;

    for (index, filed) in columns.filing_date.iter().enumerate() {
        let date = parse_date(filed).ok();
        let form = non_empty(columns.form.get(index));
        let (Some(date), Some(form)) = (date, form) else {
            malformed += 1;
            continue;
        };
        rows.push(
            Observation::new(symbol, date, form.as_str())
                .with_extra("form_type", form)
                .with_optional_extra("accession_number", non_empty(columns.accession_number.get(index)))
                .with_optional_extra("report_date", non_empty(columns.report_date.get(index)))
                .with_optional_extra("primary_document", non_empty(columns.primary_document.get(index))),
        );
    }

    (rows, malformed)
}

fn key_concepts(facts: &CompanyFacts) -> impl Iterator<Item = (&'static str, &Concept)> {
    let gaap = facts.facts.get("us-gaap");
    KEY_CONCEPTS
        .iter()
        .filter_map(move |name| gaap.and_then(|concepts| concepts.get(*name)).map(|concept| (*name, concept)))
}

fn fact_rows(symbol: &str, facts: &CompanyFacts, date_range: DateRange) -> (Vec<Observation>, usize) {
    let mut rows = Vec::new();
    let mut malformed = 0;

    for (name, concept) in key_concepts(facts) {
        for (unit, entries) in &concept.units {
            for entry in entries {
                let end = entry.end.as_deref().and_then(|end| parse_date(end).ok());
                let (Some(end), Some(value)) = (end, entry.val) else {
                    malformed += 1;
                    continue;
                };
                if !date_range.contains(end) {
                    continue;
                }
                rows.push(
                    Observation::new(symbol, end, value)
                        .with_extra("concept", name)
                        .with_extra("unit", unit.as_str())
                        .with_optional_extra("fiscal_year", entry.fy)
                        .with_optional_extra("fiscal_period", entry.fp.clone())
                        .with_optional_extra("form", entry.form.clone())
                        .with_optional_extra("filed", entry.filed.clone())
                        .with_optional_extra("accession_number", entry.accn.clone()),
                );
            }
        }
    }

    (rows, malformed)
}

fn latest_annual(name: &str, concept: &Concept) -> Option<FactValue> {
    concept
        .units
        .iter()
        .flat_map(|(unit, entries)| entries.iter().map(move |entry| (unit, entry)))
        .filter(|(_, entry)| entry.form.as_deref() == Some("10-K"))
        .filter_map(|(unit, entry)| {
            let end = parse_date(entry.end.as_deref()?).ok()?;
            Some(FactValue {
                concept: name.to_owned(),
                unit: unit.clone(),
                value: entry.val?,
                end,
                fiscal_year: entry.fy,
                fiscal_period: entry.fp.clone(),
                filed: entry.filed.clone(),
            })
        })
        .max_by(|left, right| (left.end, &left.filed).cmp(&(right.end, &right.filed)))
}

/// Splits a `filings.files` token into the file to fetch and the remainder.
fn split_token(token: &str) -> (&str, Option<&str>) {
    match token.split_once(',') {
        Some((head, rest)) => (head, Some(rest)),
        None => (token, None),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SecEdgar;

impl SecEdgar {
    pub fn new() -> Self {
        Self
    }

    fn submissions_request(config: &CollectorConfig, cik: u64) -> HttpRequest {
        HttpRequest::get(format!(
            "{}/submissions/{}.json",
            config.base_url(),
            padded_cik(cik)
        ))
    }

    fn company_facts_request(config: &CollectorConfig, cik: u64) -> HttpRequest {
        HttpRequest::get(format!(
            "{}/api/xbrl/companyfacts/{}.json",
            config.base_url(),
            padded_cik(cik)
        ))
    }

    /// Older filing files whose filing window overlaps the range.
    fn overlapping_files(files: &[FilingFile], date_range: DateRange) -> Vec<&str> {
        files
            .iter()
            .filter(|file| {
                let from = file.filing_from.as_deref().and_then(|value| parse_date(value).ok());
                let to = file.filing_to.as_deref().and_then(|value| parse_date(value).ok());
                match (from, to) {
                    (Some(from), Some(to)) => date_range.overlaps(from, to),
                    _ => true,
                }
            })
            .map(|file| file.name.as_str())
            .collect()
    }

    fn parse_filings(&self, query: &PageQuery<'_>, body: &str) -> Result<Page, CollectorError> {
        let malformed_body =
            |e: serde_json::Error| CollectorError::malformed(format!("failed to parse SEC filings: {e}"));

        match query.token {
            None => {
                let submissions: Submissions = serde_json::from_str(body).map_err(malformed_body)?;
                let (observations, malformed) = filing_rows(query.symbol, &submissions.filings.recent);
                let older = Self::overlapping_files(&submissions.filings.files, query.date_range);
                let next = (!older.is_empty()).then(|| older.join(","));
                Ok(Page {
                    observations,
                    malformed,
                    next,
                })
            }
            Some(token) => {
                let columns: FilingColumns = serde_json::from_str(body).map_err(malformed_body)?;
                let (observations, malformed) = filing_rows(query.symbol, &columns);
                let (_, rest) = split_token(token);
                Ok(Page {
                    observations,
                    malformed,
                    next: rest.map(str::to_owned),
                })
            }
        }
    }
}

impl SourceAdapter for SecEdgar {
    fn kind(&self) -> SourceKind {
        SourceKind::SecEdgar
    }

    fn source_name(&self) -> &'static str {
        "SEC EDGAR"
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
            .with_header("accept", "application/json")
    }

    fn connection_probe(&self, config: &CollectorConfig) -> HttpRequest {
        Self::submissions_request(config, PROBE_CIK)
    }

    fn symbol_check(&self, symbol: &str, _config: &CollectorConfig) -> SymbolCheck {
        SymbolCheck::Known(cik_for(symbol).is_some())
    }

    fn page_request(
        &self,
        query: &PageQuery<'_>,
        config: &CollectorConfig,
    ) -> Result<HttpRequest, CollectorError> {
        let cik = cik_for(query.symbol).ok_or_else(|| CollectorError::invalid_symbol(query.symbol))?;

        match (query.data_type, query.token) {
            (FINANCIAL_FACTS, _) => Ok(Self::company_facts_request(config, cik)),
            (FILINGS, None) => Ok(Self::submissions_request(config, cik)),
            (FILINGS, Some(token)) => {
                let (file, _) = split_token(token);
                Ok(HttpRequest::get(format!("{}/submissions/{file}", config.base_url())))
            }
            (other, _) => Err(CollectorError::unsupported_data_type(other, self.source_name())),
        }
    }

    fn parse_page(&self, query: &PageQuery<'_>, body: &str) -> Result<Page, CollectorError> {
        if query.data_type == FINANCIAL_FACTS {
            let facts: CompanyFacts = serde_json::from_str(body).map_err(|e| {
                CollectorError::malformed(format!("failed to parse SEC company facts: {e}"))
            })?;
            let (observations, malformed) = fact_rows(query.symbol, &facts, query.date_range);
            return Ok(Page::last(observations, malformed));
        }
        self.parse_filings(query, body)
    }

    /// Filings are sparse; a quarter-length window can be empty.
    fn latest_lookup(&self) -> LatestLookup {
        LatestLookup::Trailing { days: 365 }
    }

    fn diagnostics(&self, response: &HttpResponse) -> BTreeMap<String, String> {
        let mut diagnostics = BTreeMap::from([(
            String::from("user_agent_accepted"),
            (!self.rejects_credentials(response)).to_string(),
        )]);
        if let Some(name) = serde_json::from_str::<Submissions>(&response.body)
            .ok()
            .and_then(|submissions| submissions.name)
        {
            diagnostics.insert(String::from("probe_entity"), name);
        }
        diagnostics
    }
}

/// SEC-specific read operations.
impl GovCollector<SecEdgar> {
    pub fn cik_for(&self, symbol: &str) -> Option<u64> {
        cik_for(symbol)
    }

    pub fn available_symbols(&self) -> Vec<&'static str> {
        SAMPLE_COMPANIES.iter().map(|(ticker, _, _)| *ticker).collect()
    }

    /// Latest annual value of each key concept the company reports.
    pub async fn get_company_facts(&self, symbol: &str) -> Result<CompanyFactsSummary, CollectorError> {
        let symbol = self.source().normalize_symbol(symbol);
        let cik = cik_for(&symbol).ok_or_else(|| CollectorError::invalid_symbol(&symbol))?;

        let body = self.fetch(SecEdgar::company_facts_request(self.config(), cik)).await?;
        let facts: CompanyFacts = self.parse_json(&body)?;
        let summary = key_concepts(&facts)
            .filter_map(|(name, concept)| latest_annual(name, concept))
            .map(|fact| (fact.concept.clone(), fact))
            .collect();

        Ok(CompanyFactsSummary {
            symbol,
            cik,
            entity_name: facts.entity_name,
            facts: summary,
        })
    }

    /// Filings in `date_range`, optionally restricted to one form type
    /// (`10-K`, `8-K`, ...), oldest first.
    pub async fn get_filings(
        &self,
        symbol: &str,
        date_range: DateRange,
        form_type: Option<&str>,
    ) -> Result<Vec<Observation>, CollectorError> {
        let request = BatchRequest::new(vec![symbol.to_owned()], date_range)?.with_data_type(FILINGS);
        let outcome = self.collect_batch(request).await?;

        match outcome.status_of(symbol) {
            Some(SymbolStatus::InvalidSymbol) => return Err(CollectorError::invalid_symbol(symbol)),
            Some(status) => self.status_error(symbol, status)?,
            None => {}
        }

        Ok(outcome
            .table
            .into_rows()
            .into_iter()
            .filter(|row| form_type.map_or(true, |form| row.value.as_text() == Some(form)))
            .collect())
    }
}
