//! Source adapters and the collector registry.

pub mod fred;
pub mod sec_edgar;
pub mod treasury;

use std::sync::Arc;

use crate::collector::Collector;
use crate::config::CollectorConfig;
use crate::data_source::SourceKind;
use crate::engine::GovCollector;
use crate::error::CollectorError;

pub use fred::Fred;
pub use sec_edgar::SecEdgar;
pub use treasury::Treasury;

pub type SecEdgarCollector = GovCollector<SecEdgar>;
pub type FredCollector = GovCollector<Fred>;
pub type TreasuryCollector = GovCollector<Treasury>;

/// Builds the collector for `kind` behind the uniform [`Collector`] contract.
///
/// Source-specific operations need the concrete alias instead, e.g.
/// [`FredCollector::search_series`].
pub fn create(kind: SourceKind, config: CollectorConfig) -> Result<Arc<dyn Collector>, CollectorError> {
    let collector: Arc<dyn Collector> = match kind {
        SourceKind::SecEdgar => Arc::new(GovCollector::new(config, SecEdgar::new())?),
        SourceKind::Fred => Arc::new(GovCollector::new(config, Fred::new())?),
        SourceKind::Treasury => Arc::new(GovCollector::new(config, Treasury::new())?),
    };
    Ok(collector)
}
