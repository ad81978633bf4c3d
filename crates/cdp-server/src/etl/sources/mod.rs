//! Source adapters.
//!
//! One adapter per upstream. Each owns its rate limiter, its checkpoint
//! semantics, and the mapping from its payload shape into the unified
//! schema; the orchestrator only ever talks to the [`SourceAdapter`] trait.

pub mod coingecko;
pub mod coinpaprika;
pub mod csv;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use cdp_common::types::SourceTag;

use crate::etl::error::EtlResult;
use crate::etl::models::{NormalizedRecord, RawRecord};
use crate::etl::store::LoadOutcome;

pub use coingecko::CoinGeckoAdapter;
pub use coinpaprika::CoinPaprikaAdapter;
pub use csv::CsvAdapter;

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> SourceTag;

    /// Pull new data since the stored checkpoint, persist the raw payloads,
    /// and advance the checkpoint. An empty result means nothing new.
    async fn extract(&self) -> EtlResult<Vec<RawRecord>>;

    /// Map raw payloads into the unified schema. Pure: no IO, no state.
    /// Records that cannot be mapped are logged and dropped here.
    fn transform(&self, raw: &[RawRecord]) -> Vec<NormalizedRecord>;

    /// Write normalized records to storage.
    async fn load(&self, records: &[NormalizedRecord]) -> EtlResult<LoadOutcome>;
}

/// Adapter registry keyed by source tag. Iteration order is the canonical
/// run order for `run all`.
#[derive(Default)]
pub struct SourceRegistry {
    adapters: BTreeMap<SourceTag, Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.source(), adapter);
    }

    pub fn get(&self, source: SourceTag) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(&source).cloned()
    }

    pub fn tags(&self) -> Vec<SourceTag> {
        self.adapters.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
