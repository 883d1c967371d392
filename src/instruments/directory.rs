use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use super::model::{is_tradable_equity, AssetClass, InstrumentRecord, InstrumentRow};
use super::source::{BlobCache, InstrumentSource, SourceError};

pub const INDICES_CACHE_KEY: &str = "instruments:indices";
pub const STOCKS_CACHE_KEY: &str = "instruments:stocks";

/// Cache entries written on a source fallback live for one day.
const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors that abort a directory load or refresh.
///
/// Only authoritative-source failures propagate; cache failures are logged
/// and swallowed since the source result is still in memory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("instrument source failure: {0}")]
    Source(#[from] SourceError),
}

#[derive(Default)]
struct DirectoryMaps {
    indices: HashMap<u64, InstrumentRecord>,
    stocks: HashMap<u64, InstrumentRecord>,
}

/// In-memory instrument directory resolving wire tokens to symbols.
///
/// Two disjoint token->record maps (indices and tradable equities) are
/// loaded cache-first on startup and replaced wholesale on refresh. Readers
/// only ever take a reference-counted snapshot, so lookups on the decode
/// path never contend with a refresh.
pub struct InstrumentDirectory {
    source: Arc<dyn InstrumentSource>,
    cache: Arc<dyn BlobCache>,
    maps: RwLock<Arc<DirectoryMaps>>,
}

impl InstrumentDirectory {
    pub fn new(source: Arc<dyn InstrumentSource>, cache: Arc<dyn BlobCache>) -> Self {
        Self {
            source,
            cache,
            maps: RwLock::new(Arc::new(DirectoryMaps::default())),
        }
    }

    /// Populates the directory, preferring the cache and falling back to the
    /// authoritative source on a miss. Fallback results are written back to
    /// the cache with a one-day TTL. Source failure is fatal; cache failure
    /// is not.
    pub async fn load(&self) -> Result<(), DirectoryError> {
        let indices = match self.read_cached(INDICES_CACHE_KEY).await {
            Some(records) => {
                info!(count = records.len(), "loaded indices from cache");
                records
            }
            None => {
                info!("indices not cached, loading from authoritative source");
                let records = self.fetch_indices().await?;
                self.write_cached(INDICES_CACHE_KEY, &records).await;
                records
            }
        };

        let stocks = match self.read_cached(STOCKS_CACHE_KEY).await {
            Some(records) => {
                info!(count = records.len(), "loaded equities from cache");
                records
            }
            None => {
                info!("equities not cached, loading from authoritative source");
                let records = self.fetch_equities().await?;
                self.write_cached(STOCKS_CACHE_KEY, &records).await;
                records
            }
        };

        self.install(indices, stocks);
        Ok(())
    }

    /// Unconditionally reloads from the authoritative source, replaces the
    /// in-memory maps atomically and re-populates the cache.
    pub async fn refresh(&self) -> Result<(), DirectoryError> {
        info!("refreshing instrument directory from authoritative source");

        let indices = self.fetch_indices().await?;
        let stocks = self.fetch_equities().await?;

        self.write_cached(INDICES_CACHE_KEY, &indices).await;
        self.write_cached(STOCKS_CACHE_KEY, &stocks).await;
        self.install(indices, stocks);

        info!(
            indices = self.index_count(),
            stocks = self.stock_count(),
            "instrument directory refreshed"
        );
        Ok(())
    }

    /// O(1) token lookup, index map first, then equities.
    pub fn resolve(&self, token: u64) -> Option<InstrumentRecord> {
        let maps = Arc::clone(&self.maps.read());
        maps.indices
            .get(&token)
            .or_else(|| maps.stocks.get(&token))
            .cloned()
    }

    pub fn is_index(&self, token: u64) -> bool {
        self.maps.read().indices.contains_key(&token)
    }

    pub fn is_stock(&self, token: u64) -> bool {
        self.maps.read().stocks.contains_key(&token)
    }

    /// Every token the feed client should subscribe to (indices ∪ stocks).
    pub fn tracked_tokens(&self) -> Vec<u64> {
        let maps = Arc::clone(&self.maps.read());
        maps.indices.keys().chain(maps.stocks.keys()).copied().collect()
    }

    pub fn index_count(&self) -> usize {
        self.maps.read().indices.len()
    }

    pub fn stock_count(&self) -> usize {
        self.maps.read().stocks.len()
    }

    async fn fetch_indices(&self) -> Result<Vec<InstrumentRecord>, DirectoryError> {
        let rows = self.source.fetch_indices().await?;
        Ok(rows
            .into_iter()
            .map(|row| record_from_row(row, AssetClass::Index))
            .collect())
    }

    async fn fetch_equities(&self) -> Result<Vec<InstrumentRecord>, DirectoryError> {
        let rows = self.source.fetch_equities().await?;
        Ok(rows
            .into_iter()
            .filter(is_tradable_equity)
            .map(|row| record_from_row(row, AssetClass::Stock))
            .collect())
    }

    async fn read_cached(&self, key: &str) -> Option<Vec<InstrumentRecord>> {
        let bytes = match self.cache.read(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "cache read failed, falling back to source");
                return None;
            }
        };
        match serde_json::from_slice::<Vec<InstrumentRecord>>(&bytes) {
            // An empty cached list is treated as a miss so a bad earlier run
            // cannot pin the directory to nothing.
            Ok(records) if records.is_empty() => None,
            Ok(records) => Some(records),
            Err(e) => {
                warn!(key, error = %e, "corrupt cache entry, falling back to source");
                None
            }
        }
    }

    async fn write_cached(&self, key: &str, records: &[InstrumentRecord]) {
        let bytes = match serde_json::to_vec(records) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "failed to serialize instruments for cache");
                return;
            }
        };
        if let Err(e) = self.cache.write(key, &bytes, CACHE_TTL).await {
            warn!(key, error = %e, "cache write failed, continuing with in-memory directory");
        }
    }

    fn install(&self, indices: Vec<InstrumentRecord>, stocks: Vec<InstrumentRecord>) {
        let maps = DirectoryMaps {
            indices: indices.into_iter().map(|r| (r.token, r)).collect(),
            stocks: stocks.into_iter().map(|r| (r.token, r)).collect(),
        };
        *self.maps.write() = Arc::new(maps);
    }
}

fn record_from_row(row: InstrumentRow, asset_class: AssetClass) -> InstrumentRecord {
    InstrumentRecord {
        token: row.token,
        exchange_token: row.exchange_token,
        symbol: row.symbol,
        asset_class,
    }
}
