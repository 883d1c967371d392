use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::model::InstrumentRow;

/// Errors from the authoritative instrument source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("instrument source unavailable: {0}")]
    Unavailable(String),

    #[error("malformed instrument data: {0}")]
    Malformed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the blob cache. Always non-fatal to directory loading.
#[derive(Debug, Error)]
#[error("cache error: {0}")]
pub struct CacheError(pub String);

/// Authoritative instrument metadata source.
///
/// Rows are returned unfiltered; the directory applies the equity selection
/// rule. A failure here during initial load is fatal to startup since the
/// feed cannot subscribe to an unknown instrument set.
#[async_trait]
pub trait InstrumentSource: Send + Sync {
    async fn fetch_indices(&self) -> Result<Vec<InstrumentRow>, SourceError>;
    async fn fetch_equities(&self) -> Result<Vec<InstrumentRow>, SourceError>;
}

/// Key-value blob cache in front of the instrument source.
///
/// The concrete cache technology lives outside the core; the directory only
/// needs opaque read/write-with-TTL semantics.
#[async_trait]
pub trait BlobCache: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    async fn write(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;
}

/// In-process blob cache with per-entry expiry.
#[derive(Default)]
pub struct MemoryBlobCache {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
}

impl MemoryBlobCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobCache for MemoryBlobCache {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn write(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_vec(), Instant::now() + ttl));
        Ok(())
    }
}

/// Fixed in-memory source, used in tests and local demos.
pub struct StaticInstrumentSource {
    indices: Vec<InstrumentRow>,
    equities: Vec<InstrumentRow>,
}

impl StaticInstrumentSource {
    pub fn new(indices: Vec<InstrumentRow>, equities: Vec<InstrumentRow>) -> Self {
        Self { indices, equities }
    }
}

#[async_trait]
impl InstrumentSource for StaticInstrumentSource {
    async fn fetch_indices(&self) -> Result<Vec<InstrumentRow>, SourceError> {
        Ok(self.indices.clone())
    }

    async fn fetch_equities(&self) -> Result<Vec<InstrumentRow>, SourceError> {
        Ok(self.equities.clone())
    }
}

#[derive(Debug, Deserialize)]
struct InstrumentFile {
    #[serde(default)]
    indices: Vec<InstrumentRow>,
    #[serde(default)]
    equities: Vec<InstrumentRow>,
}

/// Instrument source backed by a JSON file, used for bootstrap wiring.
///
/// File shape: `{"indices": [rows...], "equities": [rows...]}` where each row
/// carries `token`, `exchange_token`, `symbol` and the optional filter fields
/// (`expiry`, `lot_size`, `name`).
pub struct FileInstrumentSource {
    path: PathBuf,
}

impl FileInstrumentSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_file(&self) -> Result<InstrumentFile, SourceError> {
        let bytes = tokio::fs::read(&self.path).await?;
        serde_json::from_slice(&bytes).map_err(|e| SourceError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl InstrumentSource for FileInstrumentSource {
    async fn fetch_indices(&self) -> Result<Vec<InstrumentRow>, SourceError> {
        Ok(self.read_file().await?.indices)
    }

    async fn fetch_equities(&self) -> Result<Vec<InstrumentRow>, SourceError> {
        Ok(self.read_file().await?.equities)
    }
}
