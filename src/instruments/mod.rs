pub mod directory;
pub mod model;
pub mod source;

pub use directory::{DirectoryError, InstrumentDirectory};
pub use model::{is_tradable_equity, AssetClass, InstrumentRecord, InstrumentRow};
pub use source::{
    BlobCache, CacheError, FileInstrumentSource, InstrumentSource, MemoryBlobCache, SourceError,
    StaticInstrumentSource,
};
