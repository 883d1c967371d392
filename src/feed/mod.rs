pub mod backoff;
pub mod client;
pub mod decoder;
pub mod tick;

pub use backoff::BackoffPolicy;
pub use client::{ConnectionState, FeedClient, FeedConfig, FeedError, FeedStatus};
pub use decoder::{DiagnosticSampler, TickDecoder, TickParseError};
pub use tick::{Ohlc, TickEvent};
