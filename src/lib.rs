pub mod api;
pub mod config;
pub mod feed;
pub mod instruments;
pub mod sinks;
pub mod websocket;

pub use api::{create_router, AppState};
pub use config::{Config, ConfigError};
pub use feed::{BackoffPolicy, FeedClient, FeedConfig, TickDecoder, TickEvent};
pub use instruments::InstrumentDirectory;
pub use sinks::TickSink;
pub use websocket::BroadcastHub;
