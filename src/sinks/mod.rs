pub mod buffer;
pub mod recent_cache;

pub use buffer::{BufferStats, TickBuffer};
pub use recent_cache::RecentTickCache;

use crate::feed::TickEvent;

/// A downstream consumer of decoded ticks.
///
/// Sinks are fire-and-forget: `on_tick` must be cheap and non-blocking, and
/// a sink failure never propagates back into the ingestion path.
pub trait TickSink: Send + Sync {
    fn name(&self) -> &'static str;

    fn on_tick(&self, tick: &TickEvent);
}
