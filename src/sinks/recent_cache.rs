use dashmap::DashMap;

use super::TickSink;
use crate::feed::TickEvent;

/// Keeps the latest tick per symbol so new clients and HTTP callers can see
/// a price without waiting for the next update.
#[derive(Default)]
pub struct RecentTickCache {
    latest: DashMap<String, TickEvent>,
}

impl RecentTickCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self, symbol: &str) -> Option<TickEvent> {
        self.latest.get(symbol).map(|entry| entry.value().clone())
    }

    pub fn symbols(&self) -> Vec<String> {
        self.latest.iter().map(|e| e.key().clone()).collect()
    }

    /// Point-in-time copy of every cached tick.
    pub fn snapshot(&self) -> Vec<TickEvent> {
        self.latest.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}

impl TickSink for RecentTickCache {
    fn name(&self) -> &'static str {
        "recent_tick_cache"
    }

    fn on_tick(&self, tick: &TickEvent) {
        self.latest.insert(tick.symbol.clone(), tick.clone());
    }
}
