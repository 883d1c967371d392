use parking_lot::Mutex;
use std::collections::VecDeque;

use super::TickSink;
use crate::feed::TickEvent;

/// Counters for buffer observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferStats {
    pub buffered: usize,
    pub accepted: u64,
    pub dropped: u64,
}

struct BufferInner {
    ticks: VecDeque<TickEvent>,
    accepted: u64,
    dropped: u64,
}

/// Bounded staging buffer for batch consumers.
///
/// When full, the oldest tick is evicted to make room for the newest: a
/// stalled drain loses the stalest data first and the buffer always holds
/// the most recent window of the feed.
pub struct TickBuffer {
    capacity: usize,
    inner: Mutex<BufferInner>,
}

impl TickBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(BufferInner {
                ticks: VecDeque::with_capacity(capacity.max(1)),
                accepted: 0,
                dropped: 0,
            }),
        }
    }

    /// Removes and returns all buffered ticks in arrival order.
    pub fn drain(&self) -> Vec<TickEvent> {
        let mut inner = self.inner.lock();
        inner.ticks.drain(..).collect()
    }

    pub fn stats(&self) -> BufferStats {
        let inner = self.inner.lock();
        BufferStats {
            buffered: inner.ticks.len(),
            accepted: inner.accepted,
            dropped: inner.dropped,
        }
    }
}

impl TickSink for TickBuffer {
    fn name(&self) -> &'static str {
        "tick_buffer"
    }

    fn on_tick(&self, tick: &TickEvent) {
        let mut inner = self.inner.lock();
        if inner.ticks.len() == self.capacity {
            inner.ticks.pop_front();
            inner.dropped += 1;
        }
        inner.ticks.push_back(tick.clone());
        inner.accepted += 1;
    }
}
