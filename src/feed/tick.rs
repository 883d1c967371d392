use bytes::Bytes;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::instruments::AssetClass;

/// Open/high/low/close prices for the current trading day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ohlc {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

impl Ohlc {
    pub const fn zero() -> Self {
        Self {
            open: Decimal::ZERO,
            high: Decimal::ZERO,
            low: Decimal::ZERO,
            close: Decimal::ZERO,
        }
    }
}

impl Default for Ohlc {
    fn default() -> Self {
        Self::zero()
    }
}

/// One decoded price update for a single instrument.
///
/// Immutable after construction; it flows from the decoder through the
/// broadcast hub and sinks by value and is never mutated in place. The
/// original frame bytes are retained for audit/replay; `Bytes` makes that
/// retention a cheap reference-counted clone across the fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct TickEvent {
    pub symbol: String,
    pub token: u64,
    pub asset_class: AssetClass,
    pub timestamp: DateTime<Utc>,
    pub last_traded_price: Decimal,
    pub volume: u64,
    pub ohlc: Ohlc,
    pub raw_frame: Bytes,
}
