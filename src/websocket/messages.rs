use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::feed::{Ohlc, TickEvent};
use crate::instruments::AssetClass;

/// Maximum symbols accepted in one subscription request.
pub const MAX_SYMBOLS_PER_REQUEST: usize = 100;

/// Client subscription action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriptionAction {
    Subscribe,
    Unsubscribe,
}

/// Inbound control message on a tick session.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionRequest {
    pub action: SubscriptionAction,
    #[serde(rename = "type")]
    pub asset_class: AssetClass,
    pub symbols: Vec<String>,
}

impl SubscriptionRequest {
    /// Rejects empty lists, oversized lists, and blank symbols. A rejected
    /// request changes no subscription state.
    pub fn validate(&self) -> Result<(), String> {
        if self.symbols.is_empty() {
            return Err("symbols must not be empty".to_string());
        }
        if self.symbols.len() > MAX_SYMBOLS_PER_REQUEST {
            return Err(format!(
                "too many symbols: {} (maximum {MAX_SYMBOLS_PER_REQUEST})",
                self.symbols.len()
            ));
        }
        if self.symbols.iter().any(|s| s.trim().is_empty()) {
            return Err("symbols must not be blank".to_string());
        }
        Ok(())
    }
}

/// Confirmation sent after a subscription change, echoing the resulting
/// symbol set for the session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionReply {
    pub action: SubscriptionAction,
    #[serde(rename = "type")]
    pub asset_class: AssetClass,
    pub symbols: Vec<String>,
}

/// Error reply for malformed or invalid control messages.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReply {
    pub error: bool,
    pub message: String,
}

impl ErrorReply {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: message.into(),
        }
    }
}

/// Outbound tick payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickMessage {
    pub symbol: String,
    pub instrument_token: u64,
    #[serde(rename = "type")]
    pub asset_class: AssetClass,
    pub timestamp: DateTime<Utc>,
    pub last_traded_price: Decimal,
    pub volume: u64,
    pub ohlc: OhlcMessage,
}

#[derive(Debug, Clone, Serialize)]
pub struct OhlcMessage {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

impl From<Ohlc> for OhlcMessage {
    fn from(ohlc: Ohlc) -> Self {
        Self {
            open: ohlc.open,
            high: ohlc.high,
            low: ohlc.low,
            close: ohlc.close,
        }
    }
}

impl From<&TickEvent> for TickMessage {
    fn from(tick: &TickEvent) -> Self {
        Self {
            symbol: tick.symbol.clone(),
            instrument_token: tick.token,
            asset_class: tick.asset_class,
            timestamp: tick.timestamp,
            last_traded_price: tick.last_traded_price,
            volume: tick.volume,
            ohlc: tick.ohlc.into(),
        }
    }
}
