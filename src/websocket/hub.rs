use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::messages::TickMessage;
use crate::feed::TickEvent;
use crate::instruments::AssetClass;

/// Outbound queue depth per session. A consumer that falls this far behind
/// starts losing ticks rather than stalling the broadcast.
pub const SESSION_QUEUE_DEPTH: usize = 1024;

/// The four tick endpoints a client can attach to. `All` variants receive
/// the firehose for their asset class without subscribing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Indices,
    IndicesAll,
    Stocks,
    StocksAll,
}

impl Endpoint {
    /// Maps a request path to an endpoint, tolerating query strings and
    /// trailing slashes.
    pub fn from_path(path: &str) -> Option<Self> {
        let path = normalize_path(path);
        match path {
            "/ws/indices" => Some(Self::Indices),
            "/ws/indices/all" => Some(Self::IndicesAll),
            "/ws/stocks" => Some(Self::Stocks),
            "/ws/stocks/all" => Some(Self::StocksAll),
            _ => None,
        }
    }

    pub fn asset_class(self) -> AssetClass {
        match self {
            Self::Indices | Self::IndicesAll => AssetClass::Index,
            Self::Stocks | Self::StocksAll => AssetClass::Stock,
        }
    }

    pub fn is_firehose(self) -> bool {
        matches!(self, Self::IndicesAll | Self::StocksAll)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Indices => "/ws/indices",
            Self::IndicesAll => "/ws/indices/all",
            Self::Stocks => "/ws/stocks",
            Self::StocksAll => "/ws/stocks/all",
        }
    }
}

fn normalize_path(path: &str) -> &str {
    let path = path.split('?').next().unwrap_or(path);
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// One attached WebSocket client.
struct Session {
    endpoint: Endpoint,
    subscriptions: RwLock<HashSet<String>>,
    outbound: mpsc::Sender<String>,
}

/// Session registry and tick fan-out.
///
/// Each tick is serialized exactly once and the resulting JSON string is
/// cloned per interested session. Delivery is non-blocking: a full outbound
/// queue drops the tick for that session only, and a closed queue evicts
/// the session.
#[derive(Default)]
pub struct BroadcastHub {
    sessions: DashMap<String, Arc<Session>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session and returns the receiving half of its outbound
    /// queue. Re-registering an existing id replaces the old session.
    pub fn register(&self, session_id: &str, endpoint: Endpoint) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_DEPTH);
        let session = Arc::new(Session {
            endpoint,
            subscriptions: RwLock::new(HashSet::new()),
            outbound: tx,
        });
        if self.sessions.insert(session_id.to_string(), session).is_some() {
            warn!(session_id, "replaced existing session registration");
        }
        info!(session_id, endpoint = endpoint.as_str(), "session attached");
        rx
    }

    pub fn unregister(&self, session_id: &str) {
        if self.sessions.remove(session_id).is_some() {
            info!(session_id, "session detached");
        }
    }

    /// Adds symbols to a session's subscription set and returns the
    /// resulting set, sorted for stable confirmations.
    pub fn subscribe(&self, session_id: &str, symbols: &[String]) -> Option<Vec<String>> {
        let session = self.sessions.get(session_id)?;
        let mut subs = session.subscriptions.write();
        for symbol in symbols {
            subs.insert(symbol.clone());
        }
        Some(sorted(&subs))
    }

    /// Removes symbols from a session's subscription set and returns the
    /// resulting set. Removing an absent symbol is a no-op.
    pub fn unsubscribe(&self, session_id: &str, symbols: &[String]) -> Option<Vec<String>> {
        let session = self.sessions.get(session_id)?;
        let mut subs = session.subscriptions.write();
        for symbol in symbols {
            subs.remove(symbol);
        }
        Some(sorted(&subs))
    }

    /// Fans one tick out to every interested session.
    pub fn broadcast(&self, tick: &TickEvent) {
        let payload = match serde_json::to_string(&TickMessage::from(tick)) {
            Ok(json) => json,
            Err(err) => {
                warn!(error = %err, symbol = %tick.symbol, "failed to serialize tick");
                return;
            }
        };

        let mut closed: Vec<String> = Vec::new();
        for entry in self.sessions.iter() {
            let session = entry.value();
            if session.endpoint.asset_class() != tick.asset_class {
                continue;
            }
            if !session.endpoint.is_firehose()
                && !session.subscriptions.read().contains(&tick.symbol)
            {
                continue;
            }

            match session.outbound.try_send(payload.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        session_id = entry.key().as_str(),
                        symbol = %tick.symbol,
                        "slow consumer, dropping tick for session"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    closed.push(entry.key().clone());
                }
            }
        }

        for session_id in closed {
            debug!(session_id, "evicting session with closed outbound queue");
            self.sessions.remove(&session_id);
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn endpoint_of(&self, session_id: &str) -> Option<Endpoint> {
        self.sessions.get(session_id).map(|s| s.endpoint)
    }

    pub fn subscriptions_of(&self, session_id: &str) -> Option<Vec<String>> {
        self.sessions
            .get(session_id)
            .map(|s| sorted(&s.subscriptions.read()))
    }
}

fn sorted(set: &HashSet<String>) -> Vec<String> {
    let mut symbols: Vec<String> = set.iter().cloned().collect();
    symbols.sort();
    symbols
}
