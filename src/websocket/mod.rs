pub mod handler;
pub mod hub;
pub mod messages;

pub use handler::{routes, websocket_handler};
pub use hub::{BroadcastHub, Endpoint};
pub use messages::{
    ErrorReply, SubscriptionAction, SubscriptionReply, SubscriptionRequest, TickMessage,
};
