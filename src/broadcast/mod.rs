//! Live event fan-out to WebSocket subscribers.

pub mod hub;

pub use hub::{BroadcastHub, Event, Subscription};
