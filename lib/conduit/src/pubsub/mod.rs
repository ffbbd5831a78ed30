//! Typed publisher and subscriber endpoints for the canonical data packet.

mod publisher;
mod subscriber;

pub use publisher::{Publisher, PublisherOptions};
pub use subscriber::{PacketCallback, Subscriber, SubscriberOptions};
