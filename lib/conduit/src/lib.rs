//! The messaging fabric: endpoint addressing, the framed wire protocol, the
//! in-process rendezvous registry, the authentication handshake, typed
//! publisher/subscriber endpoints, the steerable broadcast proxy, and the
//! bounded hand-off queue.

pub mod auth;
pub mod endpoint;
pub mod handshake;
pub mod inproc;
pub mod proxy;
pub mod pubsub;
pub mod queue;
pub mod shared;
pub mod wire;

pub use shared::Error;
