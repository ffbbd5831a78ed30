//! Shared infrastructure for the data-packet distribution fabric: the
//! canonical packet format and its codec, logging, timestamps, handshake
//! credentials, and the signal-driven cancellation token.

mod codec;
pub mod credential;
pub mod interrupt;
pub mod logging;
pub mod packet;
pub mod time;
