//! Anomaly screening for the data packet broadcast: per-channel
//! admissibility detectors and the three-thread sanitizer pipeline.

pub mod config;
pub mod digest;
pub mod duplicate;
pub mod expired;
pub mod future;
pub mod pipeline;
