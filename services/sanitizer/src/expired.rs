//! Rejects packets that are too old to still be useful downstream.

use std::collections::BTreeSet;

use parking_lot::Mutex;
use strata::packet::Packet;
use strata::{logging, time};

struct ExpiredState {
    expired_channels: BTreeSet<String>,
    last_log_time_secs: i64,
}

/// Admits a packet iff `startTime >= now - maxLatency`.
pub struct ExpiredDetector {
    max_latency_micros: i64,
    log_interval_secs: i64,
    state: Mutex<ExpiredState>,
    log: logging::Logger,
}

impl ExpiredDetector {
    /// The latency bound must be positive.
    pub fn new(
        max_latency_micros: i64,
        log_interval_secs: i64,
        log: &logging::Logger,
    ) -> Result<ExpiredDetector, String> {
        if max_latency_micros <= 0 {
            return Err("Max expired time must be positive".to_string());
        }
        Ok(ExpiredDetector {
            max_latency_micros,
            log_interval_secs,
            state: Mutex::new(ExpiredState {
                expired_channels: BTreeSet::new(),
                last_log_time_secs: 0,
            }),
            log: log.new(logging::o!("detector" => "expired")),
        })
    }

    pub fn allow(&self, packet: &Packet) -> bool {
        let now_micros = time::timestamp_micros();
        let earliest_time = now_micros - self.max_latency_micros;
        let allow = packet.start_time_micros() >= earliest_time;

        if self.log_interval_secs >= 0 {
            self.log_bad_data(allow, packet, now_micros);
        }
        allow
    }

    fn log_bad_data(&self, allow: bool, packet: &Packet, now_micros: i64) {
        let now_secs = now_micros / 1_000_000;
        let mut state = self.state.lock();
        if !allow {
            state.expired_channels.insert(packet.name());
        }
        if now_secs >= state.last_log_time_secs + self.log_interval_secs
            && !state.expired_channels.is_empty()
        {
            let channels = state
                .expired_channels
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(" ");
            logging::info!(self.log, "expired data detected"; "channels" => channels);
            state.expired_channels.clear();
            state.last_log_time_secs = now_secs;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet_starting_at(start_time_micros: i64) -> Packet {
        let mut packet = Packet::new();
        packet.set_network("UU").unwrap();
        packet.set_station("FORK").unwrap();
        packet.set_channel("HHZ").unwrap();
        packet.set_sampling_rate(100.0).unwrap();
        packet.set_start_time_micros(start_time_micros);
        packet.set_data_i32(vec![0; 100]);
        packet
    }

    #[test]
    fn test_latency_must_be_positive() {
        assert!(ExpiredDetector::new(0, -1, &logging::discard()).is_err());
        assert!(ExpiredDetector::new(-5, -1, &logging::discard()).is_err());
    }

    #[test]
    fn test_fresh_packet_admitted() {
        let detector = ExpiredDetector::new(120_000_000, -1, &logging::discard()).unwrap();
        let fresh = packet_starting_at(time::timestamp_micros() - 1_000_000);
        assert!(detector.allow(&fresh));
    }

    #[test]
    fn test_stale_packet_rejected() {
        let detector = ExpiredDetector::new(120_000_000, -1, &logging::discard()).unwrap();
        let stale = packet_starting_at(time::timestamp_micros() - 600_000_000);
        assert!(!detector.allow(&stale));
    }
}
