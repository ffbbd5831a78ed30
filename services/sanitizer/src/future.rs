//! Rejects packets whose data ends in the future.

use std::collections::BTreeSet;

use parking_lot::Mutex;
use strata::packet::Packet;
use strata::{logging, time};

struct FutureState {
    future_channels: BTreeSet<String>,
    last_log_time_secs: i64,
}

/// Admits a packet iff `endTime <= now + maxFuture`. A zero allowance still
/// lets a zero-latency single-sample packet through because "now" is read
/// after the packet is inspected.
pub struct FutureDetector {
    max_future_micros: i64,
    log_interval_secs: i64,
    state: Mutex<FutureState>,
    log: logging::Logger,
}

impl FutureDetector {
    pub fn new(
        max_future_micros: i64,
        log_interval_secs: i64,
        log: &logging::Logger,
    ) -> FutureDetector {
        let log = log.new(logging::o!("detector" => "future"));
        // Negative allowances account for telemetry clock lag, but that is
        // a dangerous game; make sure the operator knows.
        if max_future_micros < 0 {
            logging::warn!(log, "max future time is negative");
        }
        FutureDetector {
            max_future_micros,
            log_interval_secs,
            state: Mutex::new(FutureState {
                future_channels: BTreeSet::new(),
                last_log_time_secs: 0,
            }),
            log,
        }
    }

    pub fn allow(&self, packet: &Packet) -> bool {
        let end_time = match packet.end_time_micros() {
            Some(end_time) => end_time,
            None => {
                logging::warn!(self.log, "packet has no end time; not allowing");
                return false;
            }
        };
        let now_micros = time::timestamp_micros();
        let latest_time = now_micros + self.max_future_micros;
        let allow = end_time <= latest_time;

        if self.log_interval_secs >= 0 {
            self.log_bad_data(allow, packet, now_micros);
        }
        allow
    }

    fn log_bad_data(&self, allow: bool, packet: &Packet, now_micros: i64) {
        let now_secs = now_micros / 1_000_000;
        let mut state = self.state.lock();
        if !allow {
            state.future_channels.insert(packet.name());
        }
        if now_secs >= state.last_log_time_secs + self.log_interval_secs
            && !state.future_channels.is_empty()
        {
            let channels = state
                .future_channels
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(" ");
            logging::info!(self.log, "future data detected"; "channels" => channels);
            state.future_channels.clear();
            state.last_log_time_secs = now_secs;
        }
    }
}
