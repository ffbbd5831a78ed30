//! Per-channel duplicate and timing-slip screening.
//!
//! Each channel keeps a bounded, startTime-ordered window of header
//! digests. An arriving header is classified as an exact duplicate (rate
//! dependent startTime tolerance), a forward arrival, a far back-fill, a
//! timing slip (span overlap), or a legitimate out-of-order back-fill.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;

use hashbrown::HashMap;
use parking_lot::Mutex;
use strata::packet::Packet;
use strata::{logging, time};

use crate::digest::PacketHeader;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// Two retained headers for one channel disagree on the rounded rate.
    InconsistentRate { name: String, lhs: i32, rhs: i32 },
    /// The rate falls outside the tolerance table.
    UnclassifiedRate { name: String, rate: i32 },
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyError::InconsistentRate { name, lhs, rhs } => write!(
                f,
                "Inconsistent sampling rates for {}: {} vs {}",
                name, lhs, rhs
            ),
            PolicyError::UnclassifiedRate { name, rate } => {
                write!(f, "Could not classify sampling rate {} for {}", rate, name)
            }
        }
    }
}

/// One row of the rate-dependent duplicate tolerance: rates strictly below
/// `max_rate` use `tolerance_micros` for the startTime comparison.
#[derive(Debug, Copy, Clone)]
pub struct ToleranceRow {
    pub max_rate: i32,
    pub tolerance_micros: i64,
}

#[derive(Debug, Clone)]
pub struct ToleranceTable {
    rows: Vec<ToleranceRow>,
}

impl Default for ToleranceTable {
    fn default() -> ToleranceTable {
        ToleranceTable {
            rows: vec![
                ToleranceRow { max_rate: 105, tolerance_micros: 15_000 },
                ToleranceRow { max_rate: 255, tolerance_micros: 4_500 },
                ToleranceRow { max_rate: 505, tolerance_micros: 2_500 },
                ToleranceRow { max_rate: 1005, tolerance_micros: 1_500 },
            ],
        }
    }
}

impl ToleranceTable {
    pub fn new(rows: Vec<ToleranceRow>) -> ToleranceTable {
        ToleranceTable { rows }
    }

    fn tolerance_micros(&self, rate: i32) -> Option<i64> {
        self.rows
            .iter()
            .find(|row| rate < row.max_rate)
            .map(|row| row.tolerance_micros)
    }
}

struct Window {
    entries: VecDeque<PacketHeader>,
    capacity: usize,
}

impl Window {
    fn new(capacity: usize) -> Window {
        Window {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Appends at the back, evicting the oldest entry when full.
    fn push_back(&mut self, header: PacketHeader) {
        if self.is_full() {
            self.entries.pop_front();
        }
        self.entries.push_back(header);
    }
}

enum Capacity {
    Fixed(usize),
    /// Estimated per channel from the first header and a retention window.
    FromDuration(i64),
}

struct DuplicateState {
    windows: HashMap<String, Window>,
    duplicate_channels: BTreeSet<String>,
    bad_timing_channels: BTreeSet<String>,
    last_log_time_secs: i64,
}

pub struct DuplicateDetector {
    capacity: Capacity,
    tolerances: ToleranceTable,
    log_interval_secs: i64,
    state: Mutex<DuplicateState>,
    log: logging::Logger,
}

impl DuplicateDetector {
    /// Every channel window holds exactly `capacity` headers.
    pub fn with_fixed_capacity(
        capacity: usize,
        tolerances: ToleranceTable,
        log_interval_secs: i64,
        log: &logging::Logger,
    ) -> Result<DuplicateDetector, String> {
        if capacity < 1 {
            return Err("Circular buffer size must be positive".to_string());
        }
        Ok(Self::build(
            Capacity::Fixed(capacity),
            tolerances,
            log_interval_secs,
            log,
        ))
    }

    /// Window capacities are estimated per channel so roughly
    /// `retention_secs` of packets are retained.
    pub fn with_retention_duration(
        retention_secs: i64,
        tolerances: ToleranceTable,
        log_interval_secs: i64,
        log: &logging::Logger,
    ) -> Result<DuplicateDetector, String> {
        if retention_secs < 1 {
            return Err("Circular buffer duration must be positive".to_string());
        }
        Ok(Self::build(
            Capacity::FromDuration(retention_secs),
            tolerances,
            log_interval_secs,
            log,
        ))
    }

    fn build(
        capacity: Capacity,
        tolerances: ToleranceTable,
        log_interval_secs: i64,
        log: &logging::Logger,
    ) -> DuplicateDetector {
        DuplicateDetector {
            capacity,
            tolerances,
            log_interval_secs,
            state: Mutex::new(DuplicateState {
                windows: HashMap::new(),
                duplicate_channels: BTreeSet::new(),
                bad_timing_channels: BTreeSet::new(),
                last_log_time_secs: 0,
            }),
            log: log.new(logging::o!("detector" => "duplicate")),
        }
    }

    pub fn allow(&self, packet: &Packet) -> bool {
        let header = match PacketHeader::from_packet(packet) {
            Ok(header) => header,
            Err(reason) => {
                logging::warn!(self.log, "failed to unpack packet header; not allowing";
                               "reason" => reason);
                return false;
            }
        };

        let allow = {
            let mut state = self.state.lock();
            match self.check(header, &mut state) {
                Ok(allow) => allow,
                Err(error) => {
                    logging::warn!(self.log, "failed to check packet; not allowing";
                                   "error" => error.to_string());
                    false
                }
            }
        };
        self.log_bad_data();
        allow
    }

    fn check(&self, header: PacketHeader, state: &mut DuplicateState) -> Result<bool, PolicyError> {
        if !state.windows.contains_key(&header.name) {
            let capacity = match self.capacity {
                Capacity::Fixed(capacity) => capacity,
                Capacity::FromDuration(retention_secs) => {
                    Self::estimate_capacity(&header, retention_secs)
                }
            };
            logging::info!(self.log, "creating new circular buffer";
                           "channel" => header.name.as_str(), "capacity" => capacity);
            let mut window = Window::new(capacity);
            let name = header.name.clone();
            window.push_back(header);
            state.windows.insert(name, window);
            // The first header cannot be a duplicate.
            return Ok(true);
        }

        // Split borrows: the window is mutated while rejections are
        // recorded in the side sets.
        let DuplicateState {
            windows,
            duplicate_channels,
            bad_timing_channels,
            ..
        } = state;
        let window = windows.get_mut(&header.name).expect("Window must exist");

        // Exact duplicate anywhere in the window.
        for entry in window.entries.iter() {
            if Self::matches(&header, entry, &self.tolerances)? {
                logging::debug!(self.log, "detected duplicate"; "channel" => header.name.as_str());
                duplicate_channels.insert(header.name.clone());
                return Ok(false);
            }
        }

        // Typically new data shows up: append at the back.
        let back = window.entries.back().expect("Window cannot be empty");
        if header.start_time_micros > back.end_time_micros {
            window.push_back(header);
            return Ok(true);
        }

        // Really old data goes to the front while there is space. A full
        // window treats it as expired for this channel.
        let front = window.entries.front().expect("Window cannot be empty");
        if header.end_time_micros < front.start_time_micros {
            if !window.is_full() {
                window.entries.push_front(header);
                debug_assert!(Self::is_sorted(&window.entries));
                return Ok(true);
            }
            return Ok(false);
        }

        // The packet is old; look for a GPS slip.
        if window.entries.iter().any(|entry| header.overlaps(entry)) {
            logging::info!(self.log, "detected possible timing slip";
                           "channel" => header.name.as_str());
            bad_timing_channels.insert(header.name.clone());
            return Ok(false);
        }

        // A valid out-of-order back-fill: insert and restore time order.
        window.push_back(header);
        window
            .entries
            .make_contiguous()
            .sort_by_key(|entry| entry.start_time_micros);
        Ok(true)
    }

    /// Header equality under the rate-dependent tolerance. Mismatched
    /// rounded rates on one channel and rates past the table are policy
    /// errors, not inequality.
    fn matches(
        header: &PacketHeader,
        entry: &PacketHeader,
        tolerances: &ToleranceTable,
    ) -> Result<bool, PolicyError> {
        if header.name != entry.name {
            return Ok(false);
        }
        if header.sampling_rate != entry.sampling_rate {
            return Err(PolicyError::InconsistentRate {
                name: header.name.clone(),
                lhs: header.sampling_rate,
                rhs: entry.sampling_rate,
            });
        }
        if header.n_samples != entry.n_samples {
            return Ok(false);
        }
        let tolerance_micros = tolerances
            .tolerance_micros(header.sampling_rate)
            .ok_or_else(|| PolicyError::UnclassifiedRate {
                name: header.name.clone(),
                rate: header.sampling_rate,
            })?;
        let delta = (header.start_time_micros - entry.start_time_micros).abs();
        Ok(delta < tolerance_micros)
    }

    fn estimate_capacity(header: &PacketHeader, retention_secs: i64) -> usize {
        let duration = header.duration_secs();
        let estimate = (1.5 * retention_secs as f64 / duration as f64).ceil() as usize;
        estimate.max(10) + 1
    }

    fn is_sorted(entries: &VecDeque<PacketHeader>) -> bool {
        entries
            .iter()
            .zip(entries.iter().skip(1))
            .all(|(a, b)| a.start_time_micros <= b.start_time_micros)
    }

    fn log_bad_data(&self) {
        if self.log_interval_secs < 0 {
            return;
        }
        let now_secs = time::timestamp_secs();
        let mut state = self.state.lock();
        if now_secs < state.last_log_time_secs + self.log_interval_secs {
            return;
        }
        if !state.duplicate_channels.is_empty() {
            let channels = state
                .duplicate_channels
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(" ");
            logging::info!(self.log, "duplicate packets detected"; "channels" => channels);
            state.duplicate_channels.clear();
            state.last_log_time_secs = now_secs;
        }
        if !state.bad_timing_channels.is_empty() {
            let channels = state
                .bad_timing_channels
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(" ");
            logging::info!(self.log, "bad timing detected"; "channels" => channels);
            state.bad_timing_channels.clear();
            state.last_log_time_secs = now_secs;
        }
    }

    /// Observation hook for tests: `(len, capacity, sorted)` per channel.
    #[cfg(test)]
    fn window_snapshot(&self, name: &str) -> Option<(usize, usize, bool)> {
        let state = self.state.lock();
        state
            .windows
            .get(name)
            .map(|window| (window.entries.len(), window.capacity, Self::is_sorted(&window.entries)))
    }
}
