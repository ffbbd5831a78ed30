use std::fmt;

/// Wire identifier for the canonical data packet message. Frame 0 of every
/// two-frame broadcast message carries this literal.
pub const MESSAGE_TYPE: &str = "US8::MessageFormats::Broadcasts::DataPacket";
pub const MESSAGE_VERSION: &str = "1.0.0";

pub type PacketResult<T> = Result<T, PacketError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// A setter was handed an empty, malformed, or out-of-range value.
    InvalidField(&'static str),
    /// A required field was read before it was set.
    FieldNotSet(&'static str),
    /// A serialized message could not be decoded.
    Malformed(String),
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketError::InvalidField(name) => write!(f, "Invalid {}", name),
            PacketError::FieldNotSet(name) => write!(f, "{} not set", name),
            PacketError::Malformed(reason) => write!(f, "Malformed message: {}", reason),
        }
    }
}

impl std::error::Error for PacketError {}

/// Tag describing the native type of the sample vector.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DataType {
    Integer32,
    Integer64,
    Float,
    Double,
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Samples {
    None,
    Integer32(Vec<i32>),
    Integer64(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl Samples {
    #[inline]
    fn len(&self) -> usize {
        match self {
            Samples::None => 0,
            Samples::Integer32(v) => v.len(),
            Samples::Integer64(v) => v.len(),
            Samples::Float(v) => v.len(),
            Samples::Double(v) => v.len(),
        }
    }
}

/// The canonical per-channel sample burst. Identity is the
/// `(network, station, channel, location)` 4-tuple; the location code
/// defaults to `--` when a source does not report one.
///
/// Exactly one sample vector is populated at a time and the data type tag
/// tracks it; clearing the samples resets the tag, and every mutation of the
/// rate, start time, or samples recomputes the derived end time.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    network: String,
    station: String,
    channel: String,
    location_code: String,
    sampling_rate: f64,
    start_time_micros: i64,
    end_time_micros: i64,
    samples: Samples,
}

impl Default for Packet {
    #[inline]
    fn default() -> Packet {
        Packet::new()
    }
}

impl Packet {
    #[inline]
    pub fn new() -> Packet {
        Packet {
            network: String::new(),
            station: String::new(),
            channel: String::new(),
            location_code: "--".to_string(),
            sampling_rate: 0.0,
            start_time_micros: 0,
            end_time_micros: 0,
            samples: Samples::None,
        }
    }

    /// Strips spaces and upper-cases an identity token.
    fn scrub(token: &str) -> String {
        token
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| c.to_ascii_uppercase())
            .collect()
    }

    pub fn set_network(&mut self, network: &str) -> PacketResult<()> {
        let network = Self::scrub(network);
        if network.len() != 2 {
            return Err(PacketError::InvalidField("network"));
        }
        self.network = network;
        Ok(())
    }

    #[inline]
    pub fn network(&self) -> &str {
        &self.network
    }

    #[inline]
    pub fn have_network(&self) -> bool {
        !self.network.is_empty()
    }

    pub fn set_station(&mut self, station: &str) -> PacketResult<()> {
        let station = Self::scrub(station);
        if station.is_empty() {
            return Err(PacketError::InvalidField("station"));
        }
        self.station = station;
        Ok(())
    }

    #[inline]
    pub fn station(&self) -> &str {
        &self.station
    }

    #[inline]
    pub fn have_station(&self) -> bool {
        !self.station.is_empty()
    }

    pub fn set_channel(&mut self, channel: &str) -> PacketResult<()> {
        let channel = Self::scrub(channel);
        if channel.is_empty() {
            return Err(PacketError::InvalidField("channel"));
        }
        self.channel = channel;
        Ok(())
    }

    #[inline]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    #[inline]
    pub fn have_channel(&self) -> bool {
        !self.channel.is_empty()
    }

    /// An empty or all-whitespace location collapses to the `--` sentinel.
    pub fn set_location_code(&mut self, location: &str) -> PacketResult<()> {
        let location = Self::scrub(location);
        if location.is_empty() {
            self.location_code = "--".to_string();
        } else {
            self.location_code = location;
        }
        Ok(())
    }

    #[inline]
    pub fn location_code(&self) -> &str {
        &self.location_code
    }

    /// Channel name in the `NET.STA.CHAN[.LOC]` notation used by the
    /// detectors and the anomaly logs.
    pub fn name(&self) -> String {
        let mut name = format!("{}.{}.{}", self.network, self.station, self.channel);
        if !self.location_code.is_empty() {
            name.push('.');
            name.push_str(&self.location_code);
        }
        name
    }

    pub fn set_sampling_rate(&mut self, sampling_rate: f64) -> PacketResult<()> {
        if !(sampling_rate > 0.0) {
            return Err(PacketError::InvalidField("sampling rate"));
        }
        self.sampling_rate = sampling_rate;
        self.update_end_time();
        Ok(())
    }

    #[inline]
    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    #[inline]
    pub fn have_sampling_rate(&self) -> bool {
        self.sampling_rate > 0.0
    }

    /// UTC time of the first sample in microseconds since the epoch.
    #[inline]
    pub fn set_start_time_micros(&mut self, start_time: i64) {
        self.start_time_micros = start_time;
        self.update_end_time();
    }

    #[inline]
    pub fn start_time_micros(&self) -> i64 {
        self.start_time_micros
    }

    /// UTC time of the last sample. Only defined when the sampling rate is
    /// set and the packet holds at least one sample.
    #[inline]
    pub fn end_time_micros(&self) -> Option<i64> {
        if self.have_sampling_rate() && self.number_of_samples() > 0 {
            Some(self.end_time_micros)
        } else {
            None
        }
    }

    #[inline]
    pub fn number_of_samples(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn data_type(&self) -> DataType {
        match self.samples {
            Samples::None => DataType::Unknown,
            Samples::Integer32(_) => DataType::Integer32,
            Samples::Integer64(_) => DataType::Integer64,
            Samples::Float(_) => DataType::Float,
            Samples::Double(_) => DataType::Double,
        }
    }

    pub fn set_data_i32(&mut self, data: Vec<i32>) {
        if data.is_empty() {
            return;
        }
        self.samples = Samples::Integer32(data);
        self.update_end_time();
    }

    pub fn set_data_i64(&mut self, data: Vec<i64>) {
        if data.is_empty() {
            return;
        }
        self.samples = Samples::Integer64(data);
        self.update_end_time();
    }

    pub fn set_data_f32(&mut self, data: Vec<f32>) {
        if data.is_empty() {
            return;
        }
        self.samples = Samples::Float(data);
        self.update_end_time();
    }

    pub fn set_data_f64(&mut self, data: Vec<f64>) {
        if data.is_empty() {
            return;
        }
        self.samples = Samples::Double(data);
        self.update_end_time();
    }

    #[inline]
    pub fn data_i32(&self) -> Option<&[i32]> {
        match &self.samples {
            Samples::Integer32(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    pub fn data_i64(&self) -> Option<&[i64]> {
        match &self.samples {
            Samples::Integer64(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    pub fn data_f32(&self) -> Option<&[f32]> {
        match &self.samples {
            Samples::Float(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    pub fn data_f64(&self) -> Option<&[f64]> {
        match &self.samples {
            Samples::Double(v) => Some(v),
            _ => None,
        }
    }

    /// Drops the sample vector and resets the data type tag.
    pub fn clear_data(&mut self) {
        self.samples = Samples::None;
        self.update_end_time();
    }

    pub fn clear(&mut self) {
        *self = Packet::new();
    }

    #[inline]
    pub fn message_type(&self) -> &'static str {
        MESSAGE_TYPE
    }

    #[inline]
    pub fn message_version(&self) -> &'static str {
        MESSAGE_VERSION
    }

    fn update_end_time(&mut self) {
        self.end_time_micros = self.start_time_micros;
        let n_samples = self.samples.len();
        if n_samples > 0 && self.sampling_rate > 0.0 {
            let duration =
                (((n_samples - 1) as f64 / self.sampling_rate) * 1.0e6).round() as i64;
            self.end_time_micros = self.start_time_micros + duration;
        }
    }
}
