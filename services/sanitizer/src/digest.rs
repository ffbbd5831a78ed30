//! The per-packet header digest retained by the duplicate detector.

use strata::packet::Packet;

/// The slice of a packet the detector remembers: identity, time span,
/// rounded rate, and sample count. Observed sampling rates wobble around
/// the nominal rate, so the rounded value is what gets compared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub name: String,
    pub start_time_micros: i64,
    pub end_time_micros: i64,
    pub sampling_rate: i32,
    pub n_samples: usize,
}

impl PacketHeader {
    /// Fails when the packet has no identity, no rate, or no samples; such
    /// packets cannot participate in duplicate screening.
    pub fn from_packet(packet: &Packet) -> Result<PacketHeader, String> {
        if !packet.have_network() || !packet.have_station() || !packet.have_channel() {
            return Err("Packet identity is incomplete".to_string());
        }
        let end_time_micros = packet
            .end_time_micros()
            .ok_or_else(|| "No samples in packet".to_string())?;
        Ok(PacketHeader {
            name: packet.name(),
            start_time_micros: packet.start_time_micros(),
            end_time_micros,
            sampling_rate: packet.sampling_rate().round() as i32,
            n_samples: packet.number_of_samples(),
        })
    }

    /// Whole-second packet duration used for capacity estimation, floored
    /// at one second so short packets do not blow the estimate up.
    pub fn duration_secs(&self) -> i64 {
        let rate = self.sampling_rate.max(1) as f64;
        let duration = ((self.n_samples.saturating_sub(1)) as f64 / rate).round() as i64;
        duration.max(1)
    }

    /// Whether the time spans of two headers intersect.
    #[inline]
    pub fn overlaps(&self, other: &PacketHeader) -> bool {
        (self.start_time_micros >= other.start_time_micros
            && self.start_time_micros <= other.end_time_micros)
            || (self.end_time_micros >= other.start_time_micros
                && self.end_time_micros <= other.end_time_micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(rate: f64, n: usize, start: i64) -> Packet {
        let mut packet = Packet::new();
        packet.set_network("UU").unwrap();
        packet.set_station("FORK").unwrap();
        packet.set_channel("HHZ").unwrap();
        packet.set_sampling_rate(rate).unwrap();
        packet.set_start_time_micros(start);
        packet.set_data_i32(vec![0; n]);
        packet
    }

    #[test]
    fn test_from_packet() {
        let header = PacketHeader::from_packet(&packet(100.0, 200, 1_000_000)).unwrap();
        assert_eq!(header.name, "UU.FORK.HHZ.--");
        assert_eq!(header.sampling_rate, 100);
        assert_eq!(header.n_samples, 200);
        assert_eq!(header.start_time_micros, 1_000_000);
        assert_eq!(header.end_time_micros, 1_000_000 + 1_990_000);
    }

    #[test]
    fn test_requires_samples() {
        let mut empty = Packet::new();
        empty.set_network("UU").unwrap();
        empty.set_station("FORK").unwrap();
        empty.set_channel("HHZ").unwrap();
        empty.set_sampling_rate(100.0).unwrap();
        assert!(PacketHeader::from_packet(&empty).is_err());
    }

    #[test]
    fn test_duration_floors_at_one_second() {
        let short = PacketHeader::from_packet(&packet(100.0, 10, 0)).unwrap();
        assert_eq!(short.duration_secs(), 1);

        let long = PacketHeader::from_packet(&packet(100.0, 1001, 0)).unwrap();
        assert_eq!(long.duration_secs(), 10);
    }

    #[test]
    fn test_overlap() {
        let a = PacketHeader::from_packet(&packet(1.0, 3, 0)).unwrap();
        // a covers [0, 2 s]; b covers [1 s, 3 s]; c covers [5 s, 7 s].
        let b = PacketHeader::from_packet(&packet(1.0, 3, 1_000_000)).unwrap();
        let c = PacketHeader::from_packet(&packet(1.0, 3, 5_000_000)).unwrap();

        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
        assert!(!c.overlaps(&a));
    }
}
