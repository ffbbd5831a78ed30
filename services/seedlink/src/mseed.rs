//! miniSEED record decoding.
//!
//! Both miniSEED 2.x (fixed 48-byte header, blockette 1000, byte order
//! sniffed from the year field) and miniSEED 3 (little-endian header, FDSN
//! source identifier) records decode into canonical packets. Sample
//! encodings: 16/32-bit integers, IEEE floats and doubles, and Steim1/2
//! compressed integers.

use std::fmt;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use strata::packet::Packet;

pub const MIN_RECORD_LENGTH: usize = 48;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MseedError {
    /// The buffer does not hold a complete record.
    InsufficientData { need: usize, have: usize },
    Malformed(String),
    /// The record carries a sample encoding the fabric does not forward.
    UnhandledSampleType(u8),
}

impl fmt::Display for MseedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MseedError::InsufficientData { need, have } => {
                write!(f, "Insufficient data: need {} bytes, have {}", need, have)
            }
            MseedError::Malformed(reason) => write!(f, "Malformed miniSEED record: {}", reason),
            MseedError::UnhandledSampleType(encoding) => {
                write!(f, "Unhandled sample type (encoding {})", encoding)
            }
        }
    }
}

impl std::error::Error for MseedError {}

/// Decodes every record in the payload.
pub fn decode_records(buffer: &[u8]) -> Result<Vec<Packet>, MseedError> {
    let mut packets = Vec::new();
    let mut offset = 0;
    while buffer.len() - offset >= MIN_RECORD_LENGTH {
        let (packet, record_length) = decode_record(&buffer[offset..])?;
        packets.push(packet);
        offset += record_length;
    }
    Ok(packets)
}

/// Decodes the record at the front of the buffer, returning the packet and
/// the record length consumed.
pub fn decode_record(buffer: &[u8]) -> Result<(Packet, usize), MseedError> {
    if buffer.len() < MIN_RECORD_LENGTH {
        return Err(MseedError::InsufficientData {
            need: MIN_RECORD_LENGTH,
            have: buffer.len(),
        });
    }
    if buffer[0] == b'M' && buffer[1] == b'S' && buffer[2] == 3 {
        return decode_v3(buffer);
    }
    if looks_like_v2(buffer) {
        return decode_v2(buffer);
    }
    Err(MseedError::Malformed(
        "unrecognized record signature".to_string(),
    ))
}

///------------------------------------------------------------------------///
///                              miniSEED 2                                ///
///------------------------------------------------------------------------///

fn looks_like_v2(buffer: &[u8]) -> bool {
    buffer[..6]
        .iter()
        .all(|&b| b.is_ascii_digit() || b == b' ')
        && matches!(buffer[6], b'D' | b'R' | b'Q' | b'M')
}

fn decode_v2(buffer: &[u8]) -> Result<(Packet, usize), MseedError> {
    // Sniff the byte order from the year field.
    let year_be = BigEndian::read_u16(&buffer[20..22]);
    let big_endian = (1900..=2100).contains(&year_be);

    let station = ascii_token(&buffer[8..13]);
    let location = ascii_token(&buffer[13..15]);
    let channel = ascii_token(&buffer[15..18]);
    let network = ascii_token(&buffer[18..20]);

    let year = read_u16(&buffer[20..22], big_endian) as i64;
    let day_of_year = read_u16(&buffer[22..24], big_endian) as i64;
    let hour = buffer[24] as i64;
    let minute = buffer[25] as i64;
    let second = buffer[26] as i64;
    let fract = read_u16(&buffer[28..30], big_endian) as i64;

    let n_samples = read_u16(&buffer[30..32], big_endian) as usize;
    let rate_factor = read_i16(&buffer[32..34], big_endian);
    let rate_multiplier = read_i16(&buffer[34..36], big_endian);
    let activity_flags = buffer[36];
    let time_correction = read_i32(&buffer[40..44], big_endian) as i64;
    let data_offset = read_u16(&buffer[44..46], big_endian) as usize;
    let blockette_offset = read_u16(&buffer[46..48], big_endian) as usize;

    if !(1..=366).contains(&day_of_year) {
        return Err(MseedError::Malformed(format!(
            "day of year {} out of range",
            day_of_year
        )));
    }

    // Walk the blockette chain for blockette 1000.
    let mut encoding: Option<u8> = None;
    let mut record_length: Option<usize> = None;
    let mut offset = blockette_offset;
    while offset != 0 {
        if offset + 4 > buffer.len() {
            return Err(MseedError::Malformed("blockette past record".to_string()));
        }
        let blockette_type = read_u16(&buffer[offset..offset + 2], big_endian);
        let next_offset = read_u16(&buffer[offset + 2..offset + 4], big_endian) as usize;
        if blockette_type == 1000 {
            if offset + 7 > buffer.len() {
                return Err(MseedError::Malformed("short blockette 1000".to_string()));
            }
            encoding = Some(buffer[offset + 4]);
            let length_power = buffer[offset + 6] as u32;
            if !(7..=20).contains(&length_power) {
                return Err(MseedError::Malformed(format!(
                    "record length power {} out of range",
                    length_power
                )));
            }
            record_length = Some(1usize << length_power);
        }
        if next_offset <= offset {
            break;
        }
        offset = next_offset;
    }
    let encoding =
        encoding.ok_or_else(|| MseedError::Malformed("no blockette 1000".to_string()))?;
    let record_length =
        record_length.ok_or_else(|| MseedError::Malformed("no record length".to_string()))?;
    if buffer.len() < record_length {
        return Err(MseedError::InsufficientData {
            need: record_length,
            have: buffer.len(),
        });
    }

    // Assemble the start time in microseconds; the fractional field counts
    // 0.1 ms ticks, as does an unapplied time correction.
    let mut start_time_micros = (epoch_days(year, day_of_year) * 86_400
        + hour * 3_600
        + minute * 60
        + second)
        * 1_000_000
        + fract * 100;
    let correction_applied = activity_flags & 0x02 != 0;
    if !correction_applied {
        start_time_micros += time_correction * 100;
    }

    let sampling_rate = nominal_rate(rate_factor, rate_multiplier);
    if sampling_rate <= 0.0 {
        return Err(MseedError::Malformed(format!(
            "non-positive sampling rate from factor {} multiplier {}",
            rate_factor, rate_multiplier
        )));
    }

    if data_offset < MIN_RECORD_LENGTH || data_offset > record_length {
        return Err(MseedError::Malformed(format!(
            "data offset {} out of range",
            data_offset
        )));
    }

    let mut packet = build_packet(&network, &station, &channel, &location)?;
    packet
        .set_sampling_rate(sampling_rate)
        .map_err(|error| MseedError::Malformed(error.to_string()))?;
    packet.set_start_time_micros(start_time_micros);
    if n_samples > 0 {
        decode_samples(
            &mut packet,
            &buffer[data_offset..record_length],
            encoding,
            n_samples,
            big_endian,
        )?;
    }
    Ok((packet, record_length))
}

///------------------------------------------------------------------------///
///                              miniSEED 3                                ///
///------------------------------------------------------------------------///

const V3_HEADER_LENGTH: usize = 40;

fn decode_v3(buffer: &[u8]) -> Result<(Packet, usize), MseedError> {
    let nanosecond = LittleEndian::read_u32(&buffer[4..8]) as i64;
    let year = LittleEndian::read_u16(&buffer[8..10]) as i64;
    let day_of_year = LittleEndian::read_u16(&buffer[10..12]) as i64;
    let hour = buffer[12] as i64;
    let minute = buffer[13] as i64;
    let second = buffer[14] as i64;
    let encoding = buffer[15];
    let rate_value = LittleEndian::read_f64(&buffer[16..24]);
    let n_samples = LittleEndian::read_u32(&buffer[24..28]) as usize;
    let sid_length = buffer[33] as usize;
    let extra_length = LittleEndian::read_u16(&buffer[34..36]) as usize;
    let data_length = LittleEndian::read_u32(&buffer[36..40]) as usize;

    let record_length = V3_HEADER_LENGTH + sid_length + extra_length + data_length;
    if buffer.len() < record_length {
        return Err(MseedError::InsufficientData {
            need: record_length,
            have: buffer.len(),
        });
    }
    if !(1..=366).contains(&day_of_year) {
        return Err(MseedError::Malformed(format!(
            "day of year {} out of range",
            day_of_year
        )));
    }

    let sid = std::str::from_utf8(&buffer[V3_HEADER_LENGTH..V3_HEADER_LENGTH + sid_length])
        .map_err(|_| MseedError::Malformed("source identifier is not UTF-8".to_string()))?;
    let (network, station, location, channel) = parse_source_identifier(sid)?;

    // Start time: nanoseconds rounded to the packet's microsecond grid.
    let start_time_micros = (epoch_days(year, day_of_year) * 86_400
        + hour * 3_600
        + minute * 60
        + second)
        * 1_000_000
        + (nanosecond + 500) / 1_000;

    // A negative rate value is a period in seconds.
    let sampling_rate = if rate_value < 0.0 {
        -1.0 / rate_value
    } else {
        rate_value
    };
    if sampling_rate <= 0.0 {
        return Err(MseedError::Malformed(
            "non-positive sampling rate".to_string(),
        ));
    }

    let data_start = V3_HEADER_LENGTH + sid_length + extra_length;
    let mut packet = build_packet(&network, &station, &channel, &location)?;
    packet
        .set_sampling_rate(sampling_rate)
        .map_err(|error| MseedError::Malformed(error.to_string()))?;
    packet.set_start_time_micros(start_time_micros);
    if n_samples > 0 {
        // miniSEED 3 payloads keep the version 2 encodings; Steim frames
        // stay big endian.
        decode_samples(
            &mut packet,
            &buffer[data_start..record_length],
            encoding,
            n_samples,
            true,
        )?;
    }
    Ok((packet, record_length))
}

/// `FDSN:NET_STA_LOC_BAND_SOURCE_POSITION` -> identity tokens; the channel
/// is the concatenated band/source/position codes.
fn parse_source_identifier(sid: &str) -> Result<(String, String, String, String), MseedError> {
    let rest = sid
        .strip_prefix("FDSN:")
        .ok_or_else(|| MseedError::Malformed(format!("bad source identifier {}", sid)))?;
    let parts: Vec<&str> = rest.split('_').collect();
    if parts.len() != 6 {
        return Err(MseedError::Malformed(format!(
            "bad source identifier {}",
            sid
        )));
    }
    Ok((
        parts[0].to_string(),
        parts[1].to_string(),
        parts[2].to_string(),
        format!("{}{}{}", parts[3], parts[4], parts[5]),
    ))
}

///------------------------------------------------------------------------///
///                               Helpers                                  ///
///------------------------------------------------------------------------///

fn build_packet(
    network: &str,
    station: &str,
    channel: &str,
    location: &str,
) -> Result<Packet, MseedError> {
    let mut packet = Packet::new();
    packet
        .set_network(network)
        .map_err(|_| MseedError::Malformed(format!("bad network {:?}", network)))?;
    packet
        .set_station(station)
        .map_err(|_| MseedError::Malformed(format!("bad station {:?}", station)))?;
    packet
        .set_channel(channel)
        .map_err(|_| MseedError::Malformed(format!("bad channel {:?}", channel)))?;
    // An absent or blank location collapses to the sentinel.
    let location = location.trim();
    if location.is_empty() {
        packet.set_location_code("--").unwrap();
    } else {
        packet
            .set_location_code(location)
            .map_err(|_| MseedError::Malformed(format!("bad location {:?}", location)))?;
    }
    Ok(packet)
}

fn ascii_token(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

/// Days from the unix epoch to January 1 of `year`.
fn epoch_days(year: i64, day_of_year: i64) -> i64 {
    let y = year - 1;
    let to_year = y * 365 + y / 4 - y / 100 + y / 400 - 719_162;
    to_year + (day_of_year - 1)
}

fn nominal_rate(factor: i16, multiplier: i16) -> f64 {
    if factor == 0 {
        return 0.0;
    }
    let mut rate = if factor > 0 {
        factor as f64
    } else {
        -1.0 / factor as f64
    };
    if multiplier > 0 {
        rate *= multiplier as f64;
    } else if multiplier < 0 {
        rate /= -(multiplier as f64);
    }
    rate
}

#[inline]
fn read_u16(bytes: &[u8], big_endian: bool) -> u16 {
    if big_endian {
        BigEndian::read_u16(bytes)
    } else {
        LittleEndian::read_u16(bytes)
    }
}

#[inline]
fn read_i16(bytes: &[u8], big_endian: bool) -> i16 {
    read_u16(bytes, big_endian) as i16
}

#[inline]
fn read_u32(bytes: &[u8], big_endian: bool) -> u32 {
    if big_endian {
        BigEndian::read_u32(bytes)
    } else {
        LittleEndian::read_u32(bytes)
    }
}

#[inline]
fn read_i32(bytes: &[u8], big_endian: bool) -> i32 {
    read_u32(bytes, big_endian) as i32
}

fn decode_samples(
    packet: &mut Packet,
    data: &[u8],
    encoding: u8,
    n_samples: usize,
    big_endian: bool,
) -> Result<(), MseedError> {
    match encoding {
        // 16-bit integers widen to the integer32 tag.
        1 => {
            require(data.len() >= 2 * n_samples, n_samples * 2, data.len())?;
            let samples = (0..n_samples)
                .map(|i| read_i16(&data[2 * i..2 * i + 2], big_endian) as i32)
                .collect();
            packet.set_data_i32(samples);
        }
        3 => {
            require(data.len() >= 4 * n_samples, n_samples * 4, data.len())?;
            let samples = (0..n_samples)
                .map(|i| read_i32(&data[4 * i..4 * i + 4], big_endian))
                .collect();
            packet.set_data_i32(samples);
        }
        4 => {
            require(data.len() >= 4 * n_samples, n_samples * 4, data.len())?;
            let samples = (0..n_samples)
                .map(|i| f32::from_bits(read_u32(&data[4 * i..4 * i + 4], big_endian)))
                .collect();
            packet.set_data_f32(samples);
        }
        5 => {
            require(data.len() >= 8 * n_samples, n_samples * 8, data.len())?;
            let samples = (0..n_samples)
                .map(|i| {
                    let bits = if big_endian {
                        BigEndian::read_u64(&data[8 * i..8 * i + 8])
                    } else {
                        LittleEndian::read_u64(&data[8 * i..8 * i + 8])
                    };
                    f64::from_bits(bits)
                })
                .collect();
            packet.set_data_f64(samples);
        }
        10 => packet.set_data_i32(decode_steim(data, n_samples, big_endian, false)?),
        11 => packet.set_data_i32(decode_steim(data, n_samples, big_endian, true)?),
        other => return Err(MseedError::UnhandledSampleType(other)),
    }
    Ok(())
}

fn require(ok: bool, need: usize, have: usize) -> Result<(), MseedError> {
    if ok {
        Ok(())
    } else {
        Err(MseedError::InsufficientData { need, have })
    }
}

#[inline]
fn sign_extend(value: u32, bits: u32) -> i32 {
    ((value << (32 - bits)) as i32) >> (32 - bits)
}

/// Steim1/Steim2 decompression. Both store first differences in 64-byte
/// frames of sixteen 32-bit words; word 0 holds the 2-bit codes, frame 0
/// words 1 and 2 hold the forward and reverse integration constants.
fn decode_steim(
    data: &[u8],
    n_samples: usize,
    big_endian: bool,
    steim2: bool,
) -> Result<Vec<i32>, MseedError> {
    if data.len() < 64 {
        return Err(MseedError::InsufficientData {
            need: 64,
            have: data.len(),
        });
    }

    let mut forward: i32 = 0;
    let mut reverse: i32 = 0;
    let mut diffs: Vec<i32> = Vec::with_capacity(n_samples + 8);

    for (frame_index, frame) in data.chunks_exact(64).enumerate() {
        let codes = read_u32(&frame[0..4], big_endian);
        for word_index in 1..16 {
            let code = (codes >> (30 - 2 * word_index)) & 0x3;
            let word_bytes = &frame[4 * word_index..4 * word_index + 4];
            if frame_index == 0 && word_index == 1 {
                forward = read_i32(word_bytes, big_endian);
                continue;
            }
            if frame_index == 0 && word_index == 2 {
                reverse = read_i32(word_bytes, big_endian);
                continue;
            }

            let word = read_u32(word_bytes, big_endian);
            match code {
                0 => (),
                1 => {
                    for &byte in word_bytes {
                        diffs.push(byte as i8 as i32);
                    }
                }
                2 if !steim2 => {
                    diffs.push(read_i16(&word_bytes[0..2], big_endian) as i32);
                    diffs.push(read_i16(&word_bytes[2..4], big_endian) as i32);
                }
                3 if !steim2 => diffs.push(word as i32),
                2 => {
                    // Steim2: the top two bits select the sub-encoding.
                    match word >> 30 {
                        1 => diffs.push(sign_extend(word & 0x3fff_ffff, 30)),
                        2 => {
                            diffs.push(sign_extend((word >> 15) & 0x7fff, 15));
                            diffs.push(sign_extend(word & 0x7fff, 15));
                        }
                        3 => {
                            diffs.push(sign_extend((word >> 20) & 0x3ff, 10));
                            diffs.push(sign_extend((word >> 10) & 0x3ff, 10));
                            diffs.push(sign_extend(word & 0x3ff, 10));
                        }
                        _ => {
                            return Err(MseedError::Malformed(
                                "bad Steim2 dnib for code 2".to_string(),
                            ))
                        }
                    }
                }
                3 => match word >> 30 {
                    0 => {
                        for shift in [24u32, 18, 12, 6, 0] {
                            diffs.push(sign_extend((word >> shift) & 0x3f, 6));
                        }
                    }
                    1 => {
                        for shift in [25u32, 20, 15, 10, 5, 0] {
                            diffs.push(sign_extend((word >> shift) & 0x1f, 5));
                        }
                    }
                    2 => {
                        for shift in [24u32, 20, 16, 12, 8, 4, 0] {
                            diffs.push(sign_extend((word >> shift) & 0xf, 4));
                        }
                    }
                    _ => {
                        return Err(MseedError::Malformed(
                            "bad Steim2 dnib for code 3".to_string(),
                        ))
                    }
                },
                _ => unreachable!("two-bit code"),
            }
        }
        if diffs.len() >= n_samples {
            break;
        }
    }

    if diffs.len() < n_samples {
        return Err(MseedError::Malformed(format!(
            "Steim stream held {} differences for {} samples",
            diffs.len(),
            n_samples
        )));
    }

    // Integrate: the first difference spans the record boundary and is
    // superseded by the forward constant.
    let mut samples = Vec::with_capacity(n_samples);
    samples.push(forward);
    let mut current = forward;
    for &diff in diffs.iter().take(n_samples).skip(1) {
        current = current.wrapping_add(diff);
        samples.push(current);
    }

    if samples.last() != Some(&reverse) {
        return Err(MseedError::Malformed(
            "Steim reverse integration mismatch".to_string(),
        ));
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{BigEndian, ByteOrder};
    use strata::packet::DataType;

    /// Builds a 512-byte miniSEED 2 record with big-endian headers.
    fn v2_record(encoding: u8, n_samples: u16, payload: &[u8]) -> Vec<u8> {
        let mut record = vec![0u8; 512];
        record[..6].copy_from_slice(b"000001");
        record[6] = b'D';
        record[8..13].copy_from_slice(b"FORK ");
        record[13..15].copy_from_slice(b"01");
        record[15..18].copy_from_slice(b"HHZ");
        record[18..20].copy_from_slice(b"UU");
        BigEndian::write_u16(&mut record[20..22], 2024);
        BigEndian::write_u16(&mut record[22..24], 152);
        record[24] = 10;
        record[25] = 30;
        record[26] = 5;
        BigEndian::write_u16(&mut record[28..30], 1234); // 0.1234 s
        BigEndian::write_u16(&mut record[30..32], n_samples);
        BigEndian::write_u16(&mut record[32..34], 100u16); // factor
        BigEndian::write_u16(&mut record[34..36], 1u16); // multiplier
        record[39] = 1; // one blockette
        BigEndian::write_u16(&mut record[44..46], 64); // data offset
        BigEndian::write_u16(&mut record[46..48], 48); // blockette offset
        // Blockette 1000.
        BigEndian::write_u16(&mut record[48..50], 1000);
        BigEndian::write_u16(&mut record[50..52], 0);
        record[52] = encoding;
        record[53] = 1; // big endian word order
        record[54] = 9; // 2^9 = 512
        record[64..64 + payload.len()].copy_from_slice(payload);
        record
    }

    // 2024-05-31T10:30:05.1234 UTC (2024 day 152).
    const EXPECTED_START: i64 = 1_717_151_405_123_400;

    #[test]
    fn test_v2_int32_record() {
        let mut payload = vec![0u8; 16];
        for (i, value) in [-2i32, 0, 7, 40_000].iter().enumerate() {
            BigEndian::write_i32(&mut payload[4 * i..4 * i + 4], *value);
        }
        let record = v2_record(3, 4, &payload);

        let (packet, consumed) = decode_record(&record).unwrap();
        assert_eq!(consumed, 512);
        assert_eq!(packet.network(), "UU");
        assert_eq!(packet.station(), "FORK");
        assert_eq!(packet.channel(), "HHZ");
        assert_eq!(packet.location_code(), "01");
        assert_eq!(packet.sampling_rate(), 100.0);
        assert_eq!(packet.start_time_micros(), EXPECTED_START);
        assert_eq!(packet.data_i32(), Some(&[-2, 0, 7, 40_000][..]));
    }

    #[test]
    fn test_v2_float_and_double_records() {
        let mut payload = vec![0u8; 8];
        BigEndian::write_u32(&mut payload[0..4], 1.5f32.to_bits());
        BigEndian::write_u32(&mut payload[4..8], (-0.25f32).to_bits());
        let record = v2_record(4, 2, &payload);
        let (packet, _) = decode_record(&record).unwrap();
        assert_eq!(packet.data_type(), DataType::Float);
        assert_eq!(packet.data_f32(), Some(&[1.5f32, -0.25][..]));

        let mut payload = vec![0u8; 16];
        BigEndian::write_u64(&mut payload[0..8], 2.5f64.to_bits());
        BigEndian::write_u64(&mut payload[8..16], (-1.0e9f64).to_bits());
        let record = v2_record(5, 2, &payload);
        let (packet, _) = decode_record(&record).unwrap();
        assert_eq!(packet.data_type(), DataType::Double);
        assert_eq!(packet.data_f64(), Some(&[2.5f64, -1.0e9][..]));
    }

    #[test]
    fn test_v2_int16_record_widens() {
        let mut payload = vec![0u8; 6];
        for (i, value) in [-300i16, 0, 299].iter().enumerate() {
            BigEndian::write_i16(&mut payload[2 * i..2 * i + 2], *value);
        }
        let record = v2_record(1, 3, &payload);
        let (packet, _) = decode_record(&record).unwrap();
        assert_eq!(packet.data_type(), DataType::Integer32);
        assert_eq!(packet.data_i32(), Some(&[-300, 0, 299][..]));
    }

    #[test]
    fn test_v2_blank_location_becomes_sentinel() {
        let mut payload = vec![0u8; 4];
        BigEndian::write_i32(&mut payload, 1);
        let mut record = v2_record(3, 1, &payload);
        record[13..15].copy_from_slice(b"  ");
        let (packet, _) = decode_record(&record).unwrap();
        assert_eq!(packet.location_code(), "--");
    }

    #[test]
    fn test_v2_steim1_record() {
        // Samples 1, 2, 4, 7, 11 as byte differences.
        let mut payload = vec![0u8; 64];
        let codes: u32 = (1 << 24) | (1 << 22); // words 3 and 4 hold bytes
        BigEndian::write_u32(&mut payload[0..4], codes);
        BigEndian::write_i32(&mut payload[4..8], 1); // forward
        BigEndian::write_i32(&mut payload[8..12], 11); // reverse
        payload[12..16].copy_from_slice(&[0u8, 1, 2, 3]);
        payload[16..20].copy_from_slice(&[4u8, 0, 0, 0]);
        let record = v2_record(10, 5, &payload);

        let (packet, _) = decode_record(&record).unwrap();
        assert_eq!(packet.data_i32(), Some(&[1, 2, 4, 7, 11][..]));
    }

    #[test]
    fn test_v2_steim2_record() {
        // Samples 5, 15, 35, 65 via 10-bit differences; the leading
        // difference spans the record boundary and is a dummy.
        let mut payload = vec![0u8; 64];
        let codes: u32 = (2 << 24) | (2 << 22); // words 3 and 4 are Steim2
        BigEndian::write_u32(&mut payload[0..4], codes);
        BigEndian::write_i32(&mut payload[4..8], 5);
        BigEndian::write_i32(&mut payload[8..12], 65);
        let word3: u32 = (3 << 30) | (10 << 10) | 20;
        BigEndian::write_u32(&mut payload[12..16], word3);
        let word4: u32 = (3 << 30) | (30 << 20);
        BigEndian::write_u32(&mut payload[16..20], word4);
        let record = v2_record(11, 4, &payload);

        let (packet, _) = decode_record(&record).unwrap();
        assert_eq!(packet.data_i32(), Some(&[5, 15, 35, 65][..]));
    }

    #[test]
    fn test_v2_steim_reverse_mismatch_detected() {
        let mut payload = vec![0u8; 64];
        let codes: u32 = 1 << 24;
        BigEndian::write_u32(&mut payload[0..4], codes);
        BigEndian::write_i32(&mut payload[4..8], 1);
        BigEndian::write_i32(&mut payload[8..12], 9999); // wrong
        payload[12..16].copy_from_slice(&[0u8, 1, 2, 3]);
        let record = v2_record(10, 4, &payload);
        assert!(matches!(
            decode_record(&record),
            Err(MseedError::Malformed(_))
        ));
    }

    #[test]
    fn test_v2_unhandled_encoding() {
        let record = v2_record(30, 4, &[0u8; 16]); // SRO
        assert_eq!(
            decode_record(&record),
            Err(MseedError::UnhandledSampleType(30))
        );
    }

    /// Builds a miniSEED 3 record with an int32 payload.
    fn v3_record(sid: &str, samples: &[i32]) -> Vec<u8> {
        let mut payload = vec![0u8; 4 * samples.len()];
        for (i, value) in samples.iter().enumerate() {
            BigEndian::write_i32(&mut payload[4 * i..4 * i + 4], *value);
        }
        let mut record = vec![0u8; 40];
        record[0] = b'M';
        record[1] = b'S';
        record[2] = 3;
        LittleEndian::write_u32(&mut record[4..8], 123_400_000); // ns
        LittleEndian::write_u16(&mut record[8..10], 2024);
        LittleEndian::write_u16(&mut record[10..12], 152);
        record[12] = 10;
        record[13] = 30;
        record[14] = 5;
        record[15] = 3; // int32
        LittleEndian::write_f64(&mut record[16..24], 100.0);
        LittleEndian::write_u32(&mut record[24..28], samples.len() as u32);
        record[33] = sid.len() as u8;
        LittleEndian::write_u16(&mut record[34..36], 0);
        LittleEndian::write_u32(&mut record[36..40], payload.len() as u32);
        record.extend_from_slice(sid.as_bytes());
        record.extend_from_slice(&payload);
        record
    }

    #[test]
    fn test_v3_record() {
        let record = v3_record("FDSN:UU_FORK_01_H_H_Z", &[3, 1, 4, 1, 5]);
        let (packet, consumed) = decode_record(&record).unwrap();
        assert_eq!(consumed, record.len());
        assert_eq!(packet.network(), "UU");
        assert_eq!(packet.station(), "FORK");
        assert_eq!(packet.channel(), "HHZ");
        assert_eq!(packet.location_code(), "01");
        assert_eq!(packet.sampling_rate(), 100.0);
        assert_eq!(packet.start_time_micros(), EXPECTED_START);
        assert_eq!(packet.data_i32(), Some(&[3, 1, 4, 1, 5][..]));
    }

    #[test]
    fn test_v3_empty_location() {
        let record = v3_record("FDSN:UU_FORK__H_H_Z", &[1]);
        let (packet, _) = decode_record(&record).unwrap();
        assert_eq!(packet.location_code(), "--");
    }

    #[test]
    fn test_multiple_records_in_one_payload() {
        let mut payload = vec![0u8; 4];
        BigEndian::write_i32(&mut payload, 42);
        let mut buffer = v2_record(3, 1, &payload);
        buffer.extend_from_slice(&v2_record(3, 1, &payload));

        let packets = decode_records(&buffer).unwrap();
        assert_eq!(packets.len(), 2);
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            decode_record(&[0xffu8; 64]),
            Err(MseedError::Malformed(_))
        ));
        assert!(matches!(
            decode_record(&[0u8; 10]),
            Err(MseedError::InsufficientData { .. })
        ));
    }
}
