//! CBOR codec for the canonical data packet.
//!
//! The wire image is a definite-length map with string keys; the numeric tag
//! travels with the samples so downstream stages never have to assume a
//! sample type. Key order is not significant on decode.

use minicbor::{Decoder, Encoder};

use crate::packet::{DataType, Packet, PacketError, PacketResult, MESSAGE_TYPE, MESSAGE_VERSION};

impl Packet {
    /// Serializes the packet into its self-describing CBOR map. The identity
    /// tokens and the sampling rate must be set; `endTime` and the sample
    /// payload are emitted only when samples are present.
    pub fn serialize(&self) -> PacketResult<Vec<u8>> {
        if !self.have_network() {
            return Err(PacketError::FieldNotSet("network"));
        }
        if !self.have_station() {
            return Err(PacketError::FieldNotSet("station"));
        }
        if !self.have_channel() {
            return Err(PacketError::FieldNotSet("channel"));
        }
        if !self.have_sampling_rate() {
            return Err(PacketError::FieldNotSet("sampling rate"));
        }

        let mut buffer = Vec::new();
        let mut e = Encoder::new(&mut buffer);
        self.encode_map(&mut e)
            .map_err(|error| PacketError::Malformed(error.to_string()))?;
        Ok(buffer)
    }

    fn encode_map<W: minicbor::encode::Write>(
        &self,
        e: &mut Encoder<W>,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        let n_samples = self.number_of_samples();
        let mut n_entries: u64 = 8;
        if self.end_time_micros().is_some() {
            n_entries += 1;
        }
        if n_samples > 0 {
            n_entries += 2;
        }

        e.map(n_entries)?;
        e.str("messageType")?.str(MESSAGE_TYPE)?;
        e.str("messageVersion")?.str(MESSAGE_VERSION)?;
        e.str("network")?.str(self.network())?;
        e.str("station")?.str(self.station())?;
        e.str("channel")?.str(self.channel())?;
        e.str("locationCode")?.str(self.location_code())?;
        e.str("startTime")?.i64(self.start_time_micros())?;
        e.str("samplingRate")?.f64(self.sampling_rate())?;
        if let Some(end_time) = self.end_time_micros() {
            e.str("endTime")?.i64(end_time)?;
        }
        if n_samples > 0 {
            match self.data_type() {
                DataType::Integer32 => {
                    e.str("dataType")?.str("integer32")?;
                    e.str("data")?.array(n_samples as u64)?;
                    for &x in self.data_i32().unwrap() {
                        e.i32(x)?;
                    }
                }
                DataType::Integer64 => {
                    e.str("dataType")?.str("integer64")?;
                    e.str("data")?.array(n_samples as u64)?;
                    for &x in self.data_i64().unwrap() {
                        e.i64(x)?;
                    }
                }
                DataType::Float => {
                    e.str("dataType")?.str("float")?;
                    e.str("data")?.array(n_samples as u64)?;
                    for &x in self.data_f32().unwrap() {
                        e.f32(x)?;
                    }
                }
                DataType::Double => {
                    e.str("dataType")?.str("double")?;
                    e.str("data")?.array(n_samples as u64)?;
                    for &x in self.data_f64().unwrap() {
                        e.f64(x)?;
                    }
                }
                DataType::Unknown => unreachable!("samples without a type tag"),
            }
        }
        Ok(())
    }

    /// Decodes a serialized packet, validating the message type and
    /// re-establishing the class invariants through the setters.
    pub fn deserialize(message: &[u8]) -> PacketResult<Packet> {
        if message.is_empty() {
            return Err(PacketError::Malformed("message is empty".to_string()));
        }

        let mut d = Decoder::new(message);
        let n_entries = d
            .map()
            .map_err(|error| PacketError::Malformed(error.to_string()))?
            .ok_or_else(|| PacketError::Malformed("indefinite map".to_string()))?;

        let mut message_type: Option<String> = None;
        let mut network: Option<String> = None;
        let mut station: Option<String> = None;
        let mut channel: Option<String> = None;
        let mut location_code: Option<String> = None;
        let mut start_time: Option<i64> = None;
        let mut sampling_rate: Option<f64> = None;
        let mut data_type: Option<String> = None;
        let mut data_position: Option<usize> = None;

        for _ in 0..n_entries {
            let key = d
                .str()
                .map_err(|error| PacketError::Malformed(error.to_string()))?
                .to_string();
            match key.as_str() {
                "messageType" => message_type = Some(decode_str(&mut d)?),
                "network" => network = Some(decode_str(&mut d)?),
                "station" => station = Some(decode_str(&mut d)?),
                "channel" => channel = Some(decode_str(&mut d)?),
                "locationCode" => location_code = Some(decode_str(&mut d)?),
                "startTime" => {
                    start_time = Some(
                        d.i64()
                            .map_err(|error| PacketError::Malformed(error.to_string()))?,
                    )
                }
                "samplingRate" => {
                    sampling_rate = Some(
                        d.f64()
                            .map_err(|error| PacketError::Malformed(error.to_string()))?,
                    )
                }
                "dataType" => data_type = Some(decode_str(&mut d)?),
                "data" => {
                    data_position = Some(d.position());
                    d.skip()
                        .map_err(|error| PacketError::Malformed(error.to_string()))?;
                }
                // messageVersion and the redundant endTime are recomputed.
                _ => {
                    d.skip()
                        .map_err(|error| PacketError::Malformed(error.to_string()))?;
                }
            }
        }

        match message_type {
            Some(message_type) if message_type == MESSAGE_TYPE => (),
            Some(_) => {
                return Err(PacketError::Malformed(
                    "invalid message type".to_string(),
                ))
            }
            None => {
                return Err(PacketError::Malformed(
                    "missing message type".to_string(),
                ))
            }
        }

        let mut packet = Packet::new();
        packet.set_network(&required(network, "network")?)?;
        packet.set_station(&required(station, "station")?)?;
        packet.set_channel(&required(channel, "channel")?)?;
        packet.set_location_code(&required(location_code, "locationCode")?)?;
        packet
            .set_sampling_rate(required(sampling_rate, "samplingRate")?)
            .map_err(|_| PacketError::Malformed("non-positive sampling rate".to_string()))?;
        packet.set_start_time_micros(required(start_time, "startTime")?);

        if let Some(position) = data_position {
            let tag = data_type
                .ok_or_else(|| PacketError::Malformed("data without a type tag".to_string()))?;
            decode_samples(&mut packet, &tag, &message[position..])?;
        }

        Ok(packet)
    }
}

#[inline]
fn required<T>(value: Option<T>, name: &str) -> PacketResult<T> {
    value.ok_or_else(|| PacketError::Malformed(format!("missing required field {}", name)))
}

#[inline]
fn decode_str(d: &mut Decoder<'_>) -> PacketResult<String> {
    Ok(d.str()
        .map_err(|error| PacketError::Malformed(error.to_string()))?
        .to_string())
}

fn decode_samples(packet: &mut Packet, tag: &str, data: &[u8]) -> PacketResult<()> {
    let mut d = Decoder::new(data);
    let n = d
        .array()
        .map_err(|error| PacketError::Malformed(error.to_string()))?
        .ok_or_else(|| PacketError::Malformed("indefinite data array".to_string()))?
        as usize;

    match tag {
        "integer32" => {
            let mut samples = Vec::with_capacity(n);
            for _ in 0..n {
                samples.push(
                    d.i32()
                        .map_err(|error| PacketError::Malformed(error.to_string()))?,
                );
            }
            packet.set_data_i32(samples);
        }
        "integer64" => {
            let mut samples = Vec::with_capacity(n);
            for _ in 0..n {
                samples.push(
                    d.i64()
                        .map_err(|error| PacketError::Malformed(error.to_string()))?,
                );
            }
            packet.set_data_i64(samples);
        }
        "float" => {
            let mut samples = Vec::with_capacity(n);
            for _ in 0..n {
                samples.push(
                    d.f32()
                        .map_err(|error| PacketError::Malformed(error.to_string()))?,
                );
            }
            packet.set_data_f32(samples);
        }
        "double" => {
            let mut samples = Vec::with_capacity(n);
            for _ in 0..n {
                samples.push(
                    d.f64()
                        .map_err(|error| PacketError::Malformed(error.to_string()))?,
                );
            }
            packet.set_data_f64(samples);
        }
        other => {
            return Err(PacketError::Malformed(format!(
                "unsupported data type {}",
                other
            )))
        }
    }

    Ok(())
}
