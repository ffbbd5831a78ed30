//! Multi-frame message framing.
//!
//! Every transport message is `[protocol:u16][kind:u8][nframes:u8]
//! [body_len:u32]` followed by `nframes` length-prefixed frames. Data
//! messages carry exactly two frames (type tag + payload); subscription and
//! handshake traffic reuses the same shape.

use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::shared::{ErrorType, NetworkError, NetworkResult};
use crate::wire::buffer::Buffer;

pub const PROTOCOL_ID: u16 = 0x0b5e;

const HEADER_SIZE: usize = 8;
const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Kind {
    Data = 0,
    Subscribe = 1,
    Unsubscribe = 2,
    Hello = 3,
    Status = 4,
}

impl Kind {
    #[inline]
    fn from_u8(value: u8) -> NetworkResult<Kind> {
        Ok(match value {
            0 => Kind::Data,
            1 => Kind::Subscribe,
            2 => Kind::Unsubscribe,
            3 => Kind::Hello,
            4 => Kind::Status,
            _ => return Err(NetworkError::Fatal(ErrorType::IncorrectKind)),
        })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Message {
    pub kind: Kind,
    pub frames: Vec<Vec<u8>>,
}

impl Message {
    #[inline]
    pub fn new(kind: Kind, frames: Vec<Vec<u8>>) -> Message {
        Message { kind, frames }
    }

    /// Serializes the message into its wire image.
    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(self.frames.len() <= u8::MAX as usize);

        let body_len: usize = self.frames.iter().map(|f| 4 + f.len()).sum();
        let mut wire = Vec::with_capacity(HEADER_SIZE + body_len);
        wire.write_u16::<BigEndian>(PROTOCOL_ID).unwrap();
        wire.write_u8(self.kind as u8).unwrap();
        wire.write_u8(self.frames.len() as u8).unwrap();
        wire.write_u32::<BigEndian>(body_len as u32).unwrap();
        for frame in &self.frames {
            wire.write_u32::<BigEndian>(frame.len() as u32).unwrap();
            wire.extend_from_slice(frame);
        }
        wire
    }

    /// Attempts to extract one complete message from the front of the
    /// buffer. Returns `Wait` when more bytes are needed.
    pub fn try_extract(buffer: &mut Buffer) -> NetworkResult<Message> {
        let pending = buffer.read_slice();
        if pending.len() < HEADER_SIZE {
            return Err(NetworkError::Wait);
        }

        let mut cursor = Cursor::new(pending);
        let protocol = cursor.read_u16::<BigEndian>()?;
        if protocol != PROTOCOL_ID {
            return Err(NetworkError::Fatal(ErrorType::ProtocolMismatch));
        }
        let kind = Kind::from_u8(cursor.read_u8()?)?;
        let n_frames = cursor.read_u8()? as usize;
        let body_len = cursor.read_u32::<BigEndian>()? as usize;
        if body_len > MAX_BODY_SIZE {
            return Err(NetworkError::Fatal(ErrorType::PayloadTooLarge));
        }
        if pending.len() < HEADER_SIZE + body_len {
            return Err(NetworkError::Wait);
        }

        let mut frames = Vec::with_capacity(n_frames);
        let mut offset = HEADER_SIZE;
        let body_end = HEADER_SIZE + body_len;
        for _ in 0..n_frames {
            if offset + 4 > body_end {
                return Err(NetworkError::Fatal(ErrorType::Malformed));
            }
            let frame_len = Cursor::new(&pending[offset..]).read_u32::<BigEndian>()? as usize;
            offset += 4;
            if offset + frame_len > body_end {
                return Err(NetworkError::Fatal(ErrorType::Malformed));
            }
            frames.push(pending[offset..offset + frame_len].to_vec());
            offset += frame_len;
        }
        if offset != body_end {
            return Err(NetworkError::Fatal(ErrorType::Malformed));
        }

        buffer.move_head(body_end);
        Ok(Message { kind, frames })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(message: &Message) -> Message {
        let mut buffer = Buffer::new();
        buffer.push(&message.encode());
        let restored = Message::try_extract(&mut buffer).unwrap();
        assert!(buffer.is_empty());
        restored
    }

    #[test]
    fn test_round_trip() {
        let message = Message::new(
            Kind::Data,
            vec![b"topic".to_vec(), vec![0xde, 0xad, 0xbe, 0xef]],
        );
        assert_eq!(round_trip(&message), message);

        let empty = Message::new(Kind::Subscribe, vec![Vec::new()]);
        assert_eq!(round_trip(&empty), empty);
    }

    #[test]
    fn test_extract_waits_for_partial_input() {
        let message = Message::new(Kind::Hello, vec![b"NULL".to_vec()]);
        let wire = message.encode();

        let mut buffer = Buffer::new();
        for &byte in &wire[..wire.len() - 1] {
            buffer.push(&[byte]);
            assert_eq!(Message::try_extract(&mut buffer), Err(NetworkError::Wait));
        }
        buffer.push(&wire[wire.len() - 1..]);
        assert_eq!(Message::try_extract(&mut buffer).unwrap(), message);
    }

    #[test]
    fn test_extract_back_to_back_messages() {
        let first = Message::new(Kind::Data, vec![b"a".to_vec(), b"1".to_vec()]);
        let second = Message::new(Kind::Unsubscribe, vec![b"b".to_vec()]);

        let mut buffer = Buffer::new();
        buffer.push(&first.encode());
        buffer.push(&second.encode());

        assert_eq!(Message::try_extract(&mut buffer).unwrap(), first);
        assert_eq!(Message::try_extract(&mut buffer).unwrap(), second);
        assert_eq!(Message::try_extract(&mut buffer), Err(NetworkError::Wait));
    }

    #[test]
    fn test_rejects_foreign_protocol() {
        let mut wire = Message::new(Kind::Data, vec![]).encode();
        wire[0] = 0xff;

        let mut buffer = Buffer::new();
        buffer.push(&wire);
        assert_eq!(
            Message::try_extract(&mut buffer),
            Err(NetworkError::Fatal(ErrorType::ProtocolMismatch))
        );
    }

    #[test]
    fn test_rejects_inconsistent_frame_lengths() {
        let message = Message::new(Kind::Data, vec![b"abc".to_vec()]);
        let mut wire = message.encode();
        // Inflate the frame length past the body.
        wire[11] = 0xff;

        let mut buffer = Buffer::new();
        buffer.push(&wire);
        assert!(matches!(
            Message::try_extract(&mut buffer),
            Err(NetworkError::Fatal(_))
        ));
    }
}
