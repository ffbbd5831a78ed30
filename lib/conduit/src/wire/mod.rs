pub mod buffer;
pub mod frame;

use std::io::{self, Write};
use std::net::TcpStream;

use crate::shared::{Error, NetworkError};
use crate::wire::buffer::Buffer;
use crate::wire::frame::Message;

/// Writes one message to a blocking stream. A timeout mid-write leaves the
/// peer with a torn message, so both outcomes surface as `SendFailed` and
/// the caller is expected to abandon the connection or drop the packet.
pub fn write_message(stream: &mut TcpStream, message: &Message) -> Result<(), Error> {
    stream
        .write_all(&message.encode())
        .map_err(|error| match error.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                Error::SendFailed("send timed out".to_string())
            }
            _ => Error::TransportClosed,
        })
}

/// Reads one complete message from a blocking stream, honoring the stream's
/// configured read timeout.
pub fn read_message(stream: &mut TcpStream, buffer: &mut Buffer) -> Result<Message, Error> {
    loop {
        match Message::try_extract(buffer) {
            Ok(message) => return Ok(message),
            Err(NetworkError::Wait) => (),
            Err(NetworkError::Fatal(error_type)) => {
                return Err(Error::Malformed(format!("{:?}", error_type)))
            }
        }

        let read_count = buffer.ingress(stream).map_err(|error| match error.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::ReceiveTimeout,
            _ => Error::TransportClosed,
        })?;
        if read_count == 0 {
            return Err(Error::TransportClosed);
        }
    }
}
