//! The out-of-band handshake that every data connection completes before it
//! carries traffic.
//!
//! A connecting socket presents a `Hello` message built from its ZAP
//! options; the listening side turns it into a ZAP request, consults the
//! rendezvous, and answers with a `Status` message. Anything but a 200
//! closes the connection.

use std::net::TcpStream;
use std::time::Duration;

use strata::logging;

use crate::auth::zap::ZapOptions;
use crate::inproc::{self, Multipart};
use crate::shared::Error;
use crate::wire::buffer::Buffer;
use crate::wire::frame::{Kind, Message};
use crate::wire::{read_message, write_message};

pub const ZAP_VERSION: &str = "1.0";

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const RENDEZVOUS_TIMEOUT: Duration = Duration::from_secs(1);

/// Runs the connecting side of the handshake on a blocking stream.
pub fn client_handshake(stream: &mut TcpStream, options: &ZapOptions) -> Result<(), Error> {
    let hello = Message::new(Kind::Hello, options.hello_frames()?);
    write_message(stream, &hello)?;

    let previous_timeout = stream.read_timeout().ok().flatten();
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    let mut buffer = Buffer::new();
    let status = read_message(stream, &mut buffer)?;
    stream.set_read_timeout(previous_timeout)?;

    if status.kind != Kind::Status || status.frames.len() != 2 {
        return Err(Error::Malformed("unexpected handshake reply".to_string()));
    }
    let status_code: u16 = String::from_utf8_lossy(&status.frames[0])
        .parse()
        .map_err(|_| Error::Malformed("unreadable handshake status".to_string()))?;
    if status_code != 200 {
        return Err(Error::HandshakeDenied {
            status_code,
            status_text: String::from_utf8_lossy(&status.frames[1]).to_string(),
        });
    }
    Ok(())
}

/// Screens one peer's `Hello` through the rendezvous and returns the status
/// to send back. A fabric with no arbiter bound admits the peer (the NULL
/// open-door convention) with a warning.
pub fn authorize(
    rendezvous: &str,
    hello: &Message,
    peer_address: &str,
    domain: &str,
    sequence: u64,
    log: &logging::Logger,
) -> (u16, String) {
    if hello.kind != Kind::Hello || hello.frames.is_empty() {
        return (400, "Malformed hello".to_string());
    }

    if !inproc::is_bound(rendezvous) {
        logging::warn!(log, "no handshake arbiter bound - admitting peer";
                       "rendezvous" => rendezvous, "address" => peer_address);
        return (200, "OK".to_string());
    }

    let mut request: Multipart = vec![
        ZAP_VERSION.as_bytes().to_vec(),
        sequence.to_string().into_bytes(),
        domain.as_bytes().to_vec(),
        peer_address.as_bytes().to_vec(),
        b"conduit".to_vec(),
    ];
    request.extend(hello.frames.iter().cloned());

    match inproc::request(rendezvous, request, RENDEZVOUS_TIMEOUT) {
        Ok(reply) if reply.len() >= 4 => {
            let status_code = String::from_utf8_lossy(&reply[2]).parse().unwrap_or(500);
            let status_text = String::from_utf8_lossy(&reply[3]).to_string();
            (status_code, status_text)
        }
        Ok(_) => (500, "Internal server error".to_string()),
        Err(error) => {
            logging::warn!(log, "handshake rendezvous failed";
                           "error" => error.to_string());
            (500, "Internal server error".to_string())
        }
    }
}

/// Builds the `Status` wire message for an authorization outcome.
#[inline]
pub fn status_message(status_code: u16, status_text: &str) -> Message {
    Message::new(
        Kind::Status,
        vec![
            status_code.to_string().into_bytes(),
            status_text.as_bytes().to_vec(),
        ],
    )
}
