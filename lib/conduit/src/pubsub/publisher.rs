//! The packet publisher: a connecting data socket that emits two-frame
//! messages (type tag + CBOR payload) toward a proxy frontend.

use std::net::TcpStream;
use std::time::Duration;

use strata::logging;
use strata::packet::Packet;

use crate::auth::zap::ZapOptions;
use crate::endpoint::Endpoint;
use crate::handshake::client_handshake;
use crate::shared::Error;
use crate::wire::frame::{Kind, Message};
use crate::wire::write_message;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct PublisherOptions {
    endpoint: String,
    high_water_mark: i32,
    time_out_millis: i64,
    zap: ZapOptions,
}

impl PublisherOptions {
    pub fn new(endpoint: &str) -> PublisherOptions {
        PublisherOptions {
            endpoint: endpoint.to_string(),
            high_water_mark: 1024,
            time_out_millis: 1000,
            zap: ZapOptions::default(),
        }
    }

    /// Per-socket limit on queued frames; zero is unlimited.
    pub fn set_high_water_mark(&mut self, high_water_mark: i32) -> Result<(), Error> {
        if high_water_mark < 0 {
            return Err(Error::InvalidConfig(
                "High water mark cannot be negative".to_string(),
            ));
        }
        self.high_water_mark = high_water_mark;
        Ok(())
    }

    /// Maximum time a send may block before failing; negative waits forever.
    pub fn set_time_out_millis(&mut self, time_out_millis: i64) {
        self.time_out_millis = time_out_millis;
    }

    pub fn set_zap_options(&mut self, zap: ZapOptions) {
        self.zap = zap;
    }

    #[inline]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[inline]
    pub fn high_water_mark(&self) -> i32 {
        self.high_water_mark
    }

    #[inline]
    pub fn time_out_millis(&self) -> i64 {
        self.time_out_millis
    }
}

pub struct Publisher {
    stream: TcpStream,
    log: logging::Logger,
}

impl Publisher {
    /// Connects, completes the handshake, and configures the send timeout.
    pub fn new(options: &PublisherOptions, log: &logging::Logger) -> Result<Publisher, Error> {
        let log = log.new(logging::o!("component" => "packet_publisher"));
        let addr = Endpoint::parse(options.endpoint())?.to_tcp_addr()?;

        logging::info!(log, "publisher connecting"; "endpoint" => options.endpoint());
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
            .map_err(|error| Error::InvalidConfig(format!(
                "Failed to connect publisher to {}: {}",
                options.endpoint(),
                error
            )))?;
        stream.set_nodelay(true)?;

        if options.time_out_millis() < 0 {
            logging::warn!(log, "publisher may wait indefinitely to send a message");
            stream.set_write_timeout(None)?;
        } else {
            let millis = options.time_out_millis().max(1) as u64;
            stream.set_write_timeout(Some(Duration::from_millis(millis)))?;
        }

        let mut stream = stream;
        client_handshake(&mut stream, &options.zap)?;

        Ok(Publisher { stream, log })
    }

    /// Sends one packet as an atomic two-frame message: the type literal,
    /// then the serialized payload. A torn send fails the call.
    pub fn send(&mut self, packet: &Packet) -> Result<(), Error> {
        let payload = packet.serialize()?;
        let message = Message::new(
            Kind::Data,
            vec![packet.message_type().as_bytes().to_vec(), payload],
        );
        write_message(&mut self.stream, &message).map_err(|error| {
            logging::debug!(self.log, "send failed"; "error" => error.to_string());
            error
        })
    }
}
