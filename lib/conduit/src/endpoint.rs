//! Transport endpoint addressing.
//!
//! Endpoints are URIs of the form `tcp://host:port`, `udp://host:port`, or
//! `inproc://name`. Anything else is rejected up front; the data plane
//! currently runs over TCP, with inproc reserved for in-process rendezvous
//! sockets.

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};

use crate::shared::Error;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Endpoint {
    Tcp(String),
    Udp(String),
    Inproc(String),
}

impl Endpoint {
    /// Parses and validates an endpoint URI.
    pub fn parse(address: &str) -> Result<Endpoint, Error> {
        if let Some(rest) = address.strip_prefix("tcp://") {
            Self::require_host_port(address, rest)?;
            return Ok(Endpoint::Tcp(rest.to_string()));
        }
        if let Some(rest) = address.strip_prefix("udp://") {
            Self::require_host_port(address, rest)?;
            return Ok(Endpoint::Udp(rest.to_string()));
        }
        if let Some(rest) = address.strip_prefix("inproc://") {
            if rest.is_empty() {
                return Err(Error::InvalidEndpoint(address.to_string()));
            }
            return Ok(Endpoint::Inproc(rest.to_string()));
        }
        Err(Error::InvalidEndpoint(address.to_string()))
    }

    fn require_host_port(address: &str, rest: &str) -> Result<(), Error> {
        match rest.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
            _ => Err(Error::InvalidEndpoint(address.to_string())),
        }
    }

    /// Resolves a TCP endpoint to a socket address. Non-TCP endpoints are
    /// not routable on the data plane.
    pub fn to_tcp_addr(&self) -> Result<SocketAddr, Error> {
        match self {
            Endpoint::Tcp(host_port) => host_port
                .to_socket_addrs()
                .map_err(|error| Error::InvalidEndpoint(format!("{} ({})", self, error)))?
                .next()
                .ok_or_else(|| Error::InvalidEndpoint(self.to_string())),
            Endpoint::Udp(_) => Err(Error::InvalidEndpoint(format!(
                "{} (udp transport not implemented)",
                self
            ))),
            Endpoint::Inproc(_) => Err(Error::InvalidEndpoint(format!(
                "{} (inproc endpoints are not routable)",
                self
            ))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(rest) => write!(f, "tcp://{}", rest),
            Endpoint::Udp(rest) => write!(f, "udp://{}", rest),
            Endpoint::Inproc(rest) => write!(f, "inproc://{}", rest),
        }
    }
}
