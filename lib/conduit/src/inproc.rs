//! In-process rendezvous sockets.
//!
//! A process-wide registry maps `inproc://` endpoint names to channel-backed
//! sockets: PAIR for the proxy's control/command plumbing and REQ/REP for
//! the authentication rendezvous. Binding claims a name; dropping the bound
//! socket releases it.

use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use hashbrown::HashMap;
use lazy_static::lazy_static;
use parking_lot::Mutex;

use crate::shared::Error;

/// A multi-frame inproc message.
pub type Multipart = Vec<Vec<u8>>;

enum Registration {
    /// Counterpart endpoints waiting for the single PAIR peer.
    Pair(Option<(Sender<Multipart>, Receiver<Multipart>)>),
    /// Fan-in request channel for a REP socket.
    Rep(Sender<(Multipart, Sender<Multipart>)>),
}

lazy_static! {
    static ref REGISTRY: Mutex<HashMap<String, Registration>> = Mutex::new(HashMap::new());
}

fn check_name(name: &str) -> Result<(), Error> {
    if !name.starts_with("inproc://") {
        return Err(Error::InvalidEndpoint(name.to_string()));
    }
    Ok(())
}

/// One half of a connected PAIR.
pub struct PairSocket {
    name: String,
    bound: bool,
    tx: Sender<Multipart>,
    rx: Receiver<Multipart>,
}

impl PairSocket {
    /// Claims the endpoint name and prepares the peer half for a single
    /// `connect`.
    pub fn bind(name: &str) -> Result<PairSocket, Error> {
        check_name(name)?;
        let mut registry = REGISTRY.lock();
        if registry.contains_key(name) {
            return Err(Error::InvalidEndpoint(format!("{} already bound", name)));
        }

        let (tx_a, rx_a) = unbounded();
        let (tx_b, rx_b) = unbounded();
        registry.insert(name.to_string(), Registration::Pair(Some((tx_a, rx_b))));
        Ok(PairSocket {
            name: name.to_string(),
            bound: true,
            tx: tx_b,
            rx: rx_a,
        })
    }

    /// Takes the peer half of a bound PAIR endpoint.
    pub fn connect(name: &str) -> Result<PairSocket, Error> {
        check_name(name)?;
        let mut registry = REGISTRY.lock();
        match registry.get_mut(name) {
            Some(Registration::Pair(slot)) => {
                let (tx, rx) = slot
                    .take()
                    .ok_or_else(|| Error::InvalidEndpoint(format!("{} already paired", name)))?;
                Ok(PairSocket {
                    name: name.to_string(),
                    bound: false,
                    tx,
                    rx,
                })
            }
            Some(_) => Err(Error::InvalidEndpoint(format!("{} is not a pair", name))),
            None => Err(Error::InvalidEndpoint(format!("{} is not bound", name))),
        }
    }

    pub fn send(&self, message: Multipart) -> Result<(), Error> {
        self.tx.send(message).map_err(|_| Error::TransportClosed)
    }

    pub fn try_recv(&self) -> Option<Multipart> {
        self.rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Multipart, Error> {
        self.rx.recv_timeout(timeout).map_err(|error| match error {
            RecvTimeoutError::Timeout => Error::ReceiveTimeout,
            RecvTimeoutError::Disconnected => Error::TransportClosed,
        })
    }

    #[inline]
    pub fn receiver(&self) -> &Receiver<Multipart> {
        &self.rx
    }
}

impl Drop for PairSocket {
    fn drop(&mut self) {
        if self.bound {
            REGISTRY.lock().remove(&self.name);
        }
    }
}

/// Reply-side rendezvous socket: receives `(request, reply_sender)` pairs.
pub struct RepSocket {
    name: String,
    rx: Receiver<(Multipart, Sender<Multipart>)>,
}

impl RepSocket {
    pub fn bind(name: &str) -> Result<RepSocket, Error> {
        check_name(name)?;
        let mut registry = REGISTRY.lock();
        if registry.contains_key(name) {
            return Err(Error::InvalidEndpoint(format!("{} already bound", name)));
        }

        let (tx, rx) = unbounded();
        registry.insert(name.to_string(), Registration::Rep(tx));
        Ok(RepSocket {
            name: name.to_string(),
            rx,
        })
    }

    #[inline]
    pub fn receiver(&self) -> &Receiver<(Multipart, Sender<Multipart>)> {
        &self.rx
    }
}

impl Drop for RepSocket {
    fn drop(&mut self) {
        REGISTRY.lock().remove(&self.name);
    }
}

/// Sends one request to a bound REP endpoint and waits for the reply.
pub fn request(name: &str, message: Multipart, timeout: Duration) -> Result<Multipart, Error> {
    check_name(name)?;
    let tx = {
        let registry = REGISTRY.lock();
        match registry.get(name) {
            Some(Registration::Rep(tx)) => tx.clone(),
            Some(_) => return Err(Error::InvalidEndpoint(format!("{} is not a rep", name))),
            None => return Err(Error::InvalidEndpoint(format!("{} is not bound", name))),
        }
    };

    let (reply_tx, reply_rx) = bounded(1);
    tx.send((message, reply_tx))
        .map_err(|_| Error::TransportClosed)?;
    reply_rx.recv_timeout(timeout).map_err(|error| match error {
        RecvTimeoutError::Timeout => Error::ReceiveTimeout,
        RecvTimeoutError::Disconnected => Error::TransportClosed,
    })
}

/// Whether an endpoint name is currently bound.
pub fn is_bound(name: &str) -> bool {
    REGISTRY.lock().contains_key(name)
}
