//! The steerable broadcast proxy.
//!
//! The frontend aggregates publishers (XSUB role) and the backend serves
//! subscribers (XPUB role): data flows front to back, filtered per
//! subscriber by topic prefix, and subscription interest flows back to
//! front so upstream publishers see it. A private inproc PAIR carries the
//! textual `PAUSE`/`RESUME`/`TERMINATE` commands into the proxy thread,
//! which multiplexes both listeners, every connection, and the control
//! socket in a single poll loop.
//!
//! Pausing stops reading the frontend so publishers feel back-pressure
//! instead of losing packets. Termination drops whatever is still queued
//! for slow subscribers (linger zero).

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use indexmap::IndexSet;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use strata::{logging, time};

use crate::auth::service::Service;
use crate::auth::zap::{ZapOptions, ZAP_ENDPOINT};
use crate::auth::Authenticate;
use crate::endpoint::Endpoint;
use crate::handshake::{authorize, status_message};
use crate::inproc::PairSocket;
use crate::shared::{Error, NetworkError};
use crate::wire::buffer::Buffer;
use crate::wire::frame::{Kind, Message};

static INSTANCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ProxyState {
    NotRunning,
    Running,
    Paused,
}

pub struct ProxyOptions {
    pub frontend_address: String,
    pub backend_address: String,
    /// Maximum queued messages per subscriber connection; 0 is unlimited.
    pub send_high_water_mark: usize,
    pub zap: ZapOptions,
    pub rendezvous: String,
}

impl ProxyOptions {
    pub fn new(frontend_address: &str, backend_address: &str) -> ProxyOptions {
        ProxyOptions {
            frontend_address: frontend_address.to_string(),
            backend_address: backend_address.to_string(),
            send_high_water_mark: 4096,
            zap: ZapOptions::grasslands_server(),
            rendezvous: ZAP_ENDPOINT.to_string(),
        }
    }
}

pub struct Proxy {
    options: ProxyOptions,
    control_address: String,
    command: PairSocket,
    control: Option<PairSocket>,
    service: Service,
    thread: Option<thread::JoinHandle<()>>,
    state: ProxyState,
    log: logging::Logger,
}

impl Proxy {
    pub fn new(
        options: ProxyOptions,
        authenticator: Arc<dyn Authenticate>,
        log: &logging::Logger,
    ) -> Result<Proxy, Error> {
        Endpoint::parse(&options.frontend_address)?.to_tcp_addr()?;
        Endpoint::parse(&options.backend_address)?.to_tcp_addr()?;
        if options.frontend_address == options.backend_address {
            return Err(Error::InvalidConfig(format!(
                "Frontend address {} cannot be the same as the backend address",
                options.frontend_address
            )));
        }
        options.zap.validate()?;
        if !options.zap.is_authentication_server() {
            return Err(Error::InvalidConfig(
                "Proxy data sockets require server-role handshake options".to_string(),
            ));
        }

        let log = log.new(logging::o!("component" => "xpubsub_proxy"));
        let (control_address, control, command) = Self::make_control_pair()?;
        logging::debug!(log, "created control socket pair";
                        "address" => control_address.as_str());
        let service = Service::with_rendezvous(authenticator, &options.rendezvous, &log)?;

        Ok(Proxy {
            options,
            control_address,
            command,
            control: Some(control),
            service,
            thread: None,
            state: ProxyState::NotRunning,
            log,
        })
    }

    fn make_control_pair() -> Result<(String, PairSocket, PairSocket), Error> {
        let control_address = format!(
            "inproc://{}_{:x}_xpubsub_proxy_control",
            time::timestamp_micros(),
            INSTANCE.fetch_add(1, Ordering::Relaxed)
        );
        let control = PairSocket::bind(&control_address)?;
        let command = PairSocket::connect(&control_address)?;
        Ok((control_address, control, command))
    }

    #[inline]
    pub fn state(&self) -> ProxyState {
        self.state
    }

    #[inline]
    pub fn control_address(&self) -> &str {
        &self.control_address
    }

    /// Whether the proxy thread is still serving traffic.
    pub fn is_alive(&self) -> bool {
        self.thread
            .as_ref()
            .map(|thread| !thread.is_finished())
            .unwrap_or(false)
    }

    /// Starts the handshake service, binds both data sockets, and launches
    /// the proxy thread. The handshake attach happens before bind so no
    /// unscreened peer can sneak in.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.state != ProxyState::NotRunning {
            return Ok(());
        }
        self.service.start()?;

        logging::info!(self.log, "binding frontend proxy socket";
                       "address" => self.options.frontend_address.as_str());
        let frontend = Self::bind_listener(&self.options.frontend_address)?;
        logging::info!(self.log, "binding backend proxy socket";
                       "address" => self.options.backend_address.as_str());
        let backend = Self::bind_listener(&self.options.backend_address)?;

        let control = self
            .control
            .take()
            .expect("Control socket must exist while not running");
        let core = ProxyCore::new(
            frontend,
            backend,
            control,
            self.options.send_high_water_mark,
            self.options.rendezvous.clone(),
            self.options.zap.domain().to_string(),
            self.log.clone(),
        )?;

        let thread = thread::Builder::new()
            .name("xpubsub-proxy".to_string())
            .spawn(move || core.run())
            .map_err(Error::Io)?;
        self.thread = Some(thread);
        self.state = ProxyState::Running;
        Ok(())
    }

    fn bind_listener(address: &str) -> Result<TcpListener, Error> {
        let addr = Endpoint::parse(address)?.to_tcp_addr()?;
        TcpListener::bind(addr)
            .map_err(|error| Error::InvalidConfig(format!("Failed to bind {}: {}", address, error)))
    }

    /// Pauses forwarding; publishers feel back-pressure instead of loss.
    pub fn pause(&mut self) {
        if self.state == ProxyState::Running {
            logging::info!(self.log, "pausing the proxy");
            if self.command.send(vec![b"PAUSE".to_vec()]).is_ok() {
                self.state = ProxyState::Paused;
            }
        }
    }

    /// Resumes forwarding after a pause.
    pub fn resume(&mut self) {
        if self.state == ProxyState::Paused {
            logging::info!(self.log, "resuming the proxy");
            if self.command.send(vec![b"RESUME".to_vec()]).is_ok() {
                self.state = ProxyState::Running;
            }
        }
    }

    /// Stops the handshake service, terminates the proxy thread, and joins
    /// it. Pending egress is dropped.
    pub fn stop(&mut self) {
        if self.state != ProxyState::NotRunning {
            logging::info!(self.log, "terminating the proxy");
            self.service.stop();
            let _ = self.command.send(vec![b"TERMINATE".to_vec()]);
            self.state = ProxyState::NotRunning;
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        if self.control.is_none() {
            // The old control pair died with the thread; rebuild it so the
            // proxy can be started again.
            match Self::make_control_pair() {
                Ok((control_address, control, command)) => {
                    self.control_address = control_address;
                    self.control = Some(control);
                    self.command = command;
                }
                Err(error) => {
                    logging::error!(self.log, "failed to rebuild control pair";
                                    "error" => error.to_string());
                }
            }
        }
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        self.stop();
    }
}

///------------------------------------------------------------------------///
///                             Proxy thread                               ///
///------------------------------------------------------------------------///

const FRONTEND_TOKEN: Token = Token(0);
const BACKEND_TOKEN: Token = Token(1);
const TOKEN_BASE: usize = 2;
const POLL_TIMEOUT: Duration = Duration::from_millis(5);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const CLOSING_LINGER: Duration = Duration::from_secs(1);
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Side {
    Frontend,
    Backend,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum ConnState {
    /// Waiting for the peer's hello.
    Handshake { since: Instant },
    Live,
    /// Denied; flush the status reply, then drop.
    Closing { since: Instant },
}

struct Connection {
    stream: TcpStream,
    side: Side,
    peer: String,
    state: ConnState,
    ingress: Buffer,
    egress: VecDeque<Vec<u8>>,
    egress_offset: usize,
    topics: Vec<Vec<u8>>,
    read_pending: bool,
    dropped: u64,
}

impl Connection {
    fn new(stream: TcpStream, side: Side, peer: String) -> Connection {
        Connection {
            stream,
            side,
            peer,
            state: ConnState::Handshake {
                since: Instant::now(),
            },
            ingress: Buffer::new(),
            egress: VecDeque::new(),
            egress_offset: 0,
            topics: Vec::new(),
            read_pending: false,
            dropped: 0,
        }
    }

    /// Queues an encoded message, honoring the high-water mark.
    fn enqueue(&mut self, encoded: Vec<u8>, high_water_mark: usize) {
        if high_water_mark > 0 && self.egress.len() >= high_water_mark {
            self.dropped += 1;
            return;
        }
        self.egress.push_back(encoded);
    }
}

struct ProxyCore {
    poll: Poll,
    events: Events,
    frontend: TcpListener,
    backend: TcpListener,
    control: PairSocket,
    conns: Vec<Option<Connection>>,
    free: Vec<usize>,
    live: IndexSet<usize>,
    high_water_mark: usize,
    rendezvous: String,
    domain: String,
    sequence: u64,
    paused: bool,
    housekeeping_time: Instant,
    log: logging::Logger,
}

impl ProxyCore {
    fn new(
        mut frontend: TcpListener,
        mut backend: TcpListener,
        control: PairSocket,
        high_water_mark: usize,
        rendezvous: String,
        domain: String,
        log: logging::Logger,
    ) -> Result<ProxyCore, Error> {
        let poll = Poll::new().map_err(Error::Io)?;
        poll.registry()
            .register(&mut frontend, FRONTEND_TOKEN, Interest::READABLE)
            .map_err(Error::Io)?;
        poll.registry()
            .register(&mut backend, BACKEND_TOKEN, Interest::READABLE)
            .map_err(Error::Io)?;

        Ok(ProxyCore {
            poll,
            events: Events::with_capacity(1024),
            frontend,
            backend,
            control,
            conns: Vec::new(),
            free: Vec::new(),
            live: IndexSet::new(),
            high_water_mark,
            rendezvous,
            domain,
            sequence: 0,
            paused: false,
            housekeeping_time: Instant::now(),
            log,
        })
    }

    fn run(mut self) {
        logging::debug!(self.log, "proxy thread entering multiplex loop");
        loop {
            if let Err(error) = self.poll.poll(&mut self.events, Some(POLL_TIMEOUT)) {
                if error.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                logging::error!(self.log, "poll failed - terminating proxy";
                                "error" => error.to_string());
                break;
            }

            let mut terminate = false;
            while let Some(command) = self.control.try_recv() {
                match command.first().map(|frame| frame.as_slice()) {
                    Some(b"PAUSE") => {
                        logging::info!(self.log, "proxy paused");
                        self.paused = true;
                    }
                    Some(b"RESUME") => {
                        logging::info!(self.log, "proxy resumed");
                        self.paused = false;
                    }
                    Some(b"TERMINATE") => {
                        terminate = true;
                    }
                    _ => logging::warn!(self.log, "unhandled proxy command"),
                }
            }
            if terminate {
                break;
            }

            let mut accept_frontend = false;
            let mut accept_backend = false;
            for event in self.events.iter() {
                match event.token() {
                    FRONTEND_TOKEN => accept_frontend = true,
                    BACKEND_TOKEN => accept_backend = true,
                    Token(index) if index >= TOKEN_BASE => {
                        let id = index - TOKEN_BASE;
                        if event.is_readable() {
                            if let Some(Some(conn)) = self.conns.get_mut(id) {
                                conn.read_pending = true;
                            }
                        }
                    }
                    Token(_) => (),
                }
            }
            if accept_frontend {
                self.accept(Side::Frontend);
            }
            if accept_backend {
                self.accept(Side::Backend);
            }

            self.process_reads();
            self.flush_all();

            if self.housekeeping_time.elapsed() >= HOUSEKEEPING_INTERVAL {
                self.housekeeping();
                self.housekeeping_time = Instant::now();
            }
        }
        // Linger zero: queued egress dies with the connections.
        logging::debug!(self.log, "proxy thread exiting");
    }

    fn accept(&mut self, side: Side) {
        loop {
            let accepted = match side {
                Side::Frontend => self.frontend.accept(),
                Side::Backend => self.backend.accept(),
            };
            match accepted {
                Ok((mut stream, addr)) => {
                    let id = match self.free.pop() {
                        Some(id) => id,
                        None => {
                            self.conns.push(None);
                            self.conns.len() - 1
                        }
                    };
                    let token = Token(TOKEN_BASE + id);
                    if let Err(error) = self.poll.registry().register(
                        &mut stream,
                        token,
                        Interest::READABLE | Interest::WRITABLE,
                    ) {
                        logging::warn!(self.log, "stream registration failed";
                                       "error" => error.to_string());
                        self.free.push(id);
                        continue;
                    }
                    let _ = stream.set_nodelay(true);
                    logging::debug!(self.log, "accepted connection";
                                    "side" => format!("{:?}", side),
                                    "peer" => addr.to_string());
                    self.conns[id] = Some(Connection::new(stream, side, addr.ip().to_string()));
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    logging::warn!(self.log, "failure accepting connection";
                                   "error" => error.to_string());
                    break;
                }
            }
        }
    }

    fn process_reads(&mut self) {
        for id in 0..self.conns.len() {
            let (pending, skip) = match self.conns[id].as_ref() {
                Some(conn) => (
                    conn.read_pending,
                    // Paused: leave live frontend data in the kernel so
                    // publishers block instead of losing packets.
                    self.paused && conn.side == Side::Frontend && conn.state == ConnState::Live
                        || !matches!(conn.state, ConnState::Handshake { .. } | ConnState::Live),
                ),
                None => (false, true),
            };
            if pending && !skip {
                self.service_connection(id);
            }
        }
    }

    fn service_connection(&mut self, id: usize) {
        let mut conn = match self.conns[id].take() {
            Some(conn) => conn,
            None => return,
        };

        let mut close = false;
        loop {
            match conn.ingress.ingress(&mut conn.stream) {
                Ok(0) => {
                    close = true;
                    break;
                }
                Ok(_) => (),
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    conn.read_pending = false;
                    break;
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => (),
                Err(_) => {
                    close = true;
                    break;
                }
            }
        }

        while !close {
            match Message::try_extract(&mut conn.ingress) {
                Ok(message) => {
                    if !self.handle_message(&mut conn, message) {
                        close = true;
                    }
                }
                Err(NetworkError::Wait) => break,
                Err(NetworkError::Fatal(_)) => {
                    logging::warn!(self.log, "dropping peer with corrupt stream";
                                   "peer" => conn.peer.as_str());
                    close = true;
                }
            }
        }

        if close {
            self.close(id, conn);
        } else {
            self.conns[id] = Some(conn);
        }
    }

    /// Returns false when the connection should be dropped.
    fn handle_message(&mut self, conn: &mut Connection, message: Message) -> bool {
        match conn.state {
            ConnState::Handshake { .. } => {
                if message.kind != Kind::Hello {
                    return false;
                }
                self.sequence += 1;
                let (status_code, status_text) = authorize(
                    &self.rendezvous,
                    &message,
                    &conn.peer,
                    &self.domain,
                    self.sequence,
                    &self.log,
                );
                conn.enqueue(status_message(status_code, &status_text).encode(), 0);
                if status_code == 200 {
                    conn.state = ConnState::Live;
                    logging::debug!(self.log, "peer admitted"; "peer" => conn.peer.as_str());
                } else {
                    conn.state = ConnState::Closing {
                        since: Instant::now(),
                    };
                }
                true
            }
            ConnState::Live => {
                match (conn.side, message.kind) {
                    (Side::Frontend, Kind::Data) => self.route_to_backend(message),
                    (Side::Backend, Kind::Subscribe) => {
                        if let Some(topic) = message.frames.first() {
                            if !conn.topics.contains(topic) {
                                conn.topics.push(topic.clone());
                            }
                        }
                        self.forward_to_frontend(message);
                    }
                    (Side::Backend, Kind::Unsubscribe) => {
                        if let Some(topic) = message.frames.first() {
                            conn.topics.retain(|t| t != topic);
                        }
                        self.forward_to_frontend(message);
                    }
                    // Everything else on a live socket is noise.
                    _ => (),
                }
                true
            }
            ConnState::Closing { .. } => true,
        }
    }

    fn route_to_backend(&mut self, message: Message) {
        if message.frames.len() != 2 {
            logging::warn!(self.log, "dropping data message without two frames");
            return;
        }
        let topic = message.frames[0].clone();
        let encoded = message.encode();
        let high_water_mark = self.high_water_mark;
        for &id in self.live.iter() {
            if let Some(Some(conn)) = self.conns.get_mut(id) {
                if conn.side == Side::Backend
                    && conn.topics.iter().any(|t| topic.starts_with(t.as_slice()))
                {
                    conn.enqueue(encoded.clone(), high_water_mark);
                }
            }
        }
    }

    /// Subscription interest propagates upstream so publishers see it.
    fn forward_to_frontend(&mut self, message: Message) {
        let encoded = message.encode();
        let high_water_mark = self.high_water_mark;
        for &id in self.live.iter() {
            if let Some(Some(conn)) = self.conns.get_mut(id) {
                if conn.side == Side::Frontend {
                    conn.enqueue(encoded.clone(), high_water_mark);
                }
            }
        }
    }

    fn flush_all(&mut self) {
        for id in 0..self.conns.len() {
            let needs_flush = match self.conns[id].as_ref() {
                Some(conn) => {
                    !conn.egress.is_empty() || matches!(conn.state, ConnState::Closing { .. })
                }
                None => false,
            };
            if !needs_flush {
                continue;
            }

            let mut conn = self.conns[id].take().unwrap();
            let mut close = false;
            loop {
                let (front_length, written) = match conn.egress.front() {
                    Some(front) => (front.len(), conn.stream.write(&front[conn.egress_offset..])),
                    None => {
                        if matches!(conn.state, ConnState::Closing { .. }) {
                            close = true;
                        }
                        break;
                    }
                };
                match written {
                    Ok(0) => {
                        close = true;
                        break;
                    }
                    Ok(count) => {
                        conn.egress_offset += count;
                        if conn.egress_offset == front_length {
                            conn.egress.pop_front();
                            conn.egress_offset = 0;
                        }
                    }
                    Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                    Err(error) if error.kind() == io::ErrorKind::Interrupted => (),
                    Err(_) => {
                        close = true;
                        break;
                    }
                }
            }

            // A freshly admitted peer joins the live set once its status
            // reply is on the wire.
            if !close && conn.state == ConnState::Live {
                self.live.insert(id);
            }

            if close {
                self.close(id, conn);
            } else {
                self.conns[id] = Some(conn);
            }
        }
    }

    fn housekeeping(&mut self) {
        for id in 0..self.conns.len() {
            let expired = match self.conns[id].as_ref() {
                Some(conn) => match conn.state {
                    ConnState::Handshake { since } => since.elapsed() >= HANDSHAKE_TIMEOUT,
                    ConnState::Closing { since } => since.elapsed() >= CLOSING_LINGER,
                    ConnState::Live => false,
                },
                None => false,
            };
            if expired {
                let conn = self.conns[id].take().unwrap();
                logging::debug!(self.log, "reaping stalled connection";
                                "peer" => conn.peer.as_str());
                self.close(id, conn);
            }
        }

        let mut dropped: u64 = 0;
        for conn in self.conns.iter_mut().flatten() {
            dropped += conn.dropped;
            conn.dropped = 0;
        }
        if dropped > 0 {
            logging::warn!(self.log, "dropped messages for slow subscribers";
                           "count" => dropped);
        }
    }

    fn close(&mut self, id: usize, mut conn: Connection) {
        let _ = self.poll.registry().deregister(&mut conn.stream);
        self.live.swap_remove(&id);
        self.free.push(id);
        logging::debug!(self.log, "closed connection"; "peer" => conn.peer.as_str());
    }
}
