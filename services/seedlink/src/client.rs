//! A SEEDLink client that scrapes miniSEED records off a feed and hands
//! canonical packets to a callback.
//!
//! The reader thread owns the connection: it negotiates the session
//! (HELLO, per-station STATION/SELECT/DATA, END), then consumes the
//! `SL`-framed record stream, decoding each record and pushing the result
//! through the callback. Dropped connections and idle feeds reconnect
//! after a delay, resuming from the persisted sequence numbers.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use conduit::pubsub::PacketCallback;
use strata::logging;

use crate::mseed;
use crate::selector::StreamSelector;
use crate::state::StateFile;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_TIMEOUT: Duration = Duration::from_millis(500);
const HEADER_LENGTH: usize = 8;

#[derive(Clone)]
pub struct ClientOptions {
    address: String,
    port: u16,
    state_file: Option<PathBuf>,
    state_file_update_interval: u32,
    record_size: usize,
    network_time_out_secs: u64,
    network_reconnect_delay_secs: u64,
    selectors: Vec<StreamSelector>,
}

impl Default for ClientOptions {
    fn default() -> ClientOptions {
        ClientOptions {
            address: "rtserve.iris.washington.edu".to_string(),
            port: 18000,
            state_file: None,
            state_file_update_interval: 100,
            record_size: 512,
            network_time_out_secs: 600,
            network_reconnect_delay_secs: 30,
            selectors: Vec::new(),
        }
    }
}

impl ClientOptions {
    pub fn set_address(&mut self, address: &str) -> Result<(), String> {
        if address.is_empty() {
            return Err("Address is empty".to_string());
        }
        self.address = address.to_string();
        Ok(())
    }

    #[inline]
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Enables sequence persistence, creating the parent directory when it
    /// does not exist yet.
    pub fn set_state_file(&mut self, state_file: &str) -> Result<(), String> {
        if state_file.is_empty() {
            self.state_file = None;
            return Ok(());
        }
        let path = Path::new(state_file);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|error| format!("Failed to create state file path: {}", error))?;
            }
        }
        self.state_file = Some(path.to_path_buf());
        Ok(())
    }

    #[inline]
    pub fn state_file(&self) -> Option<&Path> {
        self.state_file.as_deref()
    }

    pub fn set_state_file_update_interval(&mut self, interval: u32) {
        self.state_file_update_interval = interval;
    }

    pub fn set_record_size(&mut self, record_size: usize) -> Result<(), String> {
        if !matches!(record_size, 128 | 256 | 512) {
            return Err(format!(
                "Record size {} is invalid.  Can only use 128, 256, or 512",
                record_size
            ));
        }
        self.record_size = record_size;
        Ok(())
    }

    #[inline]
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn set_network_time_out_secs(&mut self, time_out_secs: u64) {
        self.network_time_out_secs = time_out_secs;
    }

    pub fn set_network_reconnect_delay_secs(&mut self, delay_secs: u64) {
        self.network_reconnect_delay_secs = delay_secs;
    }

    /// Registers a stream selector; duplicates are rejected.
    pub fn add_stream_selector(&mut self, selector: StreamSelector) -> Result<(), String> {
        if !selector.have_network() {
            return Err("Network not set".to_string());
        }
        for existing in &self.selectors {
            if existing.network() == selector.network()
                && existing.station() == selector.station()
                && existing.selector() == selector.selector()
            {
                return Err("Duplicate selector".to_string());
            }
        }
        self.selectors.push(selector);
        Ok(())
    }

    #[inline]
    pub fn stream_selectors(&self) -> &[StreamSelector] {
        &self.selectors
    }
}

pub struct Client {
    options: ClientOptions,
    callback: PacketCallback,
    keep_running: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    current_stream: Arc<Mutex<Option<TcpStream>>>,
    thread: Option<thread::JoinHandle<()>>,
    log: logging::Logger,
}

impl Client {
    pub fn new(callback: PacketCallback, options: ClientOptions, log: &logging::Logger) -> Client {
        Client {
            options,
            callback,
            keep_running: Arc::new(AtomicBool::new(false)),
            connected: Arc::new(AtomicBool::new(false)),
            current_stream: Arc::new(Mutex::new(None)),
            thread: None,
            log: log.new(logging::o!("component" => "seedlink_client")),
        }
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Launches the polling thread.
    pub fn start(&mut self) {
        self.stop();
        self.keep_running.store(true, Ordering::Relaxed);

        let session = SessionRunner {
            options: self.options.clone(),
            callback: Arc::clone(&self.callback),
            keep_running: Arc::clone(&self.keep_running),
            connected: Arc::clone(&self.connected),
            current_stream: Arc::clone(&self.current_stream),
            log: self.log.clone(),
        };
        logging::debug!(self.log, "starting the SEEDLink polling thread");
        self.thread = Some(
            thread::Builder::new()
                .name("seedlink-reader".to_string())
                .spawn(move || session.run())
                .expect("Failed to spawn SEEDLink reader"),
        );
    }

    /// Flags the loop down, terminates the transport, and joins.
    pub fn stop(&mut self) {
        if self.keep_running.swap(false, Ordering::Relaxed) {
            logging::debug!(self.log, "issuing terminate command");
        }
        if let Some(stream) = self.current_stream.lock().unwrap().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.stop();
    }
}

struct SessionRunner {
    options: ClientOptions,
    callback: PacketCallback,
    keep_running: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    current_stream: Arc<Mutex<Option<TcpStream>>>,
    log: logging::Logger,
}

enum SessionEnd {
    Terminated,
    Disconnected(String),
}

impl SessionRunner {
    fn run(self) {
        let mut state = StateFile::new(self.options.state_file());
        if state.is_persistent() {
            match state.recover() {
                Ok(count) => {
                    logging::info!(self.log, "recovered sequence state"; "stations" => count)
                }
                Err(error) => logging::warn!(self.log, "failed to recover state";
                                             "error" => error.to_string()),
            }
        }

        while self.keep_running.load(Ordering::Relaxed) {
            match self.run_session(&mut state) {
                Ok(SessionEnd::Terminated) => break,
                Ok(SessionEnd::Disconnected(reason)) => {
                    logging::warn!(self.log, "SEEDLink session ended"; "reason" => reason);
                }
                Err(reason) => {
                    logging::warn!(self.log, "SEEDLink connection failed"; "reason" => reason);
                }
            }
            self.connected.store(false, Ordering::Relaxed);
            if state.is_persistent() {
                logging::debug!(self.log, "saving state prior to reconnect");
                if let Err(error) = state.save() {
                    logging::warn!(self.log, "failed to save state";
                                   "error" => error.to_string());
                }
            }
            self.sleep_before_reconnect();
        }

        self.connected.store(false, Ordering::Relaxed);
        if state.is_persistent() {
            if let Err(error) = state.save() {
                logging::warn!(self.log, "failed to save state"; "error" => error.to_string());
            }
        }
        logging::info!(self.log, "thread leaving SEEDLink polling loop");
    }

    fn sleep_before_reconnect(&self) {
        let deadline = Instant::now()
            + Duration::from_secs(self.options.network_reconnect_delay_secs.max(1));
        while self.keep_running.load(Ordering::Relaxed) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
    }

    fn connect(&self) -> Result<TcpStream, String> {
        let server = format!("{}:{}", self.options.address(), self.options.port());
        logging::info!(self.log, "connecting to SEEDLink server"; "server" => server.as_str());

        let addrs: Vec<SocketAddr> = server
            .to_socket_addrs()
            .map_err(|error| format!("Failed to resolve {}: {}", server, error))?
            .collect();
        let addr = addrs
            .first()
            .ok_or_else(|| format!("No addresses for {}", server))?;

        let stream = TcpStream::connect_timeout(addr, CONNECT_TIMEOUT)
            .map_err(|error| format!("Failed to connect to {}: {}", server, error))?;
        stream.set_nodelay(true).ok();
        stream
            .set_read_timeout(Some(POLL_TIMEOUT))
            .map_err(|error| error.to_string())?;
        stream
            .set_write_timeout(Some(COMMAND_TIMEOUT))
            .map_err(|error| error.to_string())?;
        Ok(stream)
    }

    fn run_session(&self, state: &mut StateFile) -> Result<SessionEnd, String> {
        let mut stream = self.connect()?;
        *self.current_stream.lock().unwrap() = Some(
            stream
                .try_clone()
                .map_err(|error| format!("Failed to clone stream: {}", error))?,
        );

        self.configure(&mut stream, state)?;
        self.connected.store(true, Ordering::Relaxed);
        let end = self.stream_records(&mut stream, state);
        self.current_stream.lock().unwrap().take();
        end
    }

    /// Negotiates the session: HELLO, the configured stations and
    /// selectors (or uni-station mode when none), then END.
    fn configure(&self, stream: &mut TcpStream, state: &StateFile) -> Result<(), String> {
        send_command(stream, "HELLO")?;
        let server_id = read_line(stream, &self.keep_running)?;
        let organization = read_line(stream, &self.keep_running)?;
        logging::info!(self.log, "connected to SEEDLink server";
                       "server" => server_id, "organization" => organization);

        if self.options.stream_selectors().is_empty() {
            // Uni-station mode.
            send_command(stream, "DATA")?;
            expect_ok(stream, &self.keep_running, "DATA")?;
            return Ok(());
        }

        for selector in self.options.stream_selectors() {
            logging::info!(self.log, "adding stream";
                           "station" => selector.station_id(),
                           "selector" => selector.selector());
            send_command(
                stream,
                &format!("STATION {} {}", selector.station(), selector.network()),
            )?;
            if expect_ok(stream, &self.keep_running, "STATION").is_err() {
                logging::warn!(self.log, "could not add station";
                               "station" => selector.station_id());
                continue;
            }

            let pattern = selector.selector();
            if !pattern.is_empty() {
                send_command(stream, &format!("SELECT {}", pattern))?;
                if expect_ok(stream, &self.keep_running, "SELECT").is_err() {
                    logging::warn!(self.log, "could not add selector"; "selector" => pattern);
                }
            }

            // Resume one past the last persisted record for this station.
            match state.sequence(selector.network(), selector.station()) {
                Some(sequence) => {
                    send_command(stream, &format!("DATA {:06X}", (sequence + 1) & 0xff_ffff))?
                }
                None => send_command(stream, "DATA")?,
            }
            expect_ok(stream, &self.keep_running, "DATA")?;
        }

        send_command(stream, "END")?;
        Ok(())
    }

    fn stream_records(
        &self,
        stream: &mut TcpStream,
        state: &mut StateFile,
    ) -> Result<SessionEnd, String> {
        let idle_timeout = Duration::from_secs(self.options.network_time_out_secs);
        let mut header = [0u8; HEADER_LENGTH];
        let mut header_fill = 0usize;
        let mut payload = vec![0u8; self.options.record_size()];
        let mut last_data = Instant::now();
        let mut records_until_save = self.options.state_file_update_interval;

        loop {
            if !self.keep_running.load(Ordering::Relaxed) {
                return Ok(SessionEnd::Terminated);
            }
            match stream.read(&mut header[header_fill..]) {
                Ok(0) => return Ok(SessionEnd::Disconnected("peer closed".to_string())),
                Ok(count) => header_fill += count,
                Err(error) if is_timeout(&error) => {
                    if self.options.network_time_out_secs > 0 && last_data.elapsed() > idle_timeout
                    {
                        return Ok(SessionEnd::Disconnected("idle time-out".to_string()));
                    }
                    continue;
                }
                Err(error) => return Ok(SessionEnd::Disconnected(error.to_string())),
            }
            if header_fill < HEADER_LENGTH {
                continue;
            }
            header_fill = 0;
            last_data = Instant::now();

            if &header[..6] == b"SLINFO" {
                // INFO responses ride in full records; skip them.
                self.read_payload(stream, &mut payload)?;
                continue;
            }
            if &header[..2] != b"SL" {
                if header.starts_with(b"ERROR") {
                    return Ok(SessionEnd::Disconnected("server error".to_string()));
                }
                return Ok(SessionEnd::Disconnected(
                    "lost SEEDLink framing".to_string(),
                ));
            }

            let sequence = parse_sequence(&header[2..HEADER_LENGTH])
                .ok_or_else(|| "unreadable sequence number".to_string())?;
            self.read_payload(stream, &mut payload)?;

            match mseed::decode_records(&payload) {
                Ok(packets) => {
                    if packets.len() > 1 {
                        logging::warn!(self.log, "multiple mseed packets received");
                    } else if packets.is_empty() {
                        logging::warn!(self.log, "no mseed packets unpacked");
                    }
                    for packet in packets {
                        state.update(packet.network(), packet.station(), sequence);
                        let callback = self.callback.as_ref();
                        if catch_unwind(AssertUnwindSafe(|| callback(packet))).is_err() {
                            logging::warn!(self.log, "failed to propagate packet");
                        }
                    }
                }
                Err(error) => {
                    logging::warn!(self.log, "skipping packet - unpacking failed";
                                   "error" => error.to_string());
                }
            }

            if state.is_persistent() {
                if records_until_save == 0 {
                    if let Err(error) = state.save() {
                        logging::warn!(self.log, "failed to save state";
                                       "error" => error.to_string());
                    }
                    records_until_save = self.options.state_file_update_interval;
                } else {
                    records_until_save -= 1;
                }
            }
        }
    }

    /// Fills the record buffer, tolerating poll timeouts while the run
    /// flag stays up.
    fn read_payload(&self, stream: &mut TcpStream, payload: &mut [u8]) -> Result<(), String> {
        let mut filled = 0usize;
        while filled < payload.len() {
            if !self.keep_running.load(Ordering::Relaxed) {
                return Err("terminated mid-record".to_string());
            }
            match stream.read(&mut payload[filled..]) {
                Ok(0) => return Err("peer closed mid-record".to_string()),
                Ok(count) => filled += count,
                Err(error) if is_timeout(&error) => continue,
                Err(error) => return Err(error.to_string()),
            }
        }
        Ok(())
    }
}

#[inline]
fn is_timeout(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

fn send_command(stream: &mut TcpStream, command: &str) -> Result<(), String> {
    stream
        .write_all(format!("{}\r\n", command).as_bytes())
        .map_err(|error| format!("Failed to send {}: {}", command, error))
}

fn read_line(stream: &mut TcpStream, keep_running: &AtomicBool) -> Result<String, String> {
    let deadline = Instant::now() + COMMAND_TIMEOUT;
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if !keep_running.load(Ordering::Relaxed) {
            return Err("terminated".to_string());
        }
        if Instant::now() > deadline {
            return Err("command response timed out".to_string());
        }
        match stream.read(&mut byte) {
            Ok(0) => return Err("peer closed".to_string()),
            Ok(_) => {
                if byte[0] == b'\n' {
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    return Ok(String::from_utf8_lossy(&line).to_string());
                }
                line.push(byte[0]);
            }
            Err(error) if is_timeout(&error) => continue,
            Err(error) => return Err(error.to_string()),
        }
    }
}

fn expect_ok(
    stream: &mut TcpStream,
    keep_running: &AtomicBool,
    command: &str,
) -> Result<(), String> {
    let line = read_line(stream, keep_running)?;
    if line.starts_with("OK") {
        Ok(())
    } else {
        Err(format!("{} refused: {}", command, line))
    }
}

/// The six hex digits after the `SL` signature.
fn parse_sequence(digits: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(digits).ok()?;
    u64::from_str_radix(text.trim(), 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sequence() {
        assert_eq!(parse_sequence(b"0001A2"), Some(0x1a2));
        assert_eq!(parse_sequence(b"FFFFFF"), Some(0xff_ffff));
        assert_eq!(parse_sequence(b"zzzzzz"), None);
    }

    #[test]
    fn test_options_validation() {
        let mut options = ClientOptions::default();
        assert!(options.set_address("").is_err());
        assert!(options.set_record_size(100).is_err());
        options.set_record_size(256).unwrap();
        assert_eq!(options.record_size(), 256);
    }

    #[test]
    fn test_duplicate_selectors_rejected() {
        let mut options = ClientOptions::default();
        let mut selector = StreamSelector::new();
        selector.set_network("UU").unwrap();
        selector.set_station("FORK").unwrap();
        options.add_stream_selector(selector.clone()).unwrap();
        assert!(options.add_stream_selector(selector).is_err());
    }

    #[test]
    fn test_selector_requires_network() {
        let mut options = ClientOptions::default();
        assert!(options.add_stream_selector(StreamSelector::new()).is_err());
    }
}
