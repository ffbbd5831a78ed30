//! The packet subscriber: a connecting data socket with a background reader
//! thread that decodes two-frame messages and hands packets to a callback.

use std::net::{Shutdown, TcpStream};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hashbrown::HashSet;
use strata::packet::{Packet, MESSAGE_TYPE};
use strata::{logging, time};

use crate::auth::zap::ZapOptions;
use crate::endpoint::Endpoint;
use crate::handshake::client_handshake;
use crate::shared::Error;
use crate::wire::buffer::Buffer;
use crate::wire::frame::{Kind, Message};
use crate::wire::{read_message, write_message};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub type PacketCallback = Arc<dyn Fn(Packet) + Send + Sync + 'static>;

#[derive(Clone)]
pub struct SubscriberOptions {
    endpoint: String,
    high_water_mark: i32,
    time_out_millis: i64,
    logging_interval_secs: i64,
    callback: PacketCallback,
    zap: ZapOptions,
}

impl SubscriberOptions {
    pub fn new(endpoint: &str, callback: PacketCallback) -> SubscriberOptions {
        SubscriberOptions {
            endpoint: endpoint.to_string(),
            high_water_mark: 4096,
            time_out_millis: 10,
            logging_interval_secs: -1,
            callback,
            zap: ZapOptions::default(),
        }
    }

    pub fn set_high_water_mark(&mut self, high_water_mark: i32) -> Result<(), Error> {
        if high_water_mark < 0 {
            return Err(Error::InvalidConfig(
                "High water mark cannot be negative".to_string(),
            ));
        }
        self.high_water_mark = high_water_mark;
        Ok(())
    }

    /// Maximum time one receive may wait; negative waits forever.
    pub fn set_time_out_millis(&mut self, time_out_millis: i64) {
        self.time_out_millis = time_out_millis;
    }

    /// Cadence of the received/not-propagated report; negative disables it.
    pub fn set_logging_interval_secs(&mut self, interval: i64) {
        self.logging_interval_secs = interval;
    }

    pub fn set_zap_options(&mut self, zap: ZapOptions) {
        self.zap = zap;
    }

    #[inline]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[inline]
    pub fn time_out_millis(&self) -> i64 {
        self.time_out_millis
    }
}

pub struct Subscriber {
    stream: TcpStream,
    options: SubscriberOptions,
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
    log: logging::Logger,
}

impl Subscriber {
    /// Connects, completes the handshake, and registers interest in every
    /// recognized message type.
    pub fn new(options: SubscriberOptions, log: &logging::Logger) -> Result<Subscriber, Error> {
        let log = log.new(logging::o!("component" => "packet_subscriber"));
        let addr = Endpoint::parse(options.endpoint())?.to_tcp_addr()?;

        logging::info!(log, "subscriber connecting"; "endpoint" => options.endpoint());
        let mut stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
            .map_err(|error| Error::InvalidConfig(format!(
                "Failed to connect subscriber to {}: {}",
                options.endpoint(),
                error
            )))?;
        stream.set_nodelay(true)?;

        client_handshake(&mut stream, &options.zap)?;

        if options.time_out_millis() < 0 {
            logging::warn!(log, "subscriber may wait indefinitely for a message");
            stream.set_read_timeout(None)?;
        } else {
            let millis = options.time_out_millis().max(1) as u64;
            stream.set_read_timeout(Some(Duration::from_millis(millis)))?;
        }

        for message_type in recognized_message_types() {
            let subscribe = Message::new(Kind::Subscribe, vec![message_type]);
            write_message(&mut stream, &subscribe)?;
        }

        Ok(Subscriber {
            stream,
            options,
            keep_running: Arc::new(AtomicBool::new(false)),
            thread: None,
            log,
        })
    }

    /// Spawns the reader thread.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.thread.is_some() {
            return Ok(());
        }
        let stream = self.stream.try_clone().map_err(Error::Io)?;
        self.keep_running.store(true, Ordering::Relaxed);

        let keep_running = Arc::clone(&self.keep_running);
        let callback = Arc::clone(&self.options.callback);
        let logging_interval = self.options.logging_interval_secs;
        let log = self.log.clone();
        let thread = thread::Builder::new()
            .name("packet-subscriber".to_string())
            .spawn(move || run_listener(stream, callback, keep_running, logging_interval, log))
            .map_err(Error::Io)?;
        self.thread = Some(thread);
        Ok(())
    }

    /// Signals the reader thread and joins it.
    pub fn stop(&mut self) {
        self.keep_running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = self.stream.shutdown(Shutdown::Both);
            let _ = thread.join();
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.stop();
    }
}

fn recognized_message_types() -> Vec<Vec<u8>> {
    vec![MESSAGE_TYPE.as_bytes().to_vec()]
}

fn run_listener(
    mut stream: TcpStream,
    callback: PacketCallback,
    keep_running: Arc<AtomicBool>,
    logging_interval_secs: i64,
    log: logging::Logger,
) {
    logging::debug!(log, "thread entering listener");
    let recognized: HashSet<Vec<u8>> = recognized_message_types().into_iter().collect();
    let do_logging = logging_interval_secs >= 0;
    let mut buffer = Buffer::new();
    let mut last_log_time = time::timestamp_secs();
    let mut n_received_messages: i64 = 0;
    let mut n_not_propagated_messages: i64 = 0;

    while keep_running.load(Ordering::Relaxed) {
        match read_message(&mut stream, &mut buffer) {
            Ok(message) => {
                if message.kind != Kind::Data {
                    continue;
                }
                n_received_messages += 1;
                if message.frames.len() != 2 {
                    logging::warn!(log, "only two-part messages are handled");
                    n_not_propagated_messages += 1;
                } else if !recognized.contains(&message.frames[0]) {
                    logging::warn!(log, "unhandled message type";
                                   "type" => String::from_utf8_lossy(&message.frames[0])
                                             .to_string());
                    n_not_propagated_messages += 1;
                } else {
                    match Packet::deserialize(&message.frames[1]) {
                        Ok(packet) => {
                            let outcome =
                                catch_unwind(AssertUnwindSafe(|| (callback.as_ref())(packet)));
                            if outcome.is_err() {
                                logging::warn!(log, "packet callback panicked");
                            }
                        }
                        Err(error) => {
                            logging::warn!(log, "failed getting packet from wire";
                                           "error" => error.to_string());
                            n_not_propagated_messages += 1;
                        }
                    }
                }
            }
            Err(Error::ReceiveTimeout) => (),
            Err(Error::TransportClosed) => {
                logging::warn!(log, "subscriber transport closed");
                break;
            }
            Err(error) => {
                // Framing corruption desynchronizes the stream.
                logging::error!(log, "unrecoverable subscriber stream";
                                "error" => error.to_string());
                break;
            }
        }

        if do_logging {
            let now_secs = time::timestamp_secs();
            if now_secs >= last_log_time + logging_interval_secs {
                logging::info!(log, "subscriber throughput";
                               "received" => n_received_messages,
                               "not_propagated" => n_not_propagated_messages,
                               "interval_secs" => logging_interval_secs);
                n_received_messages = 0;
                n_not_propagated_messages = 0;
                last_log_time = now_secs;
            }
        }
    }
    logging::debug!(log, "thread leaving listener");
}
