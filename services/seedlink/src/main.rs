//! The SEEDLink publisher scrapes miniSEED packets from a SEEDLink feed,
//! normalizes them into canonical data packets, and forwards them through
//! a bounded queue onto the broadcast proxy frontend.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Arg, Command};
use conduit::pubsub::{PacketCallback, Publisher, PublisherOptions};
use conduit::queue::BoundedQueue;
use conduit::Error;
use seedlink::client::Client;
use seedlink::config::{self, ProgramOptions};
use strata::interrupt::Interrupt;
use strata::packet::Packet;
use strata::{logging, time};

const ABOUT: &str = "\
The seedlink-publisher reads data packets from a SEEDLink server and \
forwards them to a data packet broadcast proxy.  Example usage:

    seedlink-publisher --ini=import.ini";

const MAX_QUEUE_SIZE: usize = 8192;
const SLEEP_TIME: Duration = Duration::from_millis(5);

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let matches = Command::new("seedlink-publisher")
        .about(ABOUT)
        .arg(
            Arg::new("ini")
                .long("ini")
                .value_name("FILE")
                .help("The initialization file for this executable"),
        )
        .get_matches();

    let mut ini_file = PathBuf::new();
    if let Some(path) = matches.get_one::<String>("ini") {
        ini_file = PathBuf::from(path);
        if !ini_file.exists() {
            eprintln!("Initialization file: {} does not exist", path);
            return 1;
        }
    }

    let options = match config::parse_ini_file(&ini_file) {
        Ok(options) => options,
        Err(error) => {
            eprintln!("{}", error);
            return 1;
        }
    };
    let log = logging::init(options.verbosity);

    let interrupt = match Interrupt::install() {
        Ok(interrupt) => interrupt,
        Err(error) => {
            eprintln!("Failed to install signal handlers: {}", error);
            return 1;
        }
    };

    let mut process = match Process::new(&options, &log) {
        Ok(process) => process,
        Err(error) => {
            eprintln!("Failed to create SEEDLink publisher because {}", error);
            return 1;
        }
    };
    process.start();

    logging::debug!(log, "main thread entering waiting loop");
    while !interrupt.is_set() && process.is_healthy() {
        thread::sleep(Duration::from_millis(50));
    }
    if interrupt.is_set() {
        logging::info!(log, "SIGINT/SIGTERM signal received!");
    }

    process.stop();
    if !process.is_healthy() {
        return 1;
    }
    0
}

/// The acquisition process: the SEEDLink client feeds the bounded queue
/// and one publisher thread drains it onto the proxy.
struct Process {
    client: Client,
    publisher: Option<Publisher>,
    queue: Arc<BoundedQueue<Packet>>,
    ingress_drops: Arc<AtomicI64>,
    keep_running: Arc<AtomicBool>,
    fatal: Arc<AtomicBool>,
    performance_interval_secs: i64,
    publisher_thread: Option<thread::JoinHandle<()>>,
    log: logging::Logger,
}

impl Process {
    fn new(options: &ProgramOptions, log: &logging::Logger) -> Result<Process, Error> {
        let queue = Arc::new(BoundedQueue::new(MAX_QUEUE_SIZE));
        let ingress_drops = Arc::new(AtomicI64::new(0));

        let callback_queue = Arc::clone(&queue);
        let callback_drops = Arc::clone(&ingress_drops);
        let callback: PacketCallback = Arc::new(move |packet| {
            if !callback_queue.try_enqueue(packet) {
                callback_drops.fetch_add(1, Ordering::Relaxed);
            }
        });

        let client = Client::new(callback, options.client.clone(), log);

        let mut publisher_options = PublisherOptions::new(&options.proxy_frontend_address);
        publisher_options.set_high_water_mark(options.send_high_water_mark)?;
        publisher_options.set_time_out_millis(options.send_time_out_millis);
        let publisher = Publisher::new(&publisher_options, log).map_err(|error| {
            Error::InvalidConfig(format!(
                "Failed to initialize publisher socket because {}",
                error
            ))
        })?;

        Ok(Process {
            client,
            publisher: Some(publisher),
            queue,
            ingress_drops,
            keep_running: Arc::new(AtomicBool::new(false)),
            fatal: Arc::new(AtomicBool::new(false)),
            performance_interval_secs: options.log_publishing_performance_interval_secs,
            publisher_thread: None,
            log: log.new(logging::o!("component" => "seedlink_publisher")),
        })
    }

    fn start(&mut self) {
        self.keep_running.store(true, Ordering::Relaxed);

        let publisher = self.publisher.take().expect("Publisher must exist");
        let queue = Arc::clone(&self.queue);
        let ingress_drops = Arc::clone(&self.ingress_drops);
        let keep_running = Arc::clone(&self.keep_running);
        let fatal = Arc::clone(&self.fatal);
        let performance_interval_secs = self.performance_interval_secs;
        let log = self.log.clone();

        self.publisher_thread = Some(
            thread::Builder::new()
                .name("seedlink-publisher".to_string())
                .spawn(move || {
                    publish_packets(
                        publisher,
                        queue,
                        ingress_drops,
                        keep_running,
                        fatal,
                        performance_interval_secs,
                        log,
                    )
                })
                .expect("Failed to spawn publisher thread"),
        );
        self.client.start();
    }

    fn stop(&mut self) {
        self.keep_running.store(false, Ordering::Relaxed);
        self.client.stop();
        if let Some(thread) = self.publisher_thread.take() {
            let _ = thread.join();
        }
    }

    fn is_healthy(&self) -> bool {
        !self.fatal.load(Ordering::Relaxed)
    }
}

fn publish_packets(
    mut publisher: Publisher,
    queue: Arc<BoundedQueue<Packet>>,
    ingress_drops: Arc<AtomicI64>,
    keep_running: Arc<AtomicBool>,
    fatal: Arc<AtomicBool>,
    performance_interval_secs: i64,
    log: logging::Logger,
) {
    logging::debug!(log, "thread entering publish loop");
    let mut last_log_time = time::timestamp_secs();
    let mut n_sent_packets: i64 = 0;
    let mut n_not_sent_packets: i64 = 0;

    while keep_running.load(Ordering::Relaxed) {
        let n_deleted = queue.drain_excess();
        if n_deleted > 0 {
            logging::warn!(log, "overfull packet queue"; "deleted" => n_deleted);
            n_not_sent_packets += n_deleted as i64;
        }
        n_not_sent_packets += ingress_drops.swap(0, Ordering::Relaxed);

        let packet = queue.front(|front| front.cloned());
        if let Some(packet) = packet {
            match publisher.send(&packet) {
                Ok(()) => n_sent_packets += 1,
                Err(Error::TransportClosed) => {
                    logging::error!(log, "publisher transport closed - stopping");
                    fatal.store(true, Ordering::Relaxed);
                    keep_running.store(false, Ordering::Relaxed);
                }
                Err(error) => {
                    logging::warn!(log, "failed to send message";
                                   "error" => error.to_string());
                    n_not_sent_packets += 1;
                }
            }
            if !queue.pop() {
                logging::warn!(log, "packet queue appears to be empty");
            }
        } else {
            thread::sleep(SLEEP_TIME);
        }

        let now_secs = time::timestamp_secs();
        if now_secs >= last_log_time + performance_interval_secs {
            logging::info!(log, "publisher throughput";
                           "sent" => n_sent_packets,
                           "failed_to_send" => n_not_sent_packets,
                           "interval_secs" => performance_interval_secs);
            n_sent_packets = 0;
            n_not_sent_packets = 0;
            last_log_time = now_secs;
        }
    }
    logging::debug!(log, "thread exiting publish loop");
}
