//! The three-thread sanitizer process: a subscriber feeding a bounded
//! input queue, a checker running the detectors, and a publisher draining
//! the output queue. Bounded queues plus drop counting keep memory flat
//! when either side stalls.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use conduit::pubsub::{PacketCallback, Publisher, PublisherOptions, Subscriber, SubscriberOptions};
use conduit::queue::BoundedQueue;
use conduit::Error;
use strata::packet::Packet;
use strata::{logging, time};

use crate::config::ProgramOptions;
use crate::duplicate::{DuplicateDetector, ToleranceTable};
use crate::expired::ExpiredDetector;
use crate::future::FutureDetector;

const MAX_QUEUE_SIZE: usize = 256;
const SLEEP_TIME: Duration = Duration::from_millis(5);

/// The detectors in screening order: cheap predicates first.
struct Detectors {
    future: Option<FutureDetector>,
    expired: Option<ExpiredDetector>,
    duplicate: Option<DuplicateDetector>,
}

impl Detectors {
    fn allow(&self, packet: &Packet) -> bool {
        if let Some(future) = &self.future {
            if !future.allow(packet) {
                return false;
            }
        }
        if let Some(expired) = &self.expired {
            if !expired.allow(packet) {
                return false;
            }
        }
        if let Some(duplicate) = &self.duplicate {
            if !duplicate.allow(packet) {
                return false;
            }
        }
        true
    }
}

pub struct Pipeline {
    subscriber: Subscriber,
    publisher: Option<Publisher>,
    detectors: Option<Arc<Detectors>>,
    input_queue: Arc<BoundedQueue<Packet>>,
    output_queue: Arc<BoundedQueue<Packet>>,
    ingress_drops: Arc<AtomicI64>,
    keep_running: Arc<AtomicBool>,
    fatal: Arc<AtomicBool>,
    performance_interval_secs: i64,
    checker_thread: Option<thread::JoinHandle<()>>,
    publisher_thread: Option<thread::JoinHandle<()>>,
    log: logging::Logger,
}

impl Pipeline {
    pub fn new(options: &ProgramOptions, log: &logging::Logger) -> Result<Pipeline, Error> {
        let log = log.new(logging::o!("component" => "sanitizer"));

        let future = if options.maximum_future_time_millis >= 0 {
            logging::info!(log, "will test for future data");
            Some(FutureDetector::new(
                options.maximum_future_time_millis * 1_000,
                options.log_bad_data_interval_secs,
                &log,
            ))
        } else {
            None
        };
        let expired = if options.maximum_latency_secs > 0 {
            logging::info!(log, "will test for latent data";
                           "max_latency_secs" => options.maximum_latency_secs);
            Some(
                ExpiredDetector::new(
                    options.maximum_latency_secs * 1_000_000,
                    options.log_bad_data_interval_secs,
                    &log,
                )
                .map_err(Error::InvalidConfig)?,
            )
        } else {
            None
        };
        let duplicate = if options.circular_buffer_duration_secs > 0 {
            logging::info!(log, "will test for duplicate data");
            Some(
                DuplicateDetector::with_retention_duration(
                    options.circular_buffer_duration_secs,
                    ToleranceTable::default(),
                    options.log_bad_data_interval_secs,
                    &log,
                )
                .map_err(Error::InvalidConfig)?,
            )
        } else {
            None
        };

        let input_queue = Arc::new(BoundedQueue::new(MAX_QUEUE_SIZE));
        let output_queue = Arc::new(BoundedQueue::new(MAX_QUEUE_SIZE));
        let ingress_drops = Arc::new(AtomicI64::new(0));

        // Ingress: the subscriber's reader thread pushes into the input
        // queue; a full queue drops the packet and counts it.
        let callback_queue = Arc::clone(&input_queue);
        let callback_drops = Arc::clone(&ingress_drops);
        let callback: PacketCallback = Arc::new(move |packet| {
            if !callback_queue.try_enqueue(packet) {
                callback_drops.fetch_add(1, Ordering::Relaxed);
            }
        });

        let mut subscriber_options =
            SubscriberOptions::new(&options.input_broadcast_address, callback);
        subscriber_options.set_high_water_mark(options.receive_high_water_mark)?;
        subscriber_options.set_time_out_millis(options.receive_time_out_millis);
        let subscriber = Subscriber::new(subscriber_options, &log).map_err(|error| {
            Error::InvalidConfig(format!("Failed to initialize subscriber because {}", error))
        })?;

        let mut publisher_options = PublisherOptions::new(&options.output_broadcast_address);
        publisher_options.set_high_water_mark(options.send_high_water_mark)?;
        publisher_options.set_time_out_millis(options.send_time_out_millis);
        let publisher = Publisher::new(&publisher_options, &log).map_err(|error| {
            Error::InvalidConfig(format!("Failed to initialize publisher because {}", error))
        })?;

        Ok(Pipeline {
            subscriber,
            publisher: Some(publisher),
            detectors: Some(Arc::new(Detectors {
                future,
                expired,
                duplicate,
            })),
            input_queue,
            output_queue,
            ingress_drops,
            keep_running: Arc::new(AtomicBool::new(false)),
            fatal: Arc::new(AtomicBool::new(false)),
            performance_interval_secs: options.log_publishing_performance_interval_secs,
            checker_thread: None,
            publisher_thread: None,
            log,
        })
    }

    /// Starts the publisher, checker, and subscriber threads.
    pub fn start(&mut self) -> Result<(), Error> {
        self.stop();
        self.keep_running.store(true, Ordering::Relaxed);

        let publisher = self
            .publisher
            .take()
            .ok_or_else(|| Error::InvalidConfig("Pipeline cannot be restarted".to_string()))?;
        let detectors = Arc::clone(
            self.detectors
                .as_ref()
                .expect("Detectors must exist before start"),
        );

        self.publisher_thread = Some(spawn_publisher(
            publisher,
            Arc::clone(&self.output_queue),
            Arc::clone(&self.keep_running),
            Arc::clone(&self.fatal),
            self.performance_interval_secs,
            self.log.clone(),
        )?);
        self.checker_thread = Some(spawn_checker(
            detectors,
            Arc::clone(&self.input_queue),
            Arc::clone(&self.output_queue),
            Arc::clone(&self.ingress_drops),
            Arc::clone(&self.keep_running),
            self.performance_interval_secs,
            self.log.clone(),
        )?);
        self.subscriber.start()?;
        Ok(())
    }

    /// Flips the run flag and joins every thread.
    pub fn stop(&mut self) {
        self.keep_running.store(false, Ordering::Relaxed);
        self.subscriber.stop();
        if let Some(thread) = self.checker_thread.take() {
            let _ = thread.join();
        }
        if let Some(thread) = self.publisher_thread.take() {
            let _ = thread.join();
        }
    }

    /// False once an egress-fatal error has been recorded.
    pub fn is_healthy(&self) -> bool {
        !self.fatal.load(Ordering::Relaxed)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_checker(
    detectors: Arc<Detectors>,
    input_queue: Arc<BoundedQueue<Packet>>,
    output_queue: Arc<BoundedQueue<Packet>>,
    ingress_drops: Arc<AtomicI64>,
    keep_running: Arc<AtomicBool>,
    performance_interval_secs: i64,
    log: logging::Logger,
) -> Result<thread::JoinHandle<()>, Error> {
    thread::Builder::new()
        .name("sanitizer-checker".to_string())
        .spawn(move || {
            logging::debug!(log, "thread entering checkPackets");
            let mut last_log_time = time::timestamp_secs();
            let mut n_checked_packets: i64 = 0;
            let mut n_not_checked_packets: i64 = 0;

            while keep_running.load(Ordering::Relaxed) {
                let n_deleted = input_queue.drain_excess();
                if n_deleted > 0 {
                    logging::warn!(log, "overfull input queue";
                                   "deleted" => n_deleted);
                    n_not_checked_packets += n_deleted as i64;
                }
                n_not_checked_packets += ingress_drops.swap(0, Ordering::Relaxed);

                if let Some(packet) = input_queue.try_dequeue() {
                    if detectors.allow(&packet) && !output_queue.try_enqueue(packet) {
                        n_not_checked_packets += 1;
                    }
                    n_checked_packets += 1;
                } else {
                    thread::sleep(SLEEP_TIME);
                }

                let now_secs = time::timestamp_secs();
                if now_secs >= last_log_time + performance_interval_secs {
                    logging::info!(log, "checker throughput";
                                   "checked" => n_checked_packets,
                                   "failed_to_check" => n_not_checked_packets,
                                   "interval_secs" => performance_interval_secs);
                    n_checked_packets = 0;
                    n_not_checked_packets = 0;
                    last_log_time = now_secs;
                }
            }
            logging::debug!(log, "thread leaving checkPackets");
        })
        .map_err(Error::Io)
}

fn spawn_publisher(
    mut publisher: Publisher,
    output_queue: Arc<BoundedQueue<Packet>>,
    keep_running: Arc<AtomicBool>,
    fatal: Arc<AtomicBool>,
    performance_interval_secs: i64,
    log: logging::Logger,
) -> Result<thread::JoinHandle<()>, Error> {
    thread::Builder::new()
        .name("sanitizer-publisher".to_string())
        .spawn(move || {
            logging::debug!(log, "thread entering publishGoodPackets");
            let mut last_log_time = time::timestamp_secs();
            let mut n_sent_packets: i64 = 0;
            let mut n_not_sent_packets: i64 = 0;

            while keep_running.load(Ordering::Relaxed) {
                let n_deleted = output_queue.drain_excess();
                if n_deleted > 0 {
                    logging::warn!(log, "overfull publisher queue";
                                   "deleted" => n_deleted);
                    n_not_sent_packets += n_deleted as i64;
                }

                // Take a copy of the head so the queue lock is never held
                // across the send.
                let packet = output_queue.front(|front| front.cloned());
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
                    if !output_queue.pop() {
                        logging::warn!(log, "publisher queue appears to be empty");
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
            logging::debug!(log, "thread exiting publishGoodPackets");
        })
        .map_err(Error::Io)
}
