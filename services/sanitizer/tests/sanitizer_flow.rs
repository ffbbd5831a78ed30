//! Whole-pipeline flow: raw broadcast -> sanitizer -> sanitized broadcast.
//! Anomalous packets disappear and per-channel order of the survivors is
//! the arrival order.

use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use conduit::auth::policies::Grasslands;
use conduit::proxy::{Proxy, ProxyOptions};
use conduit::pubsub::{PacketCallback, Publisher, PublisherOptions, Subscriber, SubscriberOptions};
use sanitizer::config::ProgramOptions;
use sanitizer::pipeline::Pipeline;
use strata::packet::Packet;
use strata::{logging, time};

fn free_tcp_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    format!("tcp://127.0.0.1:{}", port)
}

fn make_packet(station: &str, start_time_micros: i64) -> Packet {
    let mut packet = Packet::new();
    packet.set_network("UU").unwrap();
    packet.set_station(station).unwrap();
    packet.set_channel("HHZ").unwrap();
    packet.set_location_code("01").unwrap();
    packet.set_sampling_rate(100.0).unwrap();
    packet.set_start_time_micros(start_time_micros);
    packet.set_data_i32(vec![0; 10]);
    packet
}

#[test]
fn test_sanitizer_screens_and_preserves_order() {
    let log = logging::discard();

    let raw_frontend = free_tcp_endpoint();
    let raw_backend = free_tcp_endpoint();
    let clean_frontend = free_tcp_endpoint();
    let clean_backend = free_tcp_endpoint();

    let mut raw_options = ProxyOptions::new(&raw_frontend, &raw_backend);
    raw_options.rendezvous = "inproc://test_sanitizer_flow_raw_zap".to_string();
    let mut raw_proxy = Proxy::new(raw_options, Arc::new(Grasslands::new(&log)), &log).unwrap();
    raw_proxy.start().unwrap();

    let mut clean_options = ProxyOptions::new(&clean_frontend, &clean_backend);
    clean_options.rendezvous = "inproc://test_sanitizer_flow_clean_zap".to_string();
    let mut clean_proxy =
        Proxy::new(clean_options, Arc::new(Grasslands::new(&log)), &log).unwrap();
    clean_proxy.start().unwrap();

    // Sink subscriber on the sanitized broadcast.
    let received = Arc::new(Mutex::new(Vec::<(String, i64)>::new()));
    let sink = Arc::clone(&received);
    let callback: PacketCallback = Arc::new(move |packet| {
        sink.lock()
            .unwrap()
            .push((packet.station().to_string(), packet.start_time_micros()));
    });
    let mut sink_subscriber =
        Subscriber::new(SubscriberOptions::new(&clean_backend, callback), &log).unwrap();
    sink_subscriber.start().unwrap();

    let mut program_options = ProgramOptions::default();
    program_options.input_broadcast_address = raw_backend.clone();
    program_options.output_broadcast_address = clean_frontend.clone();
    program_options.maximum_future_time_millis = 0;
    program_options.maximum_latency_secs = 120;
    program_options.circular_buffer_duration_secs = 120;
    program_options.log_bad_data_interval_secs = -1;
    let mut pipeline = Pipeline::new(&program_options, &log).unwrap();
    pipeline.start().unwrap();

    let mut publisher = Publisher::new(&PublisherOptions::new(&raw_frontend), &log).unwrap();
    // Let the subscription interest reach both proxies.
    thread::sleep(Duration::from_millis(400));

    // Two interleaved channels of fresh packets, 100 ms apart.
    let base = time::timestamp_micros() - 10_000_000;
    for i in 0..10 {
        publisher
            .send(&make_packet("FORK", base + i * 100_000))
            .unwrap();
        publisher
            .send(&make_packet("CWU", base + i * 100_000))
            .unwrap();
    }
    // Anomalies: an exact duplicate, a future packet, an expired packet.
    publisher
        .send(&make_packet("FORK", base + 3 * 100_000))
        .unwrap();
    publisher
        .send(&make_packet("FORK", time::timestamp_micros() + 10_000_000))
        .unwrap();
    publisher
        .send(&make_packet("FORK", time::timestamp_micros() - 600_000_000))
        .unwrap();

    // 20 good packets should come out the far side.
    let started = Instant::now();
    while received.lock().unwrap().len() < 20 {
        assert!(
            started.elapsed() < Duration::from_secs(10),
            "Timed out waiting for sanitized packets; got {}",
            received.lock().unwrap().len()
        );
        thread::sleep(Duration::from_millis(20));
    }
    // Grace period: the anomalies must not trickle through.
    thread::sleep(Duration::from_millis(500));

    let survivors = received.lock().unwrap().clone();
    assert_eq!(survivors.len(), 20);

    for station in ["FORK", "CWU"] {
        let start_times: Vec<i64> = survivors
            .iter()
            .filter(|(name, _)| name == station)
            .map(|&(_, start_time)| start_time)
            .collect();
        assert_eq!(start_times.len(), 10);
        for pair in start_times.windows(2) {
            assert!(pair[0] < pair[1], "Per-channel order violated");
        }
        // Everything that survived is from the fresh window.
        for start_time in &start_times {
            assert!(*start_time >= base && *start_time < base + 1_000_000);
        }
    }

    pipeline.stop();
    sink_subscriber.stop();
    clean_proxy.stop();
    raw_proxy.stop();
}
