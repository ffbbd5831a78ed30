//! End-to-end proxy behavior: packets flow publisher -> proxy -> subscriber,
//! pausing stalls delivery without losing packets, and resuming lets the
//! backlog drain.

use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use conduit::auth::policies::Grasslands;
use conduit::proxy::{Proxy, ProxyOptions, ProxyState};
use conduit::pubsub::{PacketCallback, Publisher, PublisherOptions, Subscriber, SubscriberOptions};
use strata::logging;
use strata::packet::Packet;

fn free_tcp_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    format!("tcp://127.0.0.1:{}", port)
}

fn make_packet(sequence: i64) -> Packet {
    let mut packet = Packet::new();
    packet.set_network("UU").unwrap();
    packet.set_station("FORK").unwrap();
    packet.set_channel("HHZ").unwrap();
    packet.set_location_code("01").unwrap();
    packet.set_sampling_rate(100.0).unwrap();
    packet.set_start_time_micros(sequence * 100_000);
    packet.set_data_i32(vec![sequence as i32; 10]);
    packet
}

fn wait_for_count(counter: &AtomicUsize, expected: usize, deadline: Duration) {
    let started = Instant::now();
    while counter.load(Ordering::SeqCst) < expected {
        if started.elapsed() > deadline {
            panic!(
                "Timed out waiting for {} packets, got {}",
                expected,
                counter.load(Ordering::SeqCst)
            );
        }
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_proxy_pause_resume() {
    let log = logging::discard();
    let frontend = free_tcp_endpoint();
    let backend = free_tcp_endpoint();

    let mut options = ProxyOptions::new(&frontend, &backend);
    options.rendezvous = "inproc://test_proxy_pause_resume_zap".to_string();
    let mut proxy = Proxy::new(options, Arc::new(Grasslands::new(&log)), &log).unwrap();
    proxy.start().unwrap();
    assert_eq!(proxy.state(), ProxyState::Running);

    let received = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&received);
    let callback: PacketCallback = Arc::new(move |_packet| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let mut subscriber = Subscriber::new(SubscriberOptions::new(&backend, callback), &log).unwrap();
    subscriber.start().unwrap();

    let mut publisher = Publisher::new(&PublisherOptions::new(&frontend), &log).unwrap();
    // Give the subscription interest time to reach the proxy.
    thread::sleep(Duration::from_millis(300));

    for sequence in 0..100 {
        publisher.send(&make_packet(sequence)).unwrap();
    }
    wait_for_count(&received, 100, Duration::from_secs(5));
    assert_eq!(received.load(Ordering::SeqCst), 100);

    proxy.pause();
    assert_eq!(proxy.state(), ProxyState::Paused);
    thread::sleep(Duration::from_millis(300));
    let at_pause = received.load(Ordering::SeqCst);

    for sequence in 100..200 {
        publisher.send(&make_packet(sequence)).unwrap();
    }
    thread::sleep(Duration::from_secs(1));
    assert_eq!(
        received.load(Ordering::SeqCst),
        at_pause,
        "Subscriber received packets while the proxy was paused"
    );

    proxy.resume();
    assert_eq!(proxy.state(), ProxyState::Running);
    wait_for_count(&received, 200, Duration::from_secs(5));
    assert_eq!(received.load(Ordering::SeqCst), 200);

    subscriber.stop();
    proxy.stop();
    assert_eq!(proxy.state(), ProxyState::NotRunning);
}

#[test]
fn test_proxy_state_machine() {
    let log = logging::discard();
    let mut options = ProxyOptions::new(&free_tcp_endpoint(), &free_tcp_endpoint());
    options.rendezvous = "inproc://test_proxy_state_machine_zap".to_string();
    let mut proxy = Proxy::new(options, Arc::new(Grasslands::new(&log)), &log).unwrap();
    assert_eq!(proxy.state(), ProxyState::NotRunning);

    // Steering a stopped proxy is a no-op.
    proxy.pause();
    proxy.resume();
    assert_eq!(proxy.state(), ProxyState::NotRunning);

    proxy.start().unwrap();
    assert_eq!(proxy.state(), ProxyState::Running);
    assert!(proxy.is_alive());

    // Resume without a pause is a no-op.
    proxy.resume();
    assert_eq!(proxy.state(), ProxyState::Running);

    proxy.pause();
    assert_eq!(proxy.state(), ProxyState::Paused);
    // A second pause is a no-op.
    proxy.pause();
    assert_eq!(proxy.state(), ProxyState::Paused);

    proxy.stop();
    assert_eq!(proxy.state(), ProxyState::NotRunning);
    assert!(!proxy.is_alive());
}

#[test]
fn test_proxy_rejects_identical_addresses() {
    let log = logging::discard();
    let endpoint = free_tcp_endpoint();
    let mut options = ProxyOptions::new(&endpoint, &endpoint);
    options.rendezvous = "inproc://test_proxy_same_address_zap".to_string();
    assert!(Proxy::new(options, Arc::new(Grasslands::new(&log)), &log).is_err());
}

#[test]
fn test_proxy_per_publisher_order_is_preserved() {
    let log = logging::discard();
    let frontend = free_tcp_endpoint();
    let backend = free_tcp_endpoint();

    let mut options = ProxyOptions::new(&frontend, &backend);
    options.rendezvous = "inproc://test_proxy_order_zap".to_string();
    let mut proxy = Proxy::new(options, Arc::new(Grasslands::new(&log)), &log).unwrap();
    proxy.start().unwrap();

    let received = Arc::new(std::sync::Mutex::new(Vec::<i64>::new()));
    let sink = Arc::clone(&received);
    let callback: PacketCallback = Arc::new(move |packet| {
        sink.lock().unwrap().push(packet.start_time_micros());
    });
    let mut subscriber = Subscriber::new(SubscriberOptions::new(&backend, callback), &log).unwrap();
    subscriber.start().unwrap();

    let mut publisher = Publisher::new(&PublisherOptions::new(&frontend), &log).unwrap();
    thread::sleep(Duration::from_millis(300));

    for sequence in 0..50 {
        publisher.send(&make_packet(sequence)).unwrap();
    }

    let started = Instant::now();
    while received.lock().unwrap().len() < 50 {
        assert!(started.elapsed() < Duration::from_secs(5), "Timed out");
        thread::sleep(Duration::from_millis(10));
    }

    let start_times = received.lock().unwrap().clone();
    for pair in start_times.windows(2) {
        assert!(pair[0] < pair[1], "Per-publisher FIFO violated");
    }

    subscriber.stop();
    proxy.stop();
}
