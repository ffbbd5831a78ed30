//! Drives the SEEDLink client against an in-process fake server: session
//! negotiation, record streaming, decoding, and sequence-state rewrite.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use byteorder::{BigEndian, ByteOrder};
use conduit::pubsub::PacketCallback;
use seedlink::client::{Client, ClientOptions};
use seedlink::selector::{SelectorType, StreamSelector};
use seedlink::state::StateFile;
use strata::logging;
use strata::packet::Packet;

/// A 512-byte big-endian miniSEED 2 record with int32 samples.
fn v2_record(station: &str, samples: &[i32]) -> Vec<u8> {
    let mut record = vec![0u8; 512];
    record[..6].copy_from_slice(b"000001");
    record[6] = b'D';
    let mut station_field = [b' '; 5];
    station_field[..station.len()].copy_from_slice(station.as_bytes());
    record[8..13].copy_from_slice(&station_field);
    record[13..15].copy_from_slice(b"01");
    record[15..18].copy_from_slice(b"EHZ");
    record[18..20].copy_from_slice(b"UU");
    BigEndian::write_u16(&mut record[20..22], 2024);
    BigEndian::write_u16(&mut record[22..24], 152);
    record[24] = 12;
    BigEndian::write_u16(&mut record[30..32], samples.len() as u16);
    BigEndian::write_u16(&mut record[32..34], 100u16);
    BigEndian::write_u16(&mut record[34..36], 1u16);
    record[39] = 1;
    BigEndian::write_u16(&mut record[44..46], 64);
    BigEndian::write_u16(&mut record[46..48], 48);
    BigEndian::write_u16(&mut record[48..50], 1000);
    record[52] = 3;
    record[53] = 1;
    record[54] = 9;
    for (i, value) in samples.iter().enumerate() {
        BigEndian::write_i32(&mut record[64 + 4 * i..68 + 4 * i], *value);
    }
    record
}

/// Accepts one session, answers the negotiation, then streams records.
fn fake_server(listener: TcpListener, commands: Arc<Mutex<Vec<String>>>) {
    let (stream, _) = listener.accept().unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut writer = stream;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).is_err() || line.is_empty() {
            return;
        }
        let command = line.trim().to_string();
        commands.lock().unwrap().push(command.clone());

        if command.starts_with("HELLO") {
            writer
                .write_all(b"SeedLink v3.1 (2024.123) :: SLPROTO:3.1\r\n")
                .unwrap();
            writer.write_all(b"Fake Seismic Network\r\n").unwrap();
        } else if command.starts_with("STATION")
            || command.starts_with("SELECT")
            || command.starts_with("DATA")
        {
            writer.write_all(b"OK\r\n").unwrap();
        } else if command.starts_with("END") {
            break;
        }
    }

    // Stream three records with increasing sequence numbers.
    for (sequence, start) in [(0x10u32, 0), (0x11, 100), (0x12, 200)] {
        let samples: Vec<i32> = (start..start + 4).collect();
        writer
            .write_all(format!("SL{:06X}", sequence).as_bytes())
            .unwrap();
        writer.write_all(&v2_record("FORK", &samples)).unwrap();
    }
    // Keep the socket open briefly so the client drains everything.
    thread::sleep(Duration::from_millis(500));
}

#[test]
fn test_session_streams_and_persists_state() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let commands = Arc::new(Mutex::new(Vec::new()));
    let server_commands = Arc::clone(&commands);
    let server = thread::spawn(move || fake_server(listener, server_commands));

    let mut state_path = std::env::temp_dir();
    state_path.push(format!("seedlink_session_state_{}", std::process::id()));
    let _ = std::fs::remove_file(&state_path);

    let mut options = ClientOptions::default();
    options.set_address("127.0.0.1").unwrap();
    options.set_port(port);
    options
        .set_state_file(state_path.to_str().unwrap())
        .unwrap();
    options.set_state_file_update_interval(1);
    options.set_network_reconnect_delay_secs(3600);
    let mut selector = StreamSelector::new();
    selector.set_network("UU").unwrap();
    selector.set_station("FORK").unwrap();
    selector.set_selector("EHZ", "01", SelectorType::Data);
    options.add_stream_selector(selector).unwrap();

    let received = Arc::new(Mutex::new(Vec::<Packet>::new()));
    let sink = Arc::clone(&received);
    let callback: PacketCallback = Arc::new(move |packet| {
        sink.lock().unwrap().push(packet);
    });

    let mut client = Client::new(callback, options, &logging::discard());
    client.start();

    let started = Instant::now();
    while received.lock().unwrap().len() < 3 {
        assert!(
            started.elapsed() < Duration::from_secs(10),
            "Timed out waiting for packets"
        );
        thread::sleep(Duration::from_millis(20));
    }
    client.stop();
    server.join().unwrap();

    let packets = received.lock().unwrap();
    assert_eq!(packets.len(), 3);
    for packet in packets.iter() {
        assert_eq!(packet.network(), "UU");
        assert_eq!(packet.station(), "FORK");
        assert_eq!(packet.channel(), "EHZ");
        assert_eq!(packet.location_code(), "01");
        assert_eq!(packet.sampling_rate(), 100.0);
        assert_eq!(packet.number_of_samples(), 4);
    }
    assert_eq!(packets[0].data_i32(), Some(&[0, 1, 2, 3][..]));
    assert_eq!(packets[2].data_i32(), Some(&[200, 201, 202, 203][..]));

    // The negotiation carried our station, selector, and resume commands.
    let commands = commands.lock().unwrap();
    assert!(commands.iter().any(|c| c == "STATION FORK UU"));
    assert!(commands.iter().any(|c| c == "SELECT 01EHZ.D"));
    assert!(commands.iter().any(|c| c == "DATA"));
    assert!(commands.iter().any(|c| c == "END"));

    // The last streamed sequence number was persisted.
    let mut state = StateFile::new(Some(&state_path));
    state.recover().unwrap();
    assert_eq!(state.sequence("UU", "FORK"), Some(0x12));

    std::fs::remove_file(&state_path).unwrap();
}
