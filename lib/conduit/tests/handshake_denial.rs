//! Handshake arbitration: reply framing for denied PLAIN credentials and
//! end-to-end admission control on the proxy's data sockets.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use conduit::auth::policies::Stonehouse;
use conduit::auth::service::{Service, AUTHENTICATOR_IDENTIFIER};
use conduit::auth::zap::ZapOptions;
use conduit::auth::{AuthError, Authenticate};
use conduit::inproc;
use conduit::proxy::{Proxy, ProxyOptions};
use conduit::pubsub::{Publisher, PublisherOptions};
use conduit::Error;
use strata::credential::{Credential, Key, KeyPair, UserNameAndPassword};
use strata::logging;

fn free_tcp_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    format!("tcp://127.0.0.1:{}", port)
}

/// A policy that refuses every PLAIN credential but admits anything else.
struct RejectPlain;

impl Authenticate for RejectPlain {
    fn white_listed(&self, _address: &str) -> Result<(), AuthError> {
        Ok(())
    }

    fn black_listed(&self, _address: &str) -> Result<(), AuthError> {
        Ok(())
    }

    fn authenticate(&self, credential: &Credential) -> Result<String, AuthError> {
        match credential {
            Credential::UserNameAndPassword(_) => {
                Err(AuthError::Unauthorized("No PLAIN access".to_string()))
            }
            Credential::KeyPair(_) => Ok("OK".to_string()),
        }
    }
}

#[test]
fn test_plain_denial_reply_frames() {
    let log = logging::discard();
    let mut service = Service::with_rendezvous(
        Arc::new(RejectPlain),
        "inproc://test_plain_denial_zap",
        &log,
    )
    .unwrap();
    service.start().unwrap();

    let request = vec![
        b"1.0".to_vec(),
        b"7".to_vec(),
        b"global".to_vec(),
        b"127.0.0.1".to_vec(),
        b"socket-7".to_vec(),
        b"PLAIN".to_vec(),
        b"operator".to_vec(),
        b"hunter2".to_vec(),
    ];
    let reply = inproc::request(
        "inproc://test_plain_denial_zap",
        request,
        Duration::from_secs(1),
    )
    .unwrap();

    assert_eq!(
        reply,
        vec![
            b"1.0".to_vec(),
            b"7".to_vec(),
            b"401".to_vec(),
            b"Unauthorized".to_vec(),
            AUTHENTICATOR_IDENTIFIER.as_bytes().to_vec(),
            Vec::new(),
        ]
    );

    service.stop();
}

#[test]
fn test_denied_publisher_cannot_connect() {
    let log = logging::discard();
    let frontend = free_tcp_endpoint();
    let backend = free_tcp_endpoint();

    let mut options = ProxyOptions::new(&frontend, &backend);
    options.rendezvous = "inproc://test_denied_publisher_zap".to_string();
    let mut proxy = Proxy::new(options, Arc::new(RejectPlain), &log).unwrap();
    proxy.start().unwrap();

    // PLAIN credentials bounce with a 401.
    let mut plain_options = PublisherOptions::new(&frontend);
    plain_options.set_zap_options(ZapOptions::WoodhouseClient {
        credential: UserNameAndPassword::new("operator", "hunter2"),
    });
    match Publisher::new(&plain_options, &log) {
        Err(Error::HandshakeDenied {
            status_code,
            status_text,
        }) => {
            assert_eq!(status_code, 401);
            assert_eq!(status_text, "Unauthorized");
        }
        other => panic!("Expected a 401 denial, got {:?}", other.map(|_| ())),
    }

    // The NULL mechanism is still admitted by this policy.
    assert!(Publisher::new(&PublisherOptions::new(&frontend), &log).is_ok());

    proxy.stop();
}

#[test]
fn test_stonehouse_admits_known_peers_only() {
    let log = logging::discard();
    let frontend = free_tcp_endpoint();
    let backend = free_tcp_endpoint();

    let known_client = KeyPair::new(Key::new([5u8; 32]), Key::new([6u8; 32]));
    let server_keys = KeyPair::new(Key::new([1u8; 32]), Key::new([2u8; 32]));

    let mut policy = Stonehouse::new(&log);
    policy.add_peer(*known_client.public_key());

    let mut options = ProxyOptions::new(&frontend, &backend);
    options.rendezvous = "inproc://test_stonehouse_zap".to_string();
    options.zap = ZapOptions::StonehouseServer {
        server_keys: server_keys.clone(),
    };
    let mut proxy = Proxy::new(options, Arc::new(policy), &log).unwrap();
    proxy.start().unwrap();

    let mut known_options = PublisherOptions::new(&frontend);
    known_options.set_zap_options(ZapOptions::StonehouseClient {
        client_keys: known_client,
        server_public_key: server_keys.to_public(),
    });
    assert!(Publisher::new(&known_options, &log).is_ok());

    let mut unknown_options = PublisherOptions::new(&frontend);
    unknown_options.set_zap_options(ZapOptions::StonehouseClient {
        client_keys: KeyPair::new(Key::new([7u8; 32]), Key::new([8u8; 32])),
        server_public_key: server_keys.to_public(),
    });
    match Publisher::new(&unknown_options, &log) {
        Err(Error::HandshakeDenied { status_code, .. }) => assert_eq!(status_code, 401),
        other => panic!("Expected a 401 denial, got {:?}", other.map(|_| ())),
    }

    proxy.stop();
}
