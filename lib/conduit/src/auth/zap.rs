//! Per-socket handshake configuration.
//!
//! A socket's ZAP options pick the mechanism, the domain, and the key or
//! password material it presents. The set is frozen once the socket is
//! bound or connected; changing mechanism means a new socket.

use strata::credential::{KeyPair, UserNameAndPassword, KEY_SIZE};

use crate::shared::Error;

/// Well-known process-wide handshake rendezvous (source lineage name).
pub const ZAP_ENDPOINT: &str = "inproc://zeromq.zap.01";

pub const DEFAULT_DOMAIN: &str = "global";

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Mechanism {
    Null,
    Plain,
    Curve,
}

impl Mechanism {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Mechanism::Null => "NULL",
            Mechanism::Plain => "PLAIN",
            Mechanism::Curve => "CURVE",
        }
    }
}

/// The mechanism-specific option set installed on a socket before
/// bind/connect.
#[derive(Clone)]
pub enum ZapOptions {
    /// NULL mechanism, no screening on either side.
    GrasslandsClient,
    GrasslandsServer { domain: String },
    /// NULL mechanism; the server screens peer addresses.
    StrawhouseClient,
    StrawhouseServer { domain: String },
    /// PLAIN mechanism.
    WoodhouseClient { credential: UserNameAndPassword },
    WoodhouseServer { domain: String },
    /// CURVE mechanism with opaque 32-byte keys.
    StonehouseClient {
        client_keys: KeyPair,
        server_public_key: KeyPair,
    },
    StonehouseServer { server_keys: KeyPair },
}

impl Default for ZapOptions {
    fn default() -> ZapOptions {
        ZapOptions::GrasslandsClient
    }
}

impl ZapOptions {
    pub fn grasslands_server() -> ZapOptions {
        ZapOptions::GrasslandsServer {
            domain: DEFAULT_DOMAIN.to_string(),
        }
    }

    #[inline]
    pub fn mechanism(&self) -> Mechanism {
        match self {
            ZapOptions::GrasslandsClient
            | ZapOptions::GrasslandsServer { .. }
            | ZapOptions::StrawhouseClient
            | ZapOptions::StrawhouseServer { .. } => Mechanism::Null,
            ZapOptions::WoodhouseClient { .. } | ZapOptions::WoodhouseServer { .. } => {
                Mechanism::Plain
            }
            ZapOptions::StonehouseClient { .. } | ZapOptions::StonehouseServer { .. } => {
                Mechanism::Curve
            }
        }
    }

    #[inline]
    pub fn is_authentication_server(&self) -> bool {
        matches!(
            self,
            ZapOptions::GrasslandsServer { .. }
                | ZapOptions::StrawhouseServer { .. }
                | ZapOptions::WoodhouseServer { .. }
                | ZapOptions::StonehouseServer { .. }
        )
    }

    pub fn domain(&self) -> &str {
        match self {
            ZapOptions::GrasslandsServer { domain }
            | ZapOptions::StrawhouseServer { domain }
            | ZapOptions::WoodhouseServer { domain } => domain,
            ZapOptions::StonehouseClient { .. } | ZapOptions::StonehouseServer { .. } => {
                DEFAULT_DOMAIN
            }
            _ => DEFAULT_DOMAIN,
        }
    }

    /// Validates the option set for its role.
    pub fn validate(&self) -> Result<(), Error> {
        match self {
            ZapOptions::StonehouseClient { client_keys, .. } => {
                if !client_keys.have_secret_key() {
                    return Err(Error::InvalidConfig(
                        "Client secret key not set".to_string(),
                    ));
                }
                Ok(())
            }
            ZapOptions::StonehouseServer { server_keys } => {
                if !server_keys.have_secret_key() {
                    return Err(Error::InvalidConfig(
                        "Server secret key not set".to_string(),
                    ));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// The mechanism-specific frames a connecting socket presents.
    pub fn hello_frames(&self) -> Result<Vec<Vec<u8>>, Error> {
        self.validate()?;
        let mut frames = vec![self.mechanism().as_str().as_bytes().to_vec()];
        match self {
            ZapOptions::WoodhouseClient { credential } => {
                frames.push(credential.user_name().as_bytes().to_vec());
                frames.push(credential.password().as_bytes().to_vec());
            }
            ZapOptions::StonehouseClient { client_keys, .. } => {
                debug_assert_eq!(client_keys.public_key().len(), KEY_SIZE);
                frames.push(client_keys.public_key().to_vec());
            }
            _ => (),
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata::credential::Key;

    #[test]
    fn test_mechanism_mapping() {
        assert_eq!(ZapOptions::GrasslandsClient.mechanism(), Mechanism::Null);
        assert_eq!(ZapOptions::StrawhouseClient.mechanism(), Mechanism::Null);
        assert_eq!(
            ZapOptions::WoodhouseClient {
                credential: UserNameAndPassword::new("user", "pw"),
            }
            .mechanism(),
            Mechanism::Plain
        );
        assert_eq!(
            ZapOptions::StonehouseServer {
                server_keys: KeyPair::new(Key::new([1; 32]), Key::new([2; 32])),
            }
            .mechanism(),
            Mechanism::Curve
        );
    }

    #[test]
    fn test_stonehouse_requires_secret() {
        let public_only = ZapOptions::StonehouseClient {
            client_keys: KeyPair::from_public_key(Key::new([1; 32])),
            server_public_key: KeyPair::from_public_key(Key::new([2; 32])),
        };
        assert!(public_only.validate().is_err());

        let complete = ZapOptions::StonehouseClient {
            client_keys: KeyPair::new(Key::new([1; 32]), Key::new([3; 32])),
            server_public_key: KeyPair::from_public_key(Key::new([2; 32])),
        };
        assert!(complete.validate().is_ok());
    }

    #[test]
    fn test_hello_frames() {
        let frames = ZapOptions::GrasslandsClient.hello_frames().unwrap();
        assert_eq!(frames, vec![b"NULL".to_vec()]);

        let frames = ZapOptions::WoodhouseClient {
            credential: UserNameAndPassword::new("operator", "hunter2"),
        }
        .hello_frames()
        .unwrap();
        assert_eq!(
            frames,
            vec![
                b"PLAIN".to_vec(),
                b"operator".to_vec(),
                b"hunter2".to_vec()
            ]
        );

        let client_keys = KeyPair::new(Key::new([7; 32]), Key::new([8; 32]));
        let frames = ZapOptions::StonehouseClient {
            client_keys: client_keys.clone(),
            server_public_key: KeyPair::from_public_key(Key::new([9; 32])),
        }
        .hello_frames()
        .unwrap();
        assert_eq!(frames[0], b"CURVE".to_vec());
        assert_eq!(frames[1], client_keys.public_key().to_vec());
    }
}
