//! Stock authenticator policies.
//!
//! `Grasslands` admits everything, `Strawhouse` screens by peer address,
//! `Stonehouse` validates CURVE public keys against known peers, and
//! `Woodhouse` validates PLAIN username/password pairs.

use hashbrown::{HashMap, HashSet};
use strata::logging;

use crate::auth::{AuthError, Authenticate, Credential, Key};

const OKAY_MESSAGE: &str = "OK";

/// Everything comes through.
pub struct Grasslands {
    log: logging::Logger,
}

impl Grasslands {
    pub fn new(log: &logging::Logger) -> Grasslands {
        Grasslands {
            log: log.new(logging::o!("policy" => "grasslands")),
        }
    }
}

impl Authenticate for Grasslands {
    fn white_listed(&self, address: &str) -> Result<(), AuthError> {
        logging::debug!(self.log, "address is whitelisted"; "address" => address);
        Ok(())
    }

    fn black_listed(&self, address: &str) -> Result<(), AuthError> {
        logging::debug!(self.log, "address is not blacklisted"; "address" => address);
        Ok(())
    }

    fn authenticate(&self, _credential: &Credential) -> Result<String, AuthError> {
        logging::debug!(self.log, "credential is allowed");
        Ok(OKAY_MESSAGE.to_string())
    }
}

/// Admits by peer address only. An empty allow list admits any address that
/// is not denied.
pub struct Strawhouse {
    allowed: HashSet<String>,
    denied: HashSet<String>,
    log: logging::Logger,
}

impl Strawhouse {
    pub fn new(log: &logging::Logger) -> Strawhouse {
        Strawhouse {
            allowed: HashSet::new(),
            denied: HashSet::new(),
            log: log.new(logging::o!("policy" => "strawhouse")),
        }
    }

    pub fn allow_address(&mut self, address: &str) {
        self.allowed.insert(address.to_string());
    }

    pub fn deny_address(&mut self, address: &str) {
        self.denied.insert(address.to_string());
    }
}

impl Authenticate for Strawhouse {
    fn white_listed(&self, address: &str) -> Result<(), AuthError> {
        if !self.allowed.is_empty() && !self.allowed.contains(address) {
            logging::info!(self.log, "address is not whitelisted"; "address" => address);
            return Err(AuthError::Forbidden(format!(
                "{} is not whitelisted",
                address
            )));
        }
        Ok(())
    }

    fn black_listed(&self, address: &str) -> Result<(), AuthError> {
        if self.denied.contains(address) {
            logging::info!(self.log, "address is blacklisted"; "address" => address);
            return Err(AuthError::Forbidden(format!("{} is blacklisted", address)));
        }
        Ok(())
    }

    fn authenticate(&self, _credential: &Credential) -> Result<String, AuthError> {
        // Address screening is the whole policy.
        Ok(OKAY_MESSAGE.to_string())
    }
}

/// Validates CURVE public keys against the set of known peers.
pub struct Stonehouse {
    known_peers: HashSet<Key>,
    log: logging::Logger,
}

impl Stonehouse {
    pub fn new(log: &logging::Logger) -> Stonehouse {
        Stonehouse {
            known_peers: HashSet::new(),
            log: log.new(logging::o!("policy" => "stonehouse")),
        }
    }

    pub fn add_peer(&mut self, public_key: Key) {
        self.known_peers.insert(public_key);
    }
}

impl Authenticate for Stonehouse {
    fn white_listed(&self, _address: &str) -> Result<(), AuthError> {
        Ok(())
    }

    fn black_listed(&self, _address: &str) -> Result<(), AuthError> {
        Ok(())
    }

    fn authenticate(&self, credential: &Credential) -> Result<String, AuthError> {
        match credential {
            Credential::KeyPair(key_pair) => {
                if self.known_peers.contains(key_pair.public_key()) {
                    logging::debug!(self.log, "known peer key admitted");
                    Ok(OKAY_MESSAGE.to_string())
                } else {
                    logging::info!(self.log, "unknown peer key");
                    Err(AuthError::Unauthorized("Unknown public key".to_string()))
                }
            }
            Credential::UserNameAndPassword(_) => Err(AuthError::BadRequest(
                "Stonehouse expects a key credential".to_string(),
            )),
        }
    }
}

/// Validates PLAIN username/password pairs against a user registry.
pub struct Woodhouse {
    users: HashMap<String, String>,
    log: logging::Logger,
}

impl Woodhouse {
    pub fn new(log: &logging::Logger) -> Woodhouse {
        Woodhouse {
            users: HashMap::new(),
            log: log.new(logging::o!("policy" => "woodhouse")),
        }
    }

    pub fn add_user(&mut self, user_name: &str, password: &str) {
        self.users
            .insert(user_name.to_string(), password.to_string());
    }
}

impl Authenticate for Woodhouse {
    fn white_listed(&self, _address: &str) -> Result<(), AuthError> {
        Ok(())
    }

    fn black_listed(&self, _address: &str) -> Result<(), AuthError> {
        Ok(())
    }

    fn authenticate(&self, credential: &Credential) -> Result<String, AuthError> {
        match credential {
            Credential::UserNameAndPassword(plain) => {
                if plain.user_name().is_empty() {
                    return Err(AuthError::BadRequest("User name is empty".to_string()));
                }
                match self.users.get(plain.user_name()) {
                    Some(password) if password == plain.password() => {
                        logging::debug!(self.log, "user admitted"; "user" => plain.user_name());
                        Ok(OKAY_MESSAGE.to_string())
                    }
                    _ => {
                        logging::info!(self.log, "bad user or password";
                                       "user" => plain.user_name());
                        Err(AuthError::Unauthorized("Bad credentials".to_string()))
                    }
                }
            }
            Credential::KeyPair(_) => Err(AuthError::BadRequest(
                "Woodhouse expects a username and password".to_string(),
            )),
        }
    }
}
