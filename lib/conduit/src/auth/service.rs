//! The handshake arbiter.
//!
//! One service per fabric owns the process-wide rendezvous. Data sockets
//! send ZAP v1.0 requests there; a listener thread screens the peer through
//! the configured authenticator and answers with a status reply. The
//! listener also owns a PAIR API socket, bound to a self-addressed inproc
//! endpoint, whose only command is `TERMINATE`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::select;
use strata::credential::{Credential, Key, KeyPair, UserNameAndPassword};
use strata::{logging, time};

use crate::auth::zap::ZAP_ENDPOINT;
use crate::auth::{AuthError, Authenticate};
use crate::inproc::{Multipart, PairSocket, RepSocket};
use crate::shared::Error;

pub const AUTHENTICATOR_IDENTIFIER: &str = "GroundwireAuth";

const TERMINATE: &[u8] = b"TERMINATE";

static INSTANCE: AtomicU64 = AtomicU64::new(0);

pub struct Service {
    api: PairSocket,
    api_endpoint: String,
    rendezvous: String,
    authenticator: Arc<dyn Authenticate>,
    thread: Option<thread::JoinHandle<()>>,
    started: bool,
    log: logging::Logger,
}

impl Service {
    /// A service on the canonical rendezvous.
    pub fn new(
        authenticator: Arc<dyn Authenticate>,
        log: &logging::Logger,
    ) -> Result<Service, Error> {
        Self::with_rendezvous(authenticator, ZAP_ENDPOINT, log)
    }

    /// A service on a caller-chosen rendezvous, for fabrics that must
    /// coexist in one process.
    pub fn with_rendezvous(
        authenticator: Arc<dyn Authenticate>,
        rendezvous: &str,
        log: &logging::Logger,
    ) -> Result<Service, Error> {
        let api_endpoint = format!(
            "inproc://{}_{}_auth_api",
            time::timestamp_micros(),
            INSTANCE.fetch_add(1, Ordering::Relaxed)
        );
        let log = log.new(logging::o!("component" => "auth_service"));
        logging::debug!(log, "creating authentication service API end point";
                        "endpoint" => api_endpoint.as_str());
        let api = PairSocket::bind(&api_endpoint)?;

        Ok(Service {
            api,
            api_endpoint,
            rendezvous: rendezvous.to_string(),
            authenticator,
            thread: None,
            started: false,
            log,
        })
    }

    #[inline]
    pub fn rendezvous(&self) -> &str {
        &self.rendezvous
    }

    /// Binds the rendezvous and spawns the listener thread.
    pub fn start(&mut self) -> Result<(), Error> {
        self.stop();
        logging::info!(self.log, "binding handshake rendezvous";
                       "rendezvous" => self.rendezvous.as_str());
        let rep = RepSocket::bind(&self.rendezvous)?;
        let api = PairSocket::connect(&self.api_endpoint)?;
        let authenticator = Arc::clone(&self.authenticator);
        let log = self.log.clone();

        self.thread = Some(thread::spawn(move || {
            run_listener(rep, api, authenticator, log)
        }));
        self.started = true;
        Ok(())
    }

    /// Signals `TERMINATE` and joins the listener.
    pub fn stop(&mut self) {
        if self.started {
            logging::debug!(self.log, "sending TERMINATE to listener");
            let _ = self.api.send(vec![TERMINATE.to_vec()]);
            self.started = false;
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_listener(
    rep: RepSocket,
    api: PairSocket,
    authenticator: Arc<dyn Authenticate>,
    log: logging::Logger,
) {
    logging::debug!(log, "listener thread running");
    loop {
        select! {
            recv(api.receiver()) -> message => match message {
                Ok(frames) => {
                    if frames.first().map(|f| f.as_slice()) == Some(TERMINATE) {
                        logging::debug!(log, "terminating listener");
                        break;
                    }
                    logging::warn!(log, "unhandled API command");
                }
                // The handle went away; nothing left to serve.
                Err(_) => break,
            },
            recv(rep.receiver()) -> request => match request {
                Ok((frames, reply)) => {
                    if let Some(reply_frames) =
                        handle_request(&frames, authenticator.as_ref(), &log)
                    {
                        let _ = reply.send(reply_frames);
                    }
                }
                Err(_) => break,
            },
        }
    }
    logging::debug!(log, "listener thread exiting");
}

/// Evaluates one ZAP request. Request framing per ZAP v1.0: version,
/// sequence, domain, client address, identity, mechanism, then
/// mechanism-specific frames.
fn handle_request(
    frames: &Multipart,
    authenticator: &dyn Authenticate,
    log: &logging::Logger,
) -> Option<Multipart> {
    if frames.len() < 6 {
        logging::warn!(log, "short handshake request"; "frames" => frames.len());
        return None;
    }

    let domain = String::from_utf8_lossy(&frames[2]).to_string();
    let address = String::from_utf8_lossy(&frames[3]).to_string();
    let mechanism = frames[5].as_slice();

    let outcome = screen(frames, mechanism, &address, authenticator);
    let (status_code, status_text) = match outcome {
        Ok(()) => {
            logging::info!(log, "allowing connection";
                           "address" => address.as_str(), "domain" => domain.as_str());
            (200u16, "OK".to_string())
        }
        Err(error) => {
            let status_code = error.status_code();
            let status_text = error.status_text();
            logging::info!(log, "denying connection";
                           "address" => address.as_str(),
                           "status" => status_code,
                           "reason" => status_text.as_str());
            (status_code, status_text)
        }
    };

    Some(vec![
        frames[0].clone(),
        frames[1].clone(),
        status_code.to_string().into_bytes(),
        status_text.into_bytes(),
        AUTHENTICATOR_IDENTIFIER.as_bytes().to_vec(),
        Vec::new(),
    ])
}

fn screen(
    frames: &Multipart,
    mechanism: &[u8],
    address: &str,
    authenticator: &dyn Authenticate,
) -> Result<(), AuthError> {
    authenticator.white_listed(address)?;
    authenticator.black_listed(address)?;

    match mechanism {
        b"NULL" => Ok(()),
        b"PLAIN" => {
            let user = frames
                .get(6)
                .ok_or_else(|| AuthError::BadRequest("User name frame missing".to_string()))?;
            let user = String::from_utf8_lossy(user).to_string();
            if user.is_empty() {
                return Err(AuthError::BadRequest("User name is empty".to_string()));
            }
            let password = frames
                .get(7)
                .map(|f| String::from_utf8_lossy(f).to_string())
                .unwrap_or_default();
            let credential =
                Credential::UserNameAndPassword(UserNameAndPassword::new(&user, &password));
            authenticator.authenticate(&credential).map(|_| ())
        }
        b"CURVE" => {
            let key = frames
                .get(6)
                .ok_or_else(|| AuthError::BadRequest("Key frame missing".to_string()))?;
            let key = Key::from_slice(key)
                .map_err(|_| AuthError::BadRequest("Key must be length 32".to_string()))?;
            let credential = Credential::KeyPair(KeyPair::from_public_key(key));
            authenticator.authenticate(&credential).map(|_| ())
        }
        _ => Err(AuthError::InternalServerError(
            "Undefined ZAP mechanism".to_string(),
        )),
    }
}
