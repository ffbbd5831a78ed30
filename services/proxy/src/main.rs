//! The data packet broadcast proxy: middleware to which acquisition
//! utilities forward packets and from which cluster consumers subscribe.

mod config;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Arg, Command};
use conduit::auth::policies::{Grasslands, Stonehouse};
use conduit::auth::zap::ZapOptions;
use conduit::auth::Authenticate;
use conduit::proxy::{Proxy, ProxyOptions};
use strata::credential::KeyPair;
use strata::interrupt::Interrupt;
use strata::logging;

use config::ProgramOptions;

const ABOUT: &str = "\
The broadcast-proxy is middleware to which programs can forward data from \
utilities like SEEDLink for redistribution to a cluster data broadcast.  \
Example usage:

    broadcast-proxy --ini=proxy.ini";

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let matches = Command::new("broadcast-proxy")
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

    let mut proxy_options =
        ProxyOptions::new(&options.frontend_address, &options.backend_address);
    proxy_options.send_high_water_mark = options.send_high_water_mark as usize;

    let authenticator = match build_authenticator(&options, &mut proxy_options, &log) {
        Ok(authenticator) => authenticator,
        Err(error) => {
            eprintln!("{}", error);
            return 1;
        }
    };

    let mut proxy = match Proxy::new(proxy_options, authenticator, &log) {
        Ok(proxy) => proxy,
        Err(error) => {
            eprintln!("Failed to create proxy process because {}", error);
            return 1;
        }
    };
    if let Err(error) = proxy.start() {
        eprintln!("Failed to start proxy process because {}", error);
        return 1;
    }

    logging::debug!(log, "main thread entering waiting loop");
    let mut died = false;
    while !interrupt.is_set() {
        if !proxy.is_alive() {
            logging::error!(log, "proxy thread terminated unexpectedly");
            died = true;
            break;
        }
        thread::sleep(Duration::from_millis(50));
    }
    if interrupt.is_set() {
        logging::info!(log, "SIGINT/SIGTERM signal received!");
    }

    proxy.stop();
    if died {
        return 1;
    }
    0
}

/// A Stonehouse bus when a server keypair is configured, otherwise the
/// open Grasslands door.
fn build_authenticator(
    options: &ProgramOptions,
    proxy_options: &mut ProxyOptions,
    log: &logging::Logger,
) -> Result<Arc<dyn Authenticate>, String> {
    let server_key_file = match &options.server_key_file {
        Some(path) => path,
        None => return Ok(Arc::new(Grasslands::new(log))),
    };

    let contents = fs::read_to_string(server_key_file)
        .map_err(|error| format!("Failed to read {}: {}", server_key_file.display(), error))?;
    let server_keys: KeyPair = serde_json::from_str(&contents)
        .map_err(|error| format!("Failed to parse {}: {}", server_key_file.display(), error))?;

    let mut policy = Stonehouse::new(log);
    if let Some(peers_file) = &options.peers_file {
        let contents = fs::read_to_string(peers_file)
            .map_err(|error| format!("Failed to read {}: {}", peers_file.display(), error))?;
        let peers: Vec<KeyPair> = serde_json::from_str(&contents)
            .map_err(|error| format!("Failed to parse {}: {}", peers_file.display(), error))?;
        for peer in peers {
            policy.add_peer(*peer.public_key());
        }
    }

    proxy_options.zap = ZapOptions::StonehouseServer { server_keys };
    Ok(Arc::new(policy))
}
