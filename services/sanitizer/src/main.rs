//! The data packet sanitizer reads packets from a broadcast, screens out
//! future, expired, duplicate, and timing-slip packets, and republishes the
//! survivors.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::{Arg, Command};
use sanitizer::{config, pipeline};
use strata::interrupt::Interrupt;
use strata::logging;

const ABOUT: &str = "\
The sanitizer reads data packets from a broadcast and removes future, \
expired, and duplicate packets as well as packets that may indicate a GPS \
clock slip.  Example usage:

    sanitizer --ini=sanitizer.ini";

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let matches = Command::new("sanitizer")
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

    let mut pipeline = match pipeline::Pipeline::new(&options, &log) {
        Ok(pipeline) => pipeline,
        Err(error) => {
            eprintln!("Failed to create sanitizer process because {}", error);
            return 1;
        }
    };
    if let Err(error) = pipeline.start() {
        eprintln!("Failed to start sanitizer process because {}", error);
        return 1;
    }

    logging::debug!(log, "main thread entering waiting loop");
    while !interrupt.is_set() && pipeline.is_healthy() {
        thread::sleep(Duration::from_millis(50));
    }
    if interrupt.is_set() {
        logging::info!(log, "SIGINT/SIGTERM signal received!");
    }

    pipeline.stop();
    if !pipeline.is_healthy() {
        return 1;
    }
    0
}
