//! Structured logging for the fabric processes.
//!
//! Every executable builds one terminal logger at startup and hands child
//! loggers to its components. Call sites use the re-exported macros, e.g.
//! `logging::info!(log, "starting"; "address" => address)`.

use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

pub use slog::{crit, debug, error, info, o, trace, warn, Logger};

/// Builds a stderr terminal logger. The verbosity mapping follows the
/// operator convention: <=1 critical, 2 warning, 3 info, >=4 debug.
pub fn init(verbosity: i32) -> Logger {
    let level = if verbosity <= 1 {
        Severity::Critical
    } else if verbosity == 2 {
        Severity::Warning
    } else if verbosity == 3 {
        Severity::Info
    } else {
        Severity::Debug
    };

    let mut builder = TerminalLoggerBuilder::new();
    builder.level(level);
    builder.destination(Destination::Stderr);
    builder.build().expect("Logger construction failed")
}

/// Logger for tests and tools that should stay quiet.
pub fn discard() -> Logger {
    Logger::root(slog::Discard, o!())
}
