//! Process-wide cancellation driven by SIGINT/SIGTERM.
//!
//! The signal handler only flips an atomic; every long-running loop polls
//! the token and is expected to wind down within one 50 ms cycle.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;

#[derive(Clone, Debug)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    /// Installs SIGINT and SIGTERM handlers and returns the shared token.
    pub fn install() -> io::Result<Interrupt> {
        let flag = Arc::new(AtomicBool::new(false));
        flag::register(SIGINT, Arc::clone(&flag))?;
        flag::register(SIGTERM, Arc::clone(&flag))?;
        Ok(Interrupt { flag })
    }

    /// A token with no signal wiring, for tests and embedded use.
    pub fn manual() -> Interrupt {
        Interrupt {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}
