//! [`log`](https://docs.rs/log) facade backed by the UART console.
//!
//! Kept separate from [`crate::printf`] so that log records get a level
//! prefix and can eventually be filtered, without every `println!` caller
//! paying for it.

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::println;

struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };
        println!("[{level}] {}", record.args());
    }

    fn flush(&self) {}
}

/// Installs the console logger as the global [`log`] sink.
///
/// # Safety
/// Must be called only once during kernel initialization, before any other
/// hart starts logging.
pub unsafe fn init() -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(LevelFilter::Trace);
    Ok(())
}
