//! Kernel logging subsystem.
//!
//! Backend for the `log` facade: every record becomes one coloured
//! `[LEVEL] target: message` line on COM1. `print!`/`println!` bypass the
//! facade for raw console output such as the panic banner.
#![no_std]

use core::fmt;

use log::{Level, LevelFilter, Log, Metadata, Record};

/// ANSI colour and padded label for a level.
fn style(level: Level) -> (&'static str, &'static str) {
    match level {
        Level::Trace => ("\x1b[90m", "TRACE"), // Gray
        Level::Debug => ("\x1b[36m", "DEBUG"), // Cyan
        Level::Info => ("\x1b[32m", " INFO"),  // Green
        Level::Warn => ("\x1b[33m", " WARN"),  // Yellow
        Level::Error => ("\x1b[31m", "ERROR"), // Red
    }
}

const RESET: &str = "\x1b[0m";

pub struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let (colour, label) = style(record.level());
        // Records can come from trap context. If the interrupted code holds
        // the console, the line is dropped.
        khal::serial::try_write_fmt(format_args!(
            "{}[{}]{} {}: {}\n",
            colour,
            label,
            RESET,
            record.target(),
            record.args()
        ));
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Bring up the serial port and install the logger at `level`. Calling it
/// again only changes the level.
pub fn init(level: LevelFilter) {
    khal::serial::init();
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

/// Change the level after `init`.
pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}

/// Print to serial without formatting
pub fn print(args: fmt::Arguments) {
    khal::serial::write_fmt(args);
}

/// Highlighted line for panic and fatal-exception banners. Never blocks on
/// the console lock.
pub fn banner(args: fmt::Arguments) {
    khal::serial::try_write_fmt(format_args!("\x1b[1;41;97m{}{}\n", args, RESET));
}

/// Print without newline
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::print(format_args!($($arg)*))
    };
}

/// Print with newline
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => {{
        $crate::print(format_args!($($arg)*));
        $crate::print(format_args!("\n"));
    }};
}
