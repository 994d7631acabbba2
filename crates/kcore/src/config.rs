//! Boot-time tunables, parsed from the kernel command line.
//!
//! ```text
//! hz=250 stack=64 reap=ring exceptions=report loglevel=debug
//! ```
//!
//! Unknown keys belong to someone else and are skipped. A malformed value
//! keeps the default and logs a warning.

use log::LevelFilter;

use crate::exception::ExceptionPolicy;
use crate::sched::{KERNEL_STACK_SIZE, MIN_STACK_SIZE, ReapScope};

/// Default PIT rate: one tick per millisecond.
pub const DEFAULT_TICK_HZ: u32 = 1000;

/// Range the PIT divisor can express (1_193_182 Hz base clock, 16-bit
/// divisor).
pub const MIN_TICK_HZ: u32 = 19;
pub const MAX_TICK_HZ: u32 = 1_193_182;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub tick_hz: u32,
    /// Per-thread kernel stack, bytes.
    pub stack_size: usize,
    pub reap: ReapScope,
    pub exceptions: ExceptionPolicy,
    pub log_level: LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_hz: DEFAULT_TICK_HZ,
            stack_size: KERNEL_STACK_SIZE,
            reap: ReapScope::Successors,
            exceptions: ExceptionPolicy::Fatal,
            log_level: LevelFilter::Info,
        }
    }
}

impl Config {
    pub fn from_cmdline(cmdline: &str) -> Self {
        let mut config = Self::default();
        for token in cmdline.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            match key {
                "hz" => match value.parse::<u32>() {
                    Ok(hz) => config.tick_hz = hz.clamp(MIN_TICK_HZ, MAX_TICK_HZ),
                    Err(_) => malformed(key, value),
                },
                "stack" => match value.parse::<usize>() {
                    Ok(kib) => {
                        config.stack_size = kib.saturating_mul(1024).max(MIN_STACK_SIZE)
                    }
                    Err(_) => malformed(key, value),
                },
                "reap" => match value {
                    "successors" => config.reap = ReapScope::Successors,
                    "ring" => config.reap = ReapScope::Ring,
                    _ => malformed(key, value),
                },
                "exceptions" => match value {
                    "fatal" => config.exceptions = ExceptionPolicy::Fatal,
                    "report" if cfg!(debug_assertions) => {
                        config.exceptions = ExceptionPolicy::Report
                    }
                    "report" => log::warn!("exceptions=report needs a debug build; staying fatal"),
                    _ => malformed(key, value),
                },
                "loglevel" => match value.parse::<LevelFilter>() {
                    Ok(level) => config.log_level = level,
                    Err(_) => malformed(key, value),
                },
                _ => {}
            }
        }
        config
    }
}

fn malformed(key: &str, value: &str) {
    log::warn!("ignoring malformed {}={}", key, value);
}
