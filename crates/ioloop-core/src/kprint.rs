//! Leveled stderr logging for ioloop
//!
//! Every line is formatted into one buffer and written with a single
//! `write_all` under the stderr lock, so lines from the reactor thread,
//! sender threads and forked helpers never interleave mid-line.
//!
//! Line layout: `[LEVEL] +<secs>.<micros> <pid>/<thread> message`. The
//! offset is measured from the first log call on a monotonic clock, which
//! makes timer drift readable straight from the log.
//!
//! # Environment Variables
//!
//! - `IOLOOP_LOG_LEVEL=<level>` - off|error|warn|info|debug|trace (or 0..5)
//! - `IOLOOP_FLUSH_EPRINT=1` - flush stderr after each line
//! - `IOLOOP_LOG_TIMESTAMPS=0` - drop the `+secs` offset
//!
//! # Usage
//!
//! ```ignore
//! use ioloop_core::{kdebug, kerror, kinfo};
//!
//! kinfo!("listening on {}", path);
//! kdebug!("fd {} closed by peer", fd);
//! kerror!("send on fd {} failed: {}", fd, err);
//! ```

use crate::env::parse_bool;

use std::fmt::Write as _;
use std::io::Write as _;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Once, OnceLock};
use std::time::Instant;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    const ALL: [LogLevel; 6] = [
        LogLevel::Off,
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    /// Saturates at `Trace`.
    pub fn from_u8(v: u8) -> Self {
        Self::ALL[usize::from(v.min(LogLevel::Trace as u8))]
    }

    /// Parse a level name or digit. Unknown input yields `None`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u8>() {
            return (n <= LogLevel::Trace as u8).then(|| Self::from_u8(n));
        }
        Self::ALL
            .into_iter()
            .find(|l| l.name().eq_ignore_ascii_case(s))
            .or_else(|| s.eq_ignore_ascii_case("warning").then_some(LogLevel::Warn))
    }

    pub fn name(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN] ",
            LogLevel::Info => "[INFO] ",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }
}

// Low 3 bits: level. Then one bit per output option.
const LEVEL_MASK: u8 = 0b0000_0111;
const FLUSH: u8 = 0b0000_1000;
const TIMESTAMPS: u8 = 0b0001_0000;

static SETTINGS: AtomicU8 = AtomicU8::new(LogLevel::Info as u8 | TIMESTAMPS);
static ENV_LOADED: Once = Once::new();
static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Unset or unrecognised values leave the setting alone.
fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key).ok().and_then(|v| parse_bool(&v))
}

fn update(mask: u8, bits: u8) {
    let _ = SETTINGS.fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
        Some((s & !mask) | (bits & mask))
    });
}

/// Load `IOLOOP_LOG_*` settings from the environment.
///
/// Runs lazily on the first log call. Calling it early pins the snapshot
/// and starts the timestamp clock.
pub fn init() {
    ENV_LOADED.call_once(|| {
        EPOCH.get_or_init(Instant::now);
        if let Some(level) = std::env::var("IOLOOP_LOG_LEVEL")
            .ok()
            .and_then(|v| LogLevel::parse(&v))
        {
            update(LEVEL_MASK, level as u8);
        }
        if let Some(flush) = env_flag("IOLOOP_FLUSH_EPRINT") {
            update(FLUSH, if flush { FLUSH } else { 0 });
        }
        if let Some(ts) = env_flag("IOLOOP_LOG_TIMESTAMPS") {
            update(TIMESTAMPS, if ts { TIMESTAMPS } else { 0 });
        }
    });
}

#[inline]
fn settings() -> u8 {
    init();
    SETTINGS.load(Ordering::Relaxed)
}

#[inline]
pub fn log_level() -> LogLevel {
    LogLevel::from_u8(settings() & LEVEL_MASK)
}

#[inline]
pub fn flush_enabled() -> bool {
    settings() & FLUSH != 0
}

/// Overrides `IOLOOP_LOG_LEVEL`.
pub fn set_log_level(level: LogLevel) {
    init();
    update(LEVEL_MASK, level as u8);
}

pub fn set_flush_enabled(enabled: bool) {
    init();
    update(FLUSH, if enabled { FLUSH } else { 0 });
}

pub fn set_timestamps_enabled(enabled: bool) {
    init();
    update(TIMESTAMPS, if enabled { TIMESTAMPS } else { 0 });
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level <= log_level()
}

fn emit(line: &str) {
    let mut err = std::io::stderr().lock();
    let _ = err.write_all(line.as_bytes());
    if flush_enabled() {
        let _ = err.flush();
    }
}

/// Build one log line without touching stderr.
fn format_line(level: LogLevel, with_time: bool, args: std::fmt::Arguments<'_>) -> String {
    let mut line = String::with_capacity(96);
    line.push_str(level.tag());
    if with_time {
        let since = EPOCH.get_or_init(Instant::now).elapsed();
        let _ = write!(line, " +{}.{:06}", since.as_secs(), since.subsec_micros());
    }
    let current = std::thread::current();
    let _ = write!(
        line,
        " {}/{} ",
        std::process::id(),
        current.name().unwrap_or("-")
    );
    let _ = line.write_fmt(args);
    line.push('\n');
    line
}

#[doc(hidden)]
pub fn _kprint_impl(args: std::fmt::Arguments<'_>, newline: bool) {
    let mut line = args.to_string();
    if newline {
        line.push('\n');
    }
    emit(&line);
}

#[doc(hidden)]
pub fn _klog_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    let s = settings();
    if level == LogLevel::Off || level as u8 > s & LEVEL_MASK {
        return;
    }
    emit(&format_line(level, s & TIMESTAMPS != 0, args));
}

// ============================================================================
// Public Macros
// ============================================================================

/// Print to stderr (no newline, no prefix)
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {
        $crate::kprint::_kprint_impl(format_args!($($arg)*), false)
    };
}

#[macro_export]
macro_rules! kprintln {
    () => {
        $crate::kprint::_kprint_impl(format_args!(""), true)
    };
    ($($arg:tt)*) => {
        $crate::kprint::_kprint_impl(format_args!($($arg)*), true)
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __klog {
    ($level:ident, $($arg:tt)*) => {
        $crate::kprint::_klog_impl($crate::kprint::LogLevel::$level, format_args!($($arg)*))
    };
}

/// Shown unless logging is off
#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => { $crate::__klog!(Error, $($arg)*) };
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => { $crate::__klog!(Warn, $($arg)*) };
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => { $crate::__klog!(Info, $($arg)*) };
}

/// Registration and lifecycle detail
#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => { $crate::__klog!(Debug, $($arg)*) };
}

/// Per-dispatch detail
#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => { $crate::__klog!(Trace, $($arg)*) };
}
