//! Kernel-style print macros for dpthread
//!
//! Thread-safe, optionally-flushing diagnostic output similar to printk.
//! Lines written from a kthread carry a `[kN]` prefix naming the core.
//!
//! # Environment Variables
//!
//! - `DPT_FLUSH_EPRINT=1` - Flush stderr after each print (useful for debugging crashes)
//! - `DPT_LOG_LEVEL=<level>` - Set log level: 0=off, 1=error, 2=warn, 3=info, 4=debug, 5=trace
//!
//! # Usage
//!
//! ```ignore
//! use dpthread_core::{kdebug, kinfo, kbug};
//!
//! kinfo!("kthread {} started", id);
//! kdebug!("stole {} threads from {}", n, victim);
//! kbug!("thread {} readied twice", th);   // logs and aborts
//! ```

use std::cell::Cell;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Log levels (matches common conventions)
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
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "1" => Some(LogLevel::Error),
            "warn" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    pub fn prefix(&self) -> &'static str {
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

// Global configuration (initialized once)
static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

const NO_CORE: u32 = u32::MAX;

thread_local! {
    static CORE_TAG: Cell<u32> = const { Cell::new(NO_CORE) };
}

/// Initialize logging from environment variables
///
/// Called automatically on first log, but can be called explicitly for
/// deterministic initialization.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    if let Ok(val) = std::env::var("DPT_FLUSH_EPRINT") {
        let flush = matches!(val.as_str(), "1" | "true" | "yes" | "on");
        FLUSH_ENABLED.store(flush, Ordering::Relaxed);
    }

    if let Ok(val) = std::env::var("DPT_LOG_LEVEL") {
        let level = LogLevel::parse(&val).unwrap_or(LogLevel::Info);
        LOG_LEVEL.store(level as u8, Ordering::Relaxed);
    }
}

#[inline]
pub fn flush_enabled() -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    FLUSH_ENABLED.load(Ordering::Relaxed)
}

#[inline]
pub fn log_level() -> LogLevel {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Set log level programmatically (overrides `DPT_LOG_LEVEL`)
pub fn set_log_level(level: LogLevel) {
    INITIALIZED.store(true, Ordering::SeqCst);
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn set_flush_enabled(enabled: bool) {
    FLUSH_ENABLED.store(enabled, Ordering::Relaxed);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level as u8 <= log_level() as u8
}

/// Tag log lines from this OS thread with a core index
pub fn set_core_id(core: u32) {
    CORE_TAG.with(|c| c.set(core));
}

pub fn clear_core_id() {
    CORE_TAG.with(|c| c.set(NO_CORE));
}

fn write_core_tag(handle: &mut impl Write) {
    let core = CORE_TAG.with(|c| c.get());
    if core != NO_CORE {
        let _ = write!(handle, "[k{}] ", core);
    }
}

#[doc(hidden)]
pub fn _kprint_impl(args: std::fmt::Arguments<'_>) {
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = handle.write_fmt(args);
    if flush_enabled() {
        let _ = handle.flush();
    }
}

#[doc(hidden)]
pub fn _kprintln_impl(args: std::fmt::Arguments<'_>) {
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    write_core_tag(&mut handle);
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");
    if flush_enabled() {
        let _ = handle.flush();
    }
}

#[doc(hidden)]
pub fn _klog_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = write!(handle, "{} ", level.prefix());
    write_core_tag(&mut handle);
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");
    if flush_enabled() {
        let _ = handle.flush();
    }
}

/// Report a broken scheduler invariant and abort the process
///
/// Printed regardless of the configured level and always flushed.
#[doc(hidden)]
#[cold]
pub fn _kbug_impl(file: &str, line: u32, args: std::fmt::Arguments<'_>) -> ! {
    {
        let stderr = std::io::stderr();
        let mut handle = stderr.lock();
        let _ = write!(handle, "[BUG]   ");
        write_core_tag(&mut handle);
        let _ = write!(handle, "{}:{}: ", file, line);
        let _ = handle.write_fmt(args);
        let _ = handle.write_all(b"\n");
        let _ = handle.flush();
    }
    std::process::abort()
}

// ============================================================================
// Public Macros
// ============================================================================

/// Print to stderr (no newline)
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {{
        $crate::kprint::_kprint_impl(format_args!($($arg)*));
    }};
}

/// Print to stderr with newline
#[macro_export]
macro_rules! kprintln {
    () => {{
        $crate::kprint::_kprintln_impl(format_args!(""));
    }};
    ($($arg:tt)*) => {{
        $crate::kprint::_kprintln_impl(format_args!($($arg)*));
    }};
}

/// Error level log (always shown unless logging is off)
#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Error,
            format_args!($($arg)*)
        );
    }};
}

/// Warning level log
#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Warn,
            format_args!($($arg)*)
        );
    }};
}

/// Info level log
#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Info,
            format_args!($($arg)*)
        );
    }};
}

/// Debug level log
#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Debug,
            format_args!($($arg)*)
        );
    }};
}

/// Trace level log (most verbose)
#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Trace,
            format_args!($($arg)*)
        );
    }};
}

/// Fatal scheduler invariant violation: log with location, then abort
#[macro_export]
macro_rules! kbug {
    ($($arg:tt)*) => {{
        $crate::kprint::_kbug_impl(file!(), line!(), format_args!($($arg)*))
    }};
}

/// `kbug!` unless `cond` holds; compiled in when `dpthread_core::CHECKED`
#[macro_export]
macro_rules! kassert {
    ($cond:expr $(,)?) => {{
        if $crate::CHECKED && !($cond) {
            $crate::kbug!("assertion failed: {}", stringify!($cond));
        }
    }};
    ($cond:expr, $($arg:tt)+) => {{
        if $crate::CHECKED && !($cond) {
            $crate::kbug!($($arg)+);
        }
    }};
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_levels() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(LogLevel::parse("debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("TRACE"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::parse("2"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("loud"), None);
        assert_eq!(LogLevel::from_u8(99), LogLevel::Trace);
    }

    #[test]
    fn test_core_tag() {
        let mut buf = Vec::new();
        write_core_tag(&mut buf);
        assert!(buf.is_empty());

        set_core_id(3);
        write_core_tag(&mut buf);
        assert_eq!(buf, b"[k3] ");
        clear_core_id();
    }

    #[test]
    fn test_macros_compile() {
        set_log_level(LogLevel::Off);

        kprint!("test");
        kprintln!("test {}", 42);
        kerror!("error {}", "msg");
        kwarn!("warn");
        kinfo!("info");
        kdebug!("debug");
        ktrace!("trace");
        kassert!(1 + 1 == 2);
        kassert!(true, "never printed {}", 0);
    }
}
