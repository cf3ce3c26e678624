//! Leveled kernel logger.
//!
//! Log lines go to the serial port and the VGA text buffer. Each line carries
//! a microsecond uptime stamp derived from the PIT-driven tick counter (the
//! logger is usable before the PIT is programmed; stamps are zero until then).

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

use crate::vga_buffer::{self, Color};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::Fatal => "FATAL",
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    const fn priority(self) -> u8 {
        match self {
            LogLevel::Fatal => 0,
            LogLevel::Error => 1,
            LogLevel::Warn => 2,
            LogLevel::Info => 3,
            LogLevel::Debug => 4,
            LogLevel::Trace => 5,
        }
    }

    fn serial_color(self) -> &'static str {
        match self {
            LogLevel::Fatal => "\x1b[1;37;41m",
            LogLevel::Error => "\x1b[1;31m",
            LogLevel::Warn => "\x1b[33m",
            LogLevel::Info => "\x1b[32m",
            LogLevel::Debug => "\x1b[36m",
            LogLevel::Trace => "\x1b[90m",
        }
    }

    fn badge_color(self) -> Color {
        match self {
            LogLevel::Fatal => Color::Red,
            LogLevel::Error => Color::LightRed,
            LogLevel::Warn => Color::Yellow,
            LogLevel::Info => Color::LightGreen,
            LogLevel::Debug => Color::LightCyan,
            LogLevel::Trace => Color::LightGray,
        }
    }
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(3); // Info

pub fn init() {
    crate::serial::init();
    let level = if cfg!(feature = "debug_verbose") {
        LogLevel::Trace
    } else {
        LogLevel::Info
    };
    set_level(level);
}

pub fn set_level(level: LogLevel) {
    LOG_LEVEL.store(level.priority(), Ordering::Relaxed);
}

pub fn log(level: LogLevel, args: fmt::Arguments<'_>) {
    if level.priority() > LOG_LEVEL.load(Ordering::Relaxed) {
        return;
    }

    let us = crate::time::uptime_us();
    crate::serial_println!(
        "{}[{:>5}]\x1b[0m [{:6}.{:06}] {}",
        level.serial_color(),
        level.as_str(),
        us / 1_000_000,
        us % 1_000_000,
        args
    );

    if level <= LogLevel::Info {
        vga_buffer::with_color(level.badge_color(), |w| {
            use core::fmt::Write;
            let _ = write!(w, "[{:>5}] ", level.as_str());
        });
        crate::println!("{}", args);
    }
}
