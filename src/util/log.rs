// src/util/log.rs

//! Logger Utility - severity-split log files for an unattended kiosk.
//!
//! Every entry goes to `<log dir>/<level>.log` and is mirrored as a `tracing`
//! event so the console subscriber installed in `main` sees it too.
use std::fs::{File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::{LazyLock, OnceLock};
use chrono::Local;

pub static DEBUG_ENABLED: OnceLock<bool> = OnceLock::new();

/// Global logger instance
pub static LOGGER: LazyLock<Logger> = LazyLock::new(|| {
    let dir = std::env::var("KIOSK_LOG_DIR").unwrap_or_else(|_| "./logs".to_string());
    Logger::new(&dir).unwrap_or_else(|e| {
        eprintln!("File logging disabled ({}): {}", dir, e);
        Logger::console_only()
    })
});

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    fn as_str(&self) -> &str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }

    fn filename(&self) -> &str {
        match self {
            LogLevel::Error => "error.log",
            LogLevel::Warn => "warn.log",
            LogLevel::Info => "info.log",
            LogLevel::Debug => "debug.log",
        }
    }
}

struct LogFiles {
    error: Mutex<File>,
    warn: Mutex<File>,
    info: Mutex<File>,
    debug: Mutex<File>,
}

/// Logger that writes to separate files by severity
pub struct Logger {
    log_dir: Option<PathBuf>,
    files: Option<LogFiles>,
}

impl Logger {
    /// Create a new logger with the specified directory
    pub fn new(log_dir: &str) -> std::io::Result<Self> {
        DEBUG_ENABLED.get_or_init(|| {
            std::env::var("DEBUG").unwrap_or_default() == "true"
        });

        let log_dir = PathBuf::from(log_dir);
        create_dir_all(&log_dir)?;

        // Truncate on start
        let open = |level: LogLevel| File::create(log_dir.join(level.filename())).map(Mutex::new);

        let files = LogFiles {
            error: open(LogLevel::Error)?,
            warn: open(LogLevel::Warn)?,
            info: open(LogLevel::Info)?,
            debug: open(LogLevel::Debug)?,
        };

        Ok(Self {
            log_dir: Some(log_dir),
            files: Some(files),
        })
    }

    /// Logger that only emits `tracing` events.
    pub fn console_only() -> Self {
        DEBUG_ENABLED.get_or_init(|| {
            std::env::var("DEBUG").unwrap_or_default() == "true"
        });
        Self {
            log_dir: None,
            files: None,
        }
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }

    fn write_log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Error => tracing::error!("{}", message),
            LogLevel::Warn => tracing::warn!("{}", message),
            LogLevel::Info => tracing::info!("{}", message),
            LogLevel::Debug => tracing::debug!("{}", message),
        }

        let Some(files) = &self.files else {
            return;
        };

        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let formatted = format!("[{}] [{}] {}\n", timestamp, level.as_str(), message);

        let file = match level {
            LogLevel::Error => &files.error,
            LogLevel::Warn => &files.warn,
            LogLevel::Info => &files.info,
            LogLevel::Debug => &files.debug,
        };

        if let Ok(mut file) = file.lock() {
            let _ = file.write_all(formatted.as_bytes());
            let _ = file.flush();
        }
    }

    pub fn error(&self, message: &str) {
        self.write_log(LogLevel::Error, message);
    }

    pub fn warn(&self, message: &str) {
        self.write_log(LogLevel::Warn, message);
    }

    pub fn info(&self, message: &str) {
        self.write_log(LogLevel::Info, message);
    }

    pub fn debug(&self, message: &str) {
        self.write_log(LogLevel::Debug, message);
    }
}

/// Convenience macro for error logging with formatting
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::util::log::LOGGER.error(&message);
    }};
}

/// Convenience macro for warning logging with formatting
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::util::log::LOGGER.warn(&message);
    }};
}

/// Convenience macro for info logging with formatting
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::util::log::LOGGER.info(&message);
    }};
}

/// Convenience macro for debug logging with formatting
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        if *$crate::util::log::DEBUG_ENABLED.get().unwrap_or(&false) {
            let message = format!($($arg)*);
            $crate::util::log::LOGGER.debug(&message);
        }
    }};
}
