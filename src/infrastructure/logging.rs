//! Logging system configuration and initialization
//!
//! - Console output with local timestamps
//! - Daily rolling file output (`bot.log.YYYY-MM-DD`) through a non-blocking writer
//! - Optional JSON formatting for the file layer
//! - `RUST_LOG` overrides the configured filter entirely
//! - Old rolled files are pruned at startup

#![allow(clippy::uninlined_format_args)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use chrono::Local;
use lazy_static::lazy_static;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;
use crate::infrastructure::config::defaults;

// Keeps the file writer alive for the lifetime of the process
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<WorkerGuard>> = Mutex::new(Vec::new());
}

/// Local wall-clock timestamps; the operators read logs in shop time.
struct LocalTimeFormatter;

impl FormatTime for LocalTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f %:z"))
    }
}

/// `logs/` next to the executable, or the current directory as a fallback
pub fn get_log_directory() -> PathBuf {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

    exe_dir.join("logs")
}

/// Initialize logging with the default configuration
pub fn init_logging() -> Result<()> {
    init_logging_with_config(&LoggingConfig::default())
}

/// Builds the filter used when `RUST_LOG` is not set.
///
/// Below trace level the chatty dependencies (CDP websocket traffic, HTTP
/// internals, the HTML parser) are held to the levels in `module_filters`.
pub fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    let mut filter = EnvFilter::new(&config.level);

    if !config.level.to_lowercase().contains("trace") {
        let directives = config
            .module_filters
            .iter()
            .map(|(module, level)| format!("{}={}", module, level))
            .chain(std::iter::once(format!("shopee_realtime_bot={}", config.level)));

        for directive in directives {
            match directive.parse() {
                Ok(parsed) => filter = filter.add_directive(parsed),
                Err(e) => eprintln!("Ignoring invalid log directive '{}': {}", directive, e),
            }
        }
    }

    filter
}

/// Initialize logging with a custom configuration
///
/// # Environment Variable Override
/// ```bash
/// # Show CDP traffic while debugging a stuck navigation
/// RUST_LOG="debug,chromiumoxide=debug" shopee-bot run
/// ```
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    if !config.console_output && !config.file_output {
        return Err(anyhow!("No logging output configured"));
    }

    let log_dir = config.log_dir.clone().unwrap_or_else(get_log_directory);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| build_env_filter(config));

    let console_layer = config.console_output.then(|| {
        fmt::Layer::new()
            .with_writer(std::io::stdout)
            .with_timer(LocalTimeFormatter)
            .with_target(false)
    });

    let file_layer = if config.file_output {
        std::fs::create_dir_all(&log_dir)
            .map_err(|e| anyhow!("Failed to create log directory {:?}: {}", log_dir, e))?;

        if config.auto_cleanup_logs {
            cleanup_old_logs(&log_dir, config.max_files as usize)?;
        }

        let file_appender = rolling::daily(&log_dir, defaults::LOG_FILE_PREFIX);
        let (file_writer, file_guard) = non_blocking(file_appender);
        LOG_GUARDS
            .lock()
            .map_err(|_| anyhow!("log guard registry poisoned"))?
            .push(file_guard);

        let layer = if config.json_format {
            fmt::Layer::new()
                .json()
                .with_writer(file_writer)
                .with_timer(LocalTimeFormatter)
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .boxed()
        } else {
            fmt::Layer::new()
                .with_writer(file_writer)
                .with_timer(LocalTimeFormatter)
                .with_target(false)
                .with_ansi(false)
                .boxed()
        };
        Some(layer)
    } else {
        None
    };

    Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))?;

    info!("Logging system initialized");
    info!("Log directory: {:?}", log_dir);
    info!("Log level: {}", config.level);
    info!("JSON format: {}", config.json_format);
    info!("Console output: {}, file output: {}", config.console_output, config.file_output);

    Ok(())
}

/// Log build and host information for diagnostics
pub fn log_system_info() {
    info!("=== Shopee realtime bot ===");
    info!("Application version: {}", env!("CARGO_PKG_VERSION"));
    info!("Operating system: {}", std::env::consts::OS);
    info!("Architecture: {}", std::env::consts::ARCH);

    if let Ok(current_dir) = std::env::current_dir() {
        info!("Working directory: {:?}", current_dir);
    }
    info!("===========================");
}

/// Removes the oldest rolled log files so at most `max_files` remain.
///
/// Only files whose name starts with the log prefix are considered.
/// Returns how many files were removed.
pub fn cleanup_old_logs(log_dir: &Path, max_files: usize) -> Result<usize> {
    if !log_dir.exists() {
        return Ok(0);
    }

    let mut log_files = Vec::new();
    for entry in std::fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(defaults::LOG_FILE_PREFIX));
        if !path.is_file() || !is_log {
            continue;
        }
        if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
            log_files.push((path, modified));
        }
    }

    if log_files.len() <= max_files {
        return Ok(0);
    }

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    let mut removed = 0;
    for (path, _) in log_files.iter().skip(max_files) {
        match std::fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to remove old log file {:?}: {}", path, e),
        }
    }
    Ok(removed)
}
