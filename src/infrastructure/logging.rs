//! Logging system configuration and initialization
//!
//! - Console and/or file output, optional JSON formatting
//! - The previous log file is renamed with its timestamp on start-up
//! - Old files are pruned beyond `max_files`
//! - Noisy dependency targets are clamped unless the level is `trace`;
//!   `RUST_LOG` overrides the whole filter

use anyhow::{Result, anyhow};
use chrono::Local;
use lazy_static::lazy_static;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;

// Keeps the non-blocking file writers alive for the life of the process
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> = Mutex::new(Vec::new());
}

/// Local wall-clock timestamps with milliseconds.
struct LocalTimeFormatter;

impl FormatTime for LocalTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Default log directory: `logs/` next to the executable.
pub fn get_log_directory() -> PathBuf {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

    exe_dir.join("logs")
}

fn resolve_log_directory(config: &LoggingConfig) -> PathBuf {
    config.log_dir.clone().unwrap_or_else(get_log_directory)
}

/// Initialize the logging system with default configuration
pub fn init_logging() -> Result<()> {
    init_logging_with_config(LoggingConfig::default())
}

/// Rename an existing log file to `{stem}.{timestamp}.log`.
fn rotate_existing_log_file(log_dir: &Path, log_file_name: &str) -> Result<Option<String>> {
    let log_file_path = log_dir.join(log_file_name);
    if !log_file_path.exists() {
        return Ok(None);
    }

    let metadata = std::fs::metadata(&log_file_path)
        .map_err(|e| anyhow!("Failed to get log file metadata: {e}"))?;
    let file_time = metadata
        .modified()
        .or_else(|_| metadata.created())
        .unwrap_or_else(|_| std::time::SystemTime::now());
    let datetime: chrono::DateTime<Local> = file_time.into();

    let file_stem = log_file_name.trim_end_matches(".log");
    let timestamped_name = format!("{file_stem}.{}.log", datetime.format("%Y%m%dT%H%M%S"));
    let timestamped_path = log_dir.join(&timestamped_name);

    std::fs::rename(&log_file_path, &timestamped_path).map_err(|e| {
        anyhow!(
            "Failed to rotate log file {} to {}: {e}",
            log_file_path.display(),
            timestamped_path.display()
        )
    })?;

    Ok(Some(timestamped_name))
}

/// Directives that quiet dependency internals unless `trace` is requested.
fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut filter = EnvFilter::new(&config.level);
    if !config.level.to_lowercase().contains("trace") {
        for directive in [
            "sqlx::query=warn",
            "sqlx::sqlite=warn",
            "reqwest=info",
            "hyper=warn",
            "hyper_util=warn",
            "h2=warn",
            "tokio=info",
            "runtime=warn",
            "axum=info",
            "tower_http=info",
            "tungstenite=warn",
        ] {
            filter = filter.add_directive(directive.parse()?);
        }
        filter = filter.add_directive(format!("energy_price_crawler={}", config.level).parse()?);
    }
    Ok(filter)
}

/// Initialize logging with custom configuration
///
/// ```bash
/// # Show SQL statements on a debug run
/// RUST_LOG="debug,sqlx::query=debug" energy-price-crawler
/// ```
pub fn init_logging_with_config(config: LoggingConfig) -> Result<()> {
    let log_dir = resolve_log_directory(&config);
    let env_filter = build_filter(&config)?;
    let registry = Registry::default().with(env_filter);

    let mut rotated = None;
    let file_writer = if config.file_output {
        std::fs::create_dir_all(&log_dir)
            .map_err(|e| anyhow!("Failed to create log directory {}: {e}", log_dir.display()))?;
        rotated = rotate_existing_log_file(&log_dir, &config.file_name)?;

        let (writer, guard) = non_blocking(rolling::never(&log_dir, &config.file_name));
        LOG_GUARDS
            .lock()
            .map_err(|_| anyhow!("log guard registry poisoned"))?
            .push(guard);
        Some(writer)
    } else {
        None
    };

    match (file_writer, config.console_output) {
        (Some(writer), console) => {
            if config.json_format {
                let file_layer = fmt::Layer::new()
                    .json()
                    .with_writer(writer)
                    .with_timer(LocalTimeFormatter)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_ansi(false);
                let console_layer = console.then(|| {
                    fmt::Layer::new()
                        .with_writer(std::io::stdout)
                        .with_timer(LocalTimeFormatter)
                        .with_target(false)
                });
                registry.with(file_layer).with(console_layer).try_init()?;
            } else {
                let file_layer = fmt::Layer::new()
                    .with_writer(writer)
                    .with_timer(LocalTimeFormatter)
                    .with_target(false)
                    .with_ansi(false);
                let console_layer = console.then(|| {
                    fmt::Layer::new()
                        .with_writer(std::io::stdout)
                        .with_timer(LocalTimeFormatter)
                        .with_target(false)
                });
                registry.with(file_layer).with(console_layer).try_init()?;
            }
        }
        (None, true) => {
            let console_layer = fmt::Layer::new()
                .with_writer(std::io::stdout)
                .with_timer(LocalTimeFormatter)
                .with_target(false);
            registry.with(console_layer).try_init()?;
        }
        (None, false) => return Err(anyhow!("No logging output configured")),
    }

    if let Some(name) = rotated {
        info!("Rotated existing log file to: {name}");
    }
    if config.file_output && config.auto_cleanup_logs {
        let removed = cleanup_old_logs(&log_dir, &config)?;
        if removed > 0 {
            info!("Removed {removed} old log files");
        }
    }

    info!("Logging system initialized");
    info!("Log directory: {}", log_dir.display());
    info!("Log level: {} (json: {}, console: {}, file: {})", config.level, config.json_format, config.console_output, config.file_output);
    Ok(())
}

/// Log system information for diagnostics
pub fn log_system_info() {
    info!("=== Energy Price Crawler ===");
    info!("Application version: {}", env!("CARGO_PKG_VERSION"));
    info!("Operating system: {}", std::env::consts::OS);
    info!("Architecture: {}", std::env::consts::ARCH);
    if let Ok(current_dir) = std::env::current_dir() {
        info!("Working directory: {}", current_dir.display());
    }
    info!("============================");
}

/// Delete `.log` files beyond the configured retention, newest kept first.
fn cleanup_old_logs(log_dir: &Path, config: &LoggingConfig) -> Result<usize> {
    if !log_dir.exists() {
        return Ok(0);
    }

    let mut log_files = Vec::new();
    for entry in std::fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_log = path.extension().is_some_and(|ext| ext == "log");
        if path.is_file() && is_log {
            if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
                log_files.push((path, modified));
            }
        }
    }
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    let keep = if config.keep_only_latest { 1 } else { config.max_files as usize };
    let mut removed = 0;
    for (path, _) in log_files.iter().skip(keep) {
        match std::fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to remove old log file {}: {e}", path.display()),
        }
    }
    Ok(removed)
}
