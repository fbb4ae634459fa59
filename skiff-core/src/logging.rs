//! Tracing subscriber setup

use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::config::schema::LoggingConfig;

const LOG_FILE_PREFIX: &str = "skiff.log";
const LOG_RETENTION_DAYS: u64 = 7;

/// Build the env filter: `RUST_LOG` wins, then the configured level, then per-module overrides.
pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    let level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.level.clone());
    let mut filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));

    for (module, level) in &config.overrides {
        match format!("{}={}", module, level).parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(_) => eprintln!("Invalid log directive: {}={}", module, level),
        }
    }
    filter
}

/// Initialize the logging system.
///
/// Logs go to stdout and to a daily rolling file under `config.dir`. The
/// returned guard must be held for the life of the process so the file
/// writer flushes.
pub fn init_logging(config: &LoggingConfig) -> WorkerGuard {
    let filter = build_filter(config);

    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| config.format.clone());
    let is_json = format.eq_ignore_ascii_case("json");

    let file_appender = tracing_appender::rolling::daily(&config.dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let stdout_layer = if is_json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer().with_target(true).with_thread_ids(true).boxed()
    };

    let file_layer = if is_json {
        fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    Registry::default()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    if let Err(e) = cleanup_old_logs(Path::new(&config.dir), LOG_RETENTION_DAYS) {
        eprintln!("Failed to clean up old logs: {}", e);
    }

    guard
}

/// Remove rolled log files older than `days`
fn cleanup_old_logs(dir: &Path, days: u64) -> std::io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let threshold = Duration::from_secs(days * 24 * 3600);
    let mut removed = 0;

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(LOG_FILE_PREFIX));
        if !path.is_file() || !is_log {
            continue;
        }

        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if age.is_some_and(|age| age > threshold) {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => eprintln!("Failed to remove old log file {:?}: {}", path, e),
            }
        }
    }
    Ok(removed)
}
