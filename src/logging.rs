//! `tracing` setup: an `EnvFilter` seeded from `--log-level`, plus an
//! optional file layer when `--log-dir` is given (spec §6).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use time::format_description::well_known::Iso8601;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;

/// Must be kept alive for the lifetime of the process; dropping it stops
/// the non-blocking file writer from flushing.
pub struct LoggingGuard(#[allow(dead_code)] Option<WorkerGuard>);

pub fn init(level: LogLevel, log_dir: Option<&Path>) -> Result<LoggingGuard> {
    let filter = EnvFilter::try_new(level.as_str()).unwrap_or_else(|_| EnvFilter::new("warn"));

    let registry = tracing_subscriber::registry().with(filter);

    match log_dir {
        None => {
            registry.with(fmt::layer().with_target(false)).init();
            Ok(LoggingGuard(None))
        }
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log dir {}", dir.display()))?;
            let file_name = log_file_name(dir)?;
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&file_name)
                .with_context(|| format!("opening log file {}", file_name.display()))?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file);

            registry
                .with(fmt::layer().with_target(false))
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                .init();
            Ok(LoggingGuard(Some(guard)))
        }
    }
}

fn log_file_name(dir: &Path) -> Result<PathBuf> {
    let now = time::OffsetDateTime::now_utc();
    let stamp = now.format(&Iso8601::DEFAULT).context("formatting timestamp")?;
    let pid = std::process::id();
    Ok(dir.join(format!("boundary-{stamp}-{pid}.log")))
}
