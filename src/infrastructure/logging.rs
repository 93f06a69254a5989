use crate::infrastructure::error::ScheduleError;
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_FILTER_ENV: &str = "MYSCHEDULE_LOG";
const LOG_FILE_PREFIX: &str = "schedule.log";
const DEFAULT_FILTER: &str = "info";

/// Installs the global subscriber: daily-rolling file in `logs_dir` plus
/// stdout. The returned guard must outlive the program's logging. Returns
/// `None` when a subscriber is already installed.
pub fn init_logging(logs_dir: &Path) -> Result<Option<WorkerGuard>, ScheduleError> {
    fs::create_dir_all(logs_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, logs_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true).with_writer(std::io::stdout);
    let file_layer = fmt::layer().with_ansi(false).with_writer(non_blocking);

    let installed = tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .with(env_filter())
        .try_init();

    Ok(installed.ok().map(|_| guard))
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
