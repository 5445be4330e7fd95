//! Logging setup.
//!
//! Console output always; optionally JSON lines instead of the human format,
//! and a daily-rolling log file when a directory is configured. `RUST_LOG`
//! takes precedence over the configured filter.

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::LoggingSettings;
use crate::error::{Error, Result};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "wechat_relay=info,wechat_api=info,tower_http=info";

/// File name prefix of the rolling log file.
const LOG_FILE_NAME: &str = "wechat-relay.log";

/// Timestamps in the server's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Build the filter: `RUST_LOG` if set and valid, else the configured
/// directive, else [`DEFAULT_LOG_FILTER`].
fn build_filter(configured: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the global subscriber.
///
/// Returns the file writer guard when file output is enabled; keep it alive for
/// the lifetime of the process.
pub fn init_logging(settings: &LoggingSettings) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(&settings.filter);

    let directory = settings
        .directory
        .as_ref()
        .filter(|dir| !dir.as_os_str().is_empty());
    let (file_layer, guard) = match directory {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                Error::config(format!("cannot create log directory {}: {}", dir.display(), e))
            })?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console = (!settings.json).then(|| fmt::layer().with_ansi(true).with_timer(LocalTimer));
    let console_json = settings
        .json
        .then(|| fmt::layer().json().with_timer(LocalTimer));

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(console_json)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Other(format!("Failed to set global default subscriber: {}", e)))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert!(DEFAULT_LOG_FILTER.contains("wechat_relay=info"));
        assert!(DEFAULT_LOG_FILTER.contains("wechat_api=info"));
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }

    #[test]
    fn test_default_settings_use_default_filter() {
        assert_eq!(LoggingSettings::default().filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_local_timer_format() {
        let mut out = String::new();
        LocalTimer.format_time(&mut Writer::new(&mut out)).unwrap();
        // 2024-01-01T00:00:00.000+08:00
        assert_eq!(out.len(), 29);
        assert_eq!(&out[10..11], "T");
    }
}
