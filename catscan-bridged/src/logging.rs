use anyhow::{Context, Result};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use crate::config::LoggingConfig;

pub const DEFAULT_FILTER: &str = "catscan_bridged=info";

/// Install the global subscriber: console output plus, when enabled, the
/// daily scan log. Keep the returned guard alive until exit or buffered
/// lines are lost.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (file_layer, guard, file_error) = match config.file.then(|| file_writer(config)) {
        Some(Ok((writer, guard))) => (
            Some(fmt::layer().with_ansi(false).with_writer(writer)),
            Some(guard),
            None,
        ),
        Some(Err(e)) => (None, None, Some(e)),
        None => (None, None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    // Console logging still works without the file
    if let Some(e) = file_error {
        tracing::warn!("Scan log file disabled: {:#}", e);
    }

    Ok(guard)
}

/// Non-blocking writer rolling over daily to `<dir>/<prefix>.YYYY-MM-DD.log`
pub fn file_writer(config: &LoggingConfig) -> Result<(NonBlocking, WorkerGuard)> {
    let dir = config.resolved_dir();
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(config.file_prefix.as_str())
        .filename_suffix("log")
        .build(&dir)
        .with_context(|| format!("Failed to open log directory {}", dir.display()))?;

    Ok(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_scan_lines_reach_daily_file() {
        let dir = std::env::temp_dir().join(format!("catscan-log-{}", std::process::id()));
        let config = LoggingConfig {
            file: true,
            dir: dir.clone(),
            file_prefix: "qrdata".to_string(),
        };

        let (writer, guard) = file_writer(&config).unwrap();
        let subscriber = tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(writer));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("Received qrdata: SN-0042");
        });
        // Flushes the background writer
        drop(guard);

        let files: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);

        let name = files[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("qrdata.") && name.ends_with(".log"), "unexpected name {}", name);

        let contents = fs::read_to_string(&files[0]).unwrap();
        assert!(contents.contains("Received qrdata: SN-0042"));
        assert!(!contents.contains('\u{1b}'), "file log must not carry ANSI colours");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_unusable_directory_is_an_error() {
        // A regular file cannot serve as the log directory
        let path = std::env::temp_dir().join(format!("catscan-log-file-{}", std::process::id()));
        fs::write(&path, b"").unwrap();
        let config = LoggingConfig { dir: path.clone(), ..LoggingConfig::default() };

        assert!(file_writer(&config).is_err());

        fs::remove_file(&path).unwrap();
    }
}
