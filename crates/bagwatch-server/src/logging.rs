//! Tracing setup for the server binary.
//!
//! `logging.production = true` writes JSON lines to a daily rolling file and
//! plain compact lines to stdout for the journal. Otherwise everything goes
//! to stdout in the pretty format, with span open/close events.

use std::path::PathBuf;

use bagwatch_core::config::LoggingConfig;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Overrides `logging.level` when set.
pub const LOG_LEVEL_ENV: &str = "BAGWATCH_LOG_LEVEL";

const LOG_FILE_PREFIX: &str = "bagwatch";

/// Flushes the background log writers when dropped. Hold it until exit.
#[must_use = "dropping the guard stops buffered log output"]
pub struct LogGuard {
    _writers: Vec<WorkerGuard>,
}

/// Install the global subscriber.
///
/// The filter is `RUST_LOG` if set, else `BAGWATCH_LOG_LEVEL`, else
/// `config.level`. In production mode a log directory that cannot be
/// created only disables the file output.
///
/// # Errors
///
/// Returns an error if the filter does not parse or a subscriber is
/// already installed.
pub fn init(config: &LoggingConfig) -> anyhow::Result<LogGuard> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level_directive(
            std::env::var(LOG_LEVEL_ENV).ok(),
            &config.level,
        ))?,
    };

    let mut writers = Vec::new();
    let mut file_error = None;

    let file_layer = if config.production {
        match open_log_file(&log_directory()) {
            Ok((writer, guard)) => {
                writers.push(guard);
                Some(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(writer)
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true),
                )
            }
            Err(err) => {
                file_error = Some(err);
                None
            }
        }
    } else {
        None
    };

    let journal_layer = config.production.then(|| {
        let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
        writers.push(guard);
        tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(writer)
            .with_ansi(false)
    });

    let pretty_layer = (!config.production).then(|| {
        tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(journal_layer)
        .with(pretty_layer)
        .try_init()?;

    if let Some(err) = file_error {
        tracing::warn!(%err, "file logging disabled");
    }

    Ok(LogGuard { _writers: writers })
}

/// `BAGWATCH_LOG_LEVEL` wins over the configured level; blanks are ignored.
fn level_directive(env_level: Option<String>, configured: &str) -> String {
    env_level
        .filter(|level| !level.trim().is_empty())
        .unwrap_or_else(|| configured.to_string())
}

fn open_log_file(dir: &std::path::Path) -> std::io::Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)?;
    let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
    Ok(tracing_appender::non_blocking(appender))
}

/// `/var/log/bagwatch` on Linux, the platform data dir elsewhere.
fn log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/bagwatch")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "bagwatch")
            .map_or_else(|| PathBuf::from("./logs"), |dirs| dirs.data_dir().join("logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_level_overrides_config() {
        assert_eq!(level_directive(Some("debug".into()), "info"), "debug");
        assert_eq!(level_directive(None, "warn"), "warn");
        assert_eq!(level_directive(Some("  ".into()), "info"), "info");
    }

    #[test]
    fn test_log_file_opens_in_fresh_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("logs").join("bagwatch");
        let (_writer, _guard) = open_log_file(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
