use std::path::{Path, PathBuf};
use std::str::FromStr;

use slim_types::{Result, SlimError};
use tracing_appender::rolling;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILE: &str = "slim.log";

/// Console/file log encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = SlimError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(SlimError::Config(format!("unknown log format: {other}"))),
        }
    }
}

/// Split a log path into the rolling appender's directory and file prefix.
fn appender_target(log_path: &Path) -> (PathBuf, String) {
    let dir = log_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();
    let filename = log_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| DEFAULT_LOG_FILE.to_string());
    (dir, filename)
}

/// Initialize the tracing subscriber.
///
/// Logs go to stderr, plus a daily-rolling file when `log_file` is set.
/// `RUST_LOG` overrides `log_level`.
pub fn init_logging(log_level: &str, log_file: Option<&Path>, format: LogFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let file_appender = log_file.map(|path| {
        let (dir, filename) = appender_target(path);
        rolling::daily(dir, filename)
    });

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match format {
        LogFormat::Json => {
            let console = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_span_events(FmtSpan::CLOSE);
            let file = file_appender.map(|appender| {
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(appender)
                    .with_target(true)
                    .with_ansi(false)
            });
            registry.with(console).with(file).try_init()
        }
        LogFormat::Text => {
            let console = tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_ansi(true);
            let file = file_appender.map(|appender| {
                tracing_subscriber::fmt::layer()
                    .with_writer(appender)
                    .with_target(true)
                    .with_ansi(false)
            });
            registry.with(console).with(file).try_init()
        }
    };

    result.map_err(|e| SlimError::Other(format!("failed to initialize logging: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_parses() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!(" JSON ".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn appender_target_splits_path() {
        let (dir, name) = appender_target(Path::new("/var/log/slim/profile.log"));
        assert_eq!(dir, PathBuf::from("/var/log/slim"));
        assert_eq!(name, "profile.log");

        let (dir, name) = appender_target(Path::new("profile.log"));
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(name, "profile.log");
    }

    #[test]
    fn second_init_is_an_error_not_a_panic() {
        // Only this test installs a global subscriber.
        let first = init_logging("debug", None, LogFormat::Text);
        let second = init_logging("debug", None, LogFormat::Json);
        assert!(first.is_ok());
        assert!(second.is_err());
    }
}
