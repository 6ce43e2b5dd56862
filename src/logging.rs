use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::VmcliError;

/// Log level names accepted on the command line, in the environment and
/// in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, clap::ValueEnum)]
pub enum LogLevel {
    Notset,
    Debug,
    Info,
    #[default]
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Case-insensitive lookup, e.g. `INFO` or `warning`.
    pub fn parse(s: &str) -> Option<Self> {
        <Self as clap::ValueEnum>::from_str(s.trim(), true).ok()
    }

    fn directive(self) -> &'static str {
        match self {
            LogLevel::Notset => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }

    /// Filter for our own events; dependencies only report errors.
    pub fn filter(self) -> EnvFilter {
        EnvFilter::new(format!("error,vmcli={}", self.directive()))
    }
}

/// Install the global subscriber. Logs go to stderr, or only to
/// `log_path` (appended, no ANSI) when one is configured. `quiet`
/// turns everything off.
pub fn init(level: LogLevel, quiet: bool, log_path: Option<&Path>) -> Result<(), VmcliError> {
    let filter = if quiet {
        EnvFilter::new("off")
    } else {
        level.filter()
    };

    let file = match log_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|source| VmcliError::ConfigLoad {
                    path: parent.display().to_string(),
                    source,
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| VmcliError::ConfigLoad {
                    path: path.display().to_string(),
                    source,
                })?;
            Some(file)
        }
        None => None,
    };

    let stderr_layer = file.is_none().then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });
    let file_layer = file.map(|f| {
        tracing_subscriber::fmt::layer()
            .with_writer(Mutex::new(f))
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| VmcliError::Configuration {
            message: format!("logging already initialised: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_are_case_insensitive() {
        assert_eq!(LogLevel::parse("INFO"), Some(LogLevel::Info));
        assert_eq!(LogLevel::parse("Critical"), Some(LogLevel::Critical));
        assert_eq!(LogLevel::parse(" notset "), Some(LogLevel::Notset));
        assert_eq!(LogLevel::parse("verbose"), None);
    }

    #[test]
    fn default_is_warning() {
        assert_eq!(LogLevel::default(), LogLevel::Warning);
    }
}
