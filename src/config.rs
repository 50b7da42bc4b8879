use std::path::PathBuf;
use std::time::Duration;

use glob::Pattern;

use crate::error::{Result, SettleError};

/// Configuration knobs for directory watching.
#[derive(Clone, Debug)]
pub struct WatcherConfig {
    /// Directory whose files are watched for settlement.
    pub root: PathBuf,
    /// Glob-style name filter; only files whose name matches are tracked
    /// (e.g. `*.csv`).
    pub filter: String,
    /// Interval between size samples while a file is in flight.
    pub poll_interval: Duration,
    /// Whether files in subdirectories of the root are watched too.
    pub recursive: bool,
}

impl WatcherConfig {
    pub fn new(root: impl Into<PathBuf>, filter: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            filter: filter.into(),
            poll_interval: Duration::from_millis(1000),
            recursive: true,
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Validate the configuration and compile the name filter.
    pub(crate) fn compile_filter(&self) -> Result<Pattern> {
        if self.root.as_os_str().is_empty() {
            return Err(SettleError::InvalidConfig(
                "root path must not be empty".into(),
            ));
        }
        if self.filter.trim().is_empty() {
            return Err(SettleError::InvalidConfig(
                "name filter must not be empty".into(),
            ));
        }
        Pattern::new(&self.filter).map_err(|err| {
            SettleError::InvalidConfig(format!("bad name filter {:?}: {err}", self.filter))
        })
    }
}
