//! Detects when files written into a watched directory have settled.
//!
//! Producers copying or streaming a file into a drop directory give no
//! explicit "transfer complete" signal, yet downstream import jobs must not
//! act on a half-written file. This crate watches a directory for
//! create/change notifications and reports [`WatchEvent::FileReady`] for a
//! file once two conditions hold on the same poll tick: its size stopped
//! growing since the previous tick, and it can be opened exclusively (the
//! writer has closed its handle).
//!
//! Sizes are sampled through an open handle rather than directory metadata,
//! which can lag behind an in-progress copy or already advertise the final
//! size. Growth always resets the stall clock, so a file is never reported
//! while it is still being written, even when the writer pauses between
//! buffered writes.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use filesettle::{DirectoryWatcher, WatchEvent, WatcherConfig};
//!
//! # async fn run() -> filesettle::Result<()> {
//! let config = WatcherConfig::new("/var/ingest", "*.csv")
//!     .poll_interval(Duration::from_millis(500));
//! let (watcher, mut events) = DirectoryWatcher::new(config)?;
//! watcher.start().await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         WatchEvent::FileReady(path) => println!("ready: {}", path.display()),
//!         WatchEvent::WatchError(cause) => eprintln!("watch error: {cause}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod monitor;
pub mod probe;
pub mod registry;
pub mod watcher;

pub use config::WatcherConfig;
pub use error::{Result, SettleError};
pub use monitor::StabilityMonitor;
pub use probe::{AccessProbe, ExclusiveAccessProbe, HandleSizeProbe, SizeProbe};
pub use registry::WatchRegistry;
pub use watcher::{DirectoryWatcher, WatchEvent};
