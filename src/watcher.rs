//! Directory watching front end.
//!
//! Wraps a `notify` subscription, routes create/change notifications for
//! matching file names into the [`WatchRegistry`], and rebuilds the
//! subscription whenever the notification source reports an error, so the
//! watch never stays silently dead.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use glob::Pattern;
use notify::{
    Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinHandle, spawn_blocking};
use tracing::{info, trace, warn};

use crate::config::WatcherConfig;
use crate::error::{Result, SettleError};
use crate::probe::{AccessProbe, ExclusiveAccessProbe, HandleSizeProbe, SizeProbe};
use crate::registry::WatchRegistry;

/// Events delivered to the watcher's consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchEvent {
    /// A file matching the filter finished writing and is fully readable.
    /// The path is no longer tracked afterwards; a later change
    /// notification for it starts a fresh monitoring session.
    FileReady(PathBuf),
    /// The notification source reported an error. The watcher resubscribes
    /// on its own; this is informational.
    WatchError(String),
}

/// Messages out of the notify callback.
enum SourceMessage {
    Event(Event),
    Error(String),
}

/// Watches one directory tree and reports files that have settled.
#[derive(Debug)]
pub struct DirectoryWatcher {
    config: WatcherConfig,
    pattern: Pattern,
    registry: Arc<WatchRegistry>,
    events_tx: mpsc::UnboundedSender<WatchEvent>,
    running: Mutex<Option<RunningWatch>>,
}

#[derive(Debug)]
struct RunningWatch {
    route_task: JoinHandle<()>,
}

impl DirectoryWatcher {
    /// Validate the configuration and prepare the watcher with the
    /// platform probes. Returns the receiver on which [`WatchEvent`]s are
    /// delivered.
    ///
    /// Fails synchronously on an empty root, an empty filter, or a
    /// malformed glob. Must be called from within a tokio runtime.
    pub fn new(config: WatcherConfig) -> Result<(Self, mpsc::UnboundedReceiver<WatchEvent>)> {
        Self::with_probes(
            config,
            Arc::new(HandleSizeProbe),
            Arc::new(ExclusiveAccessProbe),
        )
    }

    /// Like [`DirectoryWatcher::new`] with caller-supplied probes.
    pub fn with_probes(
        config: WatcherConfig,
        size_probe: Arc<dyn SizeProbe>,
        access_probe: Arc<dyn AccessProbe>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WatchEvent>)> {
        let pattern = config.compile_filter()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(WatchRegistry::new(
            config.poll_interval,
            size_probe,
            access_probe,
            events_tx.clone(),
        ));

        let watcher = Self {
            config,
            pattern,
            registry,
            events_tx,
            running: Mutex::new(None),
        };
        Ok((watcher, events_rx))
    }

    /// Subscribe to the notification source and begin routing events.
    /// No-op while already running.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        let (source_tx, source_rx) = mpsc::channel::<SourceMessage>(1024);
        let watcher = subscribe(
            self.config.root.clone(),
            recursive_mode(&self.config),
            source_tx.clone(),
        )
        .await?;
        info!(
            root = %self.config.root.display(),
            filter = %self.config.filter,
            "directory watch started"
        );

        let route_task = tokio::spawn(route_loop(
            watcher,
            source_rx,
            source_tx,
            self.config.clone(),
            self.pattern.clone(),
            Arc::clone(&self.registry),
            self.events_tx.clone(),
        ));
        *running = Some(RunningWatch { route_task });
        Ok(())
    }

    /// Drop the subscription. Monitors already in flight keep polling and
    /// may still deliver [`WatchEvent::FileReady`].
    pub async fn stop(&self) {
        if let Some(watch) = self.running.lock().await.take() {
            watch.route_task.abort();
            info!(root = %self.config.root.display(), "directory watch stopped");
        }
    }

    /// Stop watching and cancel every outstanding monitor. No further
    /// events are delivered afterwards.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.registry.shutdown().await;
    }

    /// Number of files currently being monitored.
    pub async fn in_flight(&self) -> usize {
        self.registry.in_flight().await
    }
}

fn recursive_mode(config: &WatcherConfig) -> RecursiveMode {
    if config.recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    }
}

/// Build a fresh notify subscription on the blocking pool.
async fn subscribe(
    root: PathBuf,
    mode: RecursiveMode,
    source_tx: mpsc::Sender<SourceMessage>,
) -> Result<RecommendedWatcher> {
    spawn_blocking(move || build_watcher(&root, mode, source_tx))
        .await
        .map_err(|err| SettleError::Internal(format!("watcher initialization panicked: {err}")))?
}

fn build_watcher(
    root: &Path,
    mode: RecursiveMode,
    source_tx: mpsc::Sender<SourceMessage>,
) -> Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| match res {
            Ok(event) => {
                if let Err(err) = source_tx.blocking_send(SourceMessage::Event(event)) {
                    warn!("watch channel send failed: {err}");
                }
            }
            Err(err) => {
                let _ = source_tx.blocking_send(SourceMessage::Error(err.to_string()));
            }
        },
        NotifyConfig::default(),
    )?;
    watcher.watch(root, mode)?;
    Ok(watcher)
}

async fn route_loop(
    mut watcher: RecommendedWatcher,
    mut source_rx: mpsc::Receiver<SourceMessage>,
    source_tx: mpsc::Sender<SourceMessage>,
    config: WatcherConfig,
    pattern: Pattern,
    registry: Arc<WatchRegistry>,
    events_tx: mpsc::UnboundedSender<WatchEvent>,
) {
    while let Some(msg) = source_rx.recv().await {
        match msg {
            SourceMessage::Event(event) => {
                if !is_arrival(&event.kind) {
                    continue;
                }
                for path in event.paths {
                    if matches_filter(&pattern, &path) {
                        trace!(path = %path.display(), "change notification");
                        registry.notify(path).await;
                    }
                }
            }
            SourceMessage::Error(cause) => {
                warn!(
                    root = %config.root.display(),
                    %cause,
                    "notification source error, resubscribing"
                );
                let _ = events_tx.send(WatchEvent::WatchError(cause));

                // The failed subscription is dropped and never reused.
                drop(watcher);
                watcher = resubscribe(&config, &source_tx, &events_tx).await;
            }
        }
    }
}

/// Rebuild the subscription, retrying on the poll interval until it
/// succeeds. Each failed attempt is reported to the consumer, so the watch
/// is never silently dead.
async fn resubscribe(
    config: &WatcherConfig,
    source_tx: &mpsc::Sender<SourceMessage>,
    events_tx: &mpsc::UnboundedSender<WatchEvent>,
) -> RecommendedWatcher {
    loop {
        match subscribe(
            config.root.clone(),
            recursive_mode(config),
            source_tx.clone(),
        )
        .await
        {
            Ok(watcher) => {
                info!(root = %config.root.display(), "directory watch resubscribed");
                return watcher;
            }
            Err(err) => {
                warn!(
                    root = %config.root.display(),
                    error = %err,
                    "resubscribe failed, retrying"
                );
                let _ = events_tx.send(WatchEvent::WatchError(err.to_string()));
                tokio::time::sleep(config.poll_interval).await;
            }
        }
    }
}

/// Creations and modifications mark a file as in flight. Removals and pure
/// access events are not arrivals.
fn is_arrival(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

fn matches_filter(pattern: &Pattern, path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| pattern.matches(name))
}
