//! In-memory table of in-flight paths and their monitors.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::monitor::StabilityMonitor;
use crate::probe::{AccessProbe, SizeProbe};
use crate::watcher::WatchEvent;

/// Tracks every in-flight path and owns its [`StabilityMonitor`].
///
/// Duplicate notifications for a path already being tracked are dropped, so
/// a monitor's progress is never reset by the notification bursts real
/// writers produce. Once a monitor reports its path settled, the registry
/// emits [`WatchEvent::FileReady`] and forgets the path; a later
/// notification for the same path starts over with a fresh monitor.
///
/// The table is the only state shared between the notification-routing task
/// and the per-file monitor completions; one mutex serializes every insert,
/// lookup, and remove.
pub struct WatchRegistry {
    inner: Arc<RegistryInner>,
    pump: JoinHandle<()>,
}

struct RegistryInner {
    monitors: Mutex<HashMap<PathBuf, StabilityMonitor>>,
    poll_interval: Duration,
    size_probe: Arc<dyn SizeProbe>,
    access_probe: Arc<dyn AccessProbe>,
    settled_tx: mpsc::UnboundedSender<PathBuf>,
}

impl WatchRegistry {
    /// Build a registry that reports completions on `events_tx`.
    ///
    /// Must be called from within a tokio runtime: the registry spawns a
    /// pump task that turns monitor completions into consumer events.
    pub fn new(
        poll_interval: Duration,
        size_probe: Arc<dyn SizeProbe>,
        access_probe: Arc<dyn AccessProbe>,
        events_tx: mpsc::UnboundedSender<WatchEvent>,
    ) -> Self {
        let (settled_tx, mut settled_rx) = mpsc::unbounded_channel::<PathBuf>();
        let inner = Arc::new(RegistryInner {
            monitors: Mutex::new(HashMap::new()),
            poll_interval,
            size_probe,
            access_probe,
            settled_tx,
        });

        let pump_inner = Arc::clone(&inner);
        let pump = tokio::spawn(async move {
            while let Some(path) = settled_rx.recv().await {
                let mut monitors = pump_inner.monitors.lock().await;
                if !monitors.contains_key(&path) {
                    // The monitor was canceled while its final tick was in
                    // flight; its result is discarded.
                    continue;
                }
                debug!(path = %path.display(), "file settled, releasing to consumer");
                let _ = events_tx.send(WatchEvent::FileReady(path.clone()));
                monitors.remove(&path);
            }
        });

        Self { inner, pump }
    }

    /// Route a create/change notification. Idempotent while the path is in
    /// flight: at most one monitor exists per path at any instant.
    pub async fn notify(&self, path: PathBuf) {
        let mut monitors = self.inner.monitors.lock().await;
        if monitors.contains_key(&path) {
            return;
        }
        debug!(path = %path.display(), "starting stability monitor");
        let monitor = StabilityMonitor::spawn(
            path.clone(),
            self.inner.poll_interval,
            Arc::clone(&self.inner.size_probe),
            Arc::clone(&self.inner.access_probe),
            self.inner.settled_tx.clone(),
        );
        monitors.insert(path, monitor);
    }

    /// Number of paths currently in flight.
    pub async fn in_flight(&self) -> usize {
        self.inner.monitors.lock().await.len()
    }

    /// Cancel every outstanding monitor and clear the table.
    pub async fn shutdown(&self) {
        let mut monitors = self.inner.monitors.lock().await;
        let canceled = monitors.len();
        for (_, monitor) in monitors.drain() {
            monitor.cancel();
        }
        if canceled > 0 {
            debug!(canceled, "canceled outstanding monitors");
        }
    }
}

impl fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("WatchRegistry");
        debug.field("poll_interval", &self.inner.poll_interval);
        match self.inner.monitors.try_lock() {
            Ok(guard) => {
                debug.field("in_flight", &guard.len());
            }
            Err(_) => {
                debug.field("in_flight", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl Drop for WatchRegistry {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};

    use tokio::time::timeout;

    use super::*;

    const TICK: Duration = Duration::from_millis(10);

    /// Probe pair describing a file that settles immediately or never,
    /// depending on `accessible`.
    struct FixedProbe {
        size: u64,
        accessible: AtomicBool,
    }

    impl FixedProbe {
        fn new(size: u64, accessible: bool) -> Arc<Self> {
            Arc::new(Self {
                size,
                accessible: AtomicBool::new(accessible),
            })
        }

        fn set_accessible(&self, accessible: bool) {
            self.accessible.store(accessible, Ordering::SeqCst);
        }
    }

    impl SizeProbe for FixedProbe {
        fn raw_size(&self, _path: &Path) -> u64 {
            self.size
        }
    }

    impl AccessProbe for FixedProbe {
        fn is_accessible(&self, _path: &Path) -> bool {
            self.accessible.load(Ordering::SeqCst)
        }
    }

    fn registry_with(
        probe: &Arc<FixedProbe>,
    ) -> (WatchRegistry, mpsc::UnboundedReceiver<WatchEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let registry = WatchRegistry::new(
            TICK,
            Arc::clone(probe) as Arc<dyn SizeProbe>,
            Arc::clone(probe) as Arc<dyn AccessProbe>,
            events_tx,
        );
        (registry, events_rx)
    }

    #[tokio::test]
    async fn duplicate_notifications_track_one_monitor() {
        let probe = FixedProbe::new(100, false);
        let (registry, mut events) = registry_with(&probe);

        let path = PathBuf::from("/inbox/dup.csv");
        registry.notify(path.clone()).await;
        registry.notify(path.clone()).await;
        registry.notify(path).await;

        assert_eq!(registry.in_flight().await, 1);
        tokio::time::sleep(TICK * 5).await;
        assert!(events.try_recv().is_err());

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn completion_emits_once_and_clears_entry() {
        let probe = FixedProbe::new(100, true);
        let (registry, mut events) = registry_with(&probe);

        let path = PathBuf::from("/inbox/done.csv");
        registry.notify(path.clone()).await;
        registry.notify(path.clone()).await;

        let event = timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("file should settle")
            .expect("events channel should stay open");
        assert_eq!(event, WatchEvent::FileReady(path));

        // The entry is removed right after the event is emitted.
        timeout(Duration::from_secs(1), async {
            while registry.in_flight().await != 0 {
                tokio::time::sleep(TICK).await;
            }
        })
        .await
        .expect("registry should forget the settled path");

        tokio::time::sleep(TICK * 5).await;
        assert!(events.try_recv().is_err(), "FileReady must fire only once");
    }

    #[tokio::test]
    async fn completed_path_rearms_on_next_notification() {
        let probe = FixedProbe::new(100, true);
        let (registry, mut events) = registry_with(&probe);

        let path = PathBuf::from("/inbox/rewritten.csv");
        registry.notify(path.clone()).await;
        let first = timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, WatchEvent::FileReady(path.clone()));

        timeout(Duration::from_secs(1), async {
            while registry.in_flight().await != 0 {
                tokio::time::sleep(TICK).await;
            }
        })
        .await
        .unwrap();

        // The file is rewritten later; a fresh monitoring session starts.
        registry.notify(path.clone()).await;
        let second = timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second, WatchEvent::FileReady(path));
    }

    #[tokio::test]
    async fn shutdown_cancels_pending_monitors() {
        let probe = FixedProbe::new(100, false);
        let (registry, mut events) = registry_with(&probe);

        registry.notify(PathBuf::from("/inbox/a.csv")).await;
        registry.notify(PathBuf::from("/inbox/b.csv")).await;
        assert_eq!(registry.in_flight().await, 2);

        registry.shutdown().await;
        assert_eq!(registry.in_flight().await, 0);

        // Even if a monitor had been on the verge of settling, nothing is
        // delivered after shutdown.
        probe.set_accessible(true);
        tokio::time::sleep(TICK * 5).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn concurrent_notifications_for_one_path_stay_deduplicated() {
        let probe = FixedProbe::new(100, false);
        let (registry, _events) = registry_with(&probe);
        let registry = Arc::new(registry);

        let path = PathBuf::from("/inbox/racy.csv");
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            let path = path.clone();
            tasks.push(tokio::spawn(async move {
                registry.notify(path).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.in_flight().await, 1);
        registry.shutdown().await;
    }
}
