//! Per-file polling state machine.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::probe::{AccessProbe, SizeProbe};

/// Polls one in-flight file until it settles.
///
/// Every tick samples the raw size. Growth resets the stall clock, so the
/// monitor never reports a file that is still being written even if the
/// writer pauses for exactly one interval. A stalled size alone is not
/// enough evidence either: the file must also open exclusively, which is
/// the authoritative signal that the writer closed its handle. The path is
/// reported at most once, after which the task stops scheduling itself.
///
/// A file deleted mid-monitoring reads as size 0 and never accessible, so
/// its monitor polls until the owner cancels it. Probe failures read the
/// same way; a monitor never errors out on its own.
#[derive(Debug)]
pub struct StabilityMonitor {
    path: PathBuf,
    task: JoinHandle<()>,
}

impl StabilityMonitor {
    /// Spawn the polling task. The settled path is sent on `settled_tx`
    /// exactly once, after which the task exits on its own.
    pub fn spawn(
        path: PathBuf,
        poll_interval: Duration,
        size_probe: Arc<dyn SizeProbe>,
        access_probe: Arc<dyn AccessProbe>,
        settled_tx: mpsc::UnboundedSender<PathBuf>,
    ) -> Self {
        let task_path = path.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            // A slow probe must not cause back-to-back catch-up ticks; one
            // evaluation finishes before the next is scheduled.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let mut last_size = 0u64;
            loop {
                ticker.tick().await;

                let size = size_probe.raw_size(&task_path);
                if size > last_size {
                    trace!(path = %task_path.display(), size, "file still growing");
                    last_size = size;
                    continue;
                }

                if !access_probe.is_accessible(&task_path) {
                    trace!(path = %task_path.display(), size, "stalled but still locked");
                    continue;
                }

                debug!(path = %task_path.display(), size = last_size, "file settled");
                let _ = settled_tx.send(task_path);
                break;
            }
        });

        Self { path, task }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cancel future ticks. A tick already running finishes, but its
    /// outcome is discarded by the receiver once the monitor is detached.
    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for StabilityMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
