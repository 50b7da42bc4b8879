//! Size and accessibility probes for in-flight files.
//!
//! Both probes are deliberately narrow, one method each, so the polling
//! state machine stays free of platform details and tests can script
//! arbitrary probe sequences.

use std::fs::File;
use std::path::Path;

/// Reports the current on-disk byte length of a file.
///
/// Implementations must answer through an open handle rather than a
/// directory-entry lookup: directory metadata can lag behind an in-progress
/// copy, or already advertise the eventual final size before the bytes have
/// actually landed.
pub trait SizeProbe: Send + Sync {
    /// Byte length observed right now, or 0 when the file cannot be opened
    /// (locked exclusively, deleted, or never existed). A 0 reading alone
    /// does not mean "confirmed empty file"; corroborate with
    /// [`AccessProbe`].
    fn raw_size(&self, path: &Path) -> u64;
}

/// Checks whether a file can be opened exclusively, i.e. no other process
/// still holds a write handle on it.
pub trait AccessProbe: Send + Sync {
    fn is_accessible(&self, path: &Path) -> bool;
}

/// [`SizeProbe`] that opens the file and stats the handle (`fstat` /
/// `GetFileInformationByHandle`), so the answer reflects bytes flushed so
/// far rather than cached directory metadata.
#[derive(Clone, Copy, Debug, Default)]
pub struct HandleSizeProbe;

impl SizeProbe for HandleSizeProbe {
    fn raw_size(&self, path: &Path) -> u64 {
        match File::open(path) {
            Ok(file) => file.metadata().map(|meta| meta.len()).unwrap_or(0),
            Err(_) => 0,
        }
    }
}

/// [`AccessProbe`] that attempts an exclusive open and releases it
/// immediately. Success means the writer has closed its handle.
///
/// Returns false for paths that are missing or not regular files, so a
/// deleted file (or a directory that happens to match the name filter)
/// never reads as accessible.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExclusiveAccessProbe;

impl AccessProbe for ExclusiveAccessProbe {
    fn is_accessible(&self, path: &Path) -> bool {
        if !path.is_file() {
            return false;
        }
        open_exclusive(path).is_ok()
    }
}

#[cfg(windows)]
fn open_exclusive(path: &Path) -> std::io::Result<File> {
    use std::fs::OpenOptions;
    use std::os::windows::fs::OpenOptionsExt;

    // Share mode 0 refuses the open while any other handle is held.
    OpenOptions::new().read(true).share_mode(0).open(path)
}

#[cfg(unix)]
fn open_exclusive(path: &Path) -> std::io::Result<File> {
    use fs2::FileExt;

    // Unix has no mandatory share modes; a non-blocking exclusive lock is
    // the closest equivalent signal that no cooperating writer still holds
    // the file.
    let file = File::open(path)?;
    file.try_lock_exclusive()?;
    let _ = file.unlock();
    Ok(file)
}
