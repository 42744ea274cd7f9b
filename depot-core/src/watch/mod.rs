mod inotify_close;
mod stabilization;

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

pub use inotify_close::InotifyCloseWatcher;
pub use stabilization::StabilizationWatcher;

use crate::config::WatchConfig;
use crate::error::Result;
use crate::model::FileEvent;

enum Backend {
    InotifyClose(InotifyCloseWatcher),
    Stabilization(StabilizationWatcher),
}

/// Facade over the two watcher backends: a precise close-write watch where
/// the platform/filesystem supports it, falling back to size-stabilization
/// polling otherwise.
pub struct Watcher {
    backend: Backend,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher").finish()
    }
}

impl Watcher {
    /// Start watching `barn` recursively, forwarding one `FileEvent` per
    /// observed close-after-write (or its stabilization-based equivalent)
    /// onto `tx`.
    pub fn spawn(barn: &Path, tx: UnboundedSender<FileEvent>, cfg: &WatchConfig) -> Result<Self> {
        if close_events_available(barn) {
            match InotifyCloseWatcher::spawn(barn, tx.clone()) {
                Ok(watcher) => return Ok(Self { backend: Backend::InotifyClose(watcher) }),
                Err(e) => {
                    warn!(error = %e, "close-write watcher unavailable, falling back to stabilization polling");
                }
            }
        }

        let watcher = StabilizationWatcher::spawn(
            barn.to_path_buf(),
            tx,
            Duration::from_secs(cfg.stabilization_interval_secs),
            cfg.stabilization_required_polls,
        );
        Ok(Self { backend: Backend::Stabilization(watcher) })
    }

    /// Stop the observer and join it, per the contract's shutdown model.
    pub fn stop(self) {
        match self.backend {
            Backend::InotifyClose(watcher) => drop(watcher),
            Backend::Stabilization(watcher) => watcher.stop(),
        }
    }
}

/// Whether `notify`'s close-write events are expected to reach us for this
/// root: true on Linux local filesystems, false on network filesystems
/// (whose close events may not propagate through inotify) and false by
/// construction on non-Linux targets, which fall back to polling.
fn close_events_available(root: &Path) -> bool {
    if cfg!(not(target_os = "linux")) {
        return false;
    }
    !is_network_filesystem(root)
}

/// Determine if a path resides on a network filesystem, by consulting
/// `/proc/mounts` for the longest matching mountpoint's filesystem type.
fn is_network_filesystem(path: &Path) -> bool {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

    let file = match std::fs::File::open("/proc/mounts") {
        Ok(f) => f,
        Err(_) => return false,
    };
    let reader = BufReader::new(file);

    let mut best_match: Option<(PathBuf, String)> = None;
    for line in reader.lines().map_while(std::result::Result::ok) {
        let mut parts = line.split_whitespace();
        let _src = parts.next();
        let mountpoint = parts.next();
        let fstype = parts.next();
        if let (Some(mnt), Some(fs_type)) = (mountpoint, fstype) {
            let mnt_path = PathBuf::from(mnt);
            if canonical.starts_with(&mnt_path) {
                let take = match &best_match {
                    None => true,
                    Some((best, _)) => mnt_path.as_os_str().len() > best.as_os_str().len(),
                };
                if take {
                    best_match = Some((mnt_path, fs_type.to_string()));
                }
            }
        }
    }

    match best_match {
        Some((_, fstype)) => {
            const NETWORK_FS: &[&str] = &["nfs", "nfs4", "cifs", "smbfs", "smb3", "fuse.sshfs"];
            NETWORK_FS.iter().any(|t| &fstype == t)
        }
        None => false,
    }
}
