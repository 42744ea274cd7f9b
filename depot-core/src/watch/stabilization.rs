use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::model::FileEvent;

#[derive(Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    size: u64,
    modified: Option<SystemTime>,
}

/// Emulates "close-after-write" by polling candidate files' `(size, mtime)`
/// until they agree across `required_polls` consecutive samples, for
/// watcher backends that can't see close events directly — network
/// filesystems (NFS/CIFS) and non-Linux targets, which lack a reliable
/// close-write signal and emulate it via size-stabilization polling instead.
pub struct StabilizationWatcher {
    stop: Arc<AtomicBool>,
    handle: std::thread::JoinHandle<()>,
}

impl std::fmt::Debug for StabilizationWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StabilizationWatcher").finish()
    }
}

impl StabilizationWatcher {
    pub fn spawn(
        root: PathBuf,
        tx: UnboundedSender<FileEvent>,
        poll_interval: Duration,
        required_polls: u32,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = std::thread::spawn(move || {
            let mut tracked: HashMap<PathBuf, (Fingerprint, u32)> = HashMap::new();
            let mut announced: HashSet<PathBuf> = HashSet::new();

            while !stop_flag.load(Ordering::Relaxed) {
                let seen = match list_files(&root) {
                    Ok(files) => files,
                    Err(e) => {
                        warn!(error = %e, "stabilization poll failed to list barn");
                        std::thread::sleep(poll_interval);
                        continue;
                    }
                };
                let seen_set: HashSet<PathBuf> = seen.iter().cloned().collect();

                // Drop tracking for files that disappeared, so a future
                // re-appearance starts a fresh stabilization count.
                tracked.retain(|path, _| seen_set.contains(path));
                announced.retain(|path| seen_set.contains(path));

                for path in seen {
                    let Ok(metadata) = std::fs::metadata(&path) else {
                        continue;
                    };
                    let fingerprint = Fingerprint {
                        size: metadata.len(),
                        modified: metadata.modified().ok(),
                    };

                    let entry = tracked.entry(path.clone()).or_insert((fingerprint, 0));
                    if entry.0 == fingerprint {
                        entry.1 += 1;
                    } else {
                        entry.0 = fingerprint;
                        entry.1 = 1;
                    }

                    if entry.1 >= required_polls && !announced.contains(&path) {
                        debug!(path = %path.display(), "size/mtime stabilized, treating as closed");
                        announced.insert(path.clone());
                        if tx.send(FileEvent::new(path)).is_err() {
                            return;
                        }
                    }
                }

                std::thread::sleep(poll_interval);
            }
        });

        Self { stop, handle }
    }

    pub fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.handle.join();
    }
}

fn list_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else if file_type.is_file() {
                out.push(entry.path());
            }
        }
    }
    Ok(out)
}
