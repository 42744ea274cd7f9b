use std::path::Path;

use notify::event::{AccessKind, AccessMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error};

use crate::error::Result;
use crate::model::FileEvent;

/// Watches for `close-after-write` directly: on Linux, `notify`'s inotify
/// backend maps `IN_CLOSE_WRITE` to `EventKind::Access(AccessKind::Close(
/// AccessMode::Write))`. This is the precise signal the contract calls for
/// — no debouncing or create/modify coalescing needed, since the close
/// event already fires exactly once per write cycle.
///
/// Other event kinds (create, modify, remove) are observed for diagnostics
/// only and never emit a `FileEvent`.
pub struct InotifyCloseWatcher {
    // Held only to keep the underlying OS watch alive for the struct's
    // lifetime; never read directly.
    _watcher: RecommendedWatcher,
}

impl std::fmt::Debug for InotifyCloseWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InotifyCloseWatcher").finish()
    }
}

impl InotifyCloseWatcher {
    pub fn spawn(root: &Path, tx: UnboundedSender<FileEvent>) -> Result<Self> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    if let Some(file_event) = convert(&event) {
                        debug!(path = %file_event.path().display(), "close-write observed");
                        if tx.send(file_event).is_err() {
                            error!("file event receiver dropped, watcher cannot forward events");
                        }
                    }
                }
                Err(e) => error!(error = %e, "filesystem watch backend error"),
            }
        })?;

        watcher.watch(root, RecursiveMode::Recursive)?;

        Ok(Self { _watcher: watcher })
    }
}

fn convert(event: &Event) -> Option<FileEvent> {
    match event.kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
            let path = event.paths.first()?;
            if path.is_file() {
                Some(FileEvent::new(path.clone()))
            } else {
                None
            }
        }
        _ => None,
    }
}
