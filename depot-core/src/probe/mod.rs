mod image;
mod video;

use std::path::Path;

use crate::error::Result;
use crate::model::MediaKind;

/// Dispatch to the per-type format prober. Each prober's contract is:
/// a file path in, an opaque tag value or a `DepotError` out — no retry or
/// existence-waiting logic lives here, that's the orchestrator's job (see
/// `probe_with_retry`).
pub fn probe(kind: MediaKind, path: &Path) -> Result<serde_json::Value> {
    match kind {
        MediaKind::Image => image::probe(path),
        MediaKind::Video => video::probe(path),
    }
}
