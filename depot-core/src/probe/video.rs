use std::path::Path;
use std::process::Command;

use crate::error::{DepotError, Result};

/// Probe a video file via `ffprobe`, returning its full JSON stream/format
/// report as an opaque value, unexamined beyond being valid JSON.
///
/// A missing `ffprobe` binary is reported as `DepotError::ProberMissing`, a
/// distinct variant from a parse/probe failure: the pipeline treats it as
/// fatal-for-this-file without retrying, since no amount of waiting makes a
/// missing binary appear.
pub fn probe(path: &Path) -> Result<serde_json::Value> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DepotError::ProberMissing("ffprobe".to_string()),
            _ => DepotError::Probe(format!("failed to run ffprobe: {e}")),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DepotError::Probe(format!("ffprobe exited non-zero: {stderr}")));
    }

    let json_str = std::str::from_utf8(&output.stdout)
        .map_err(|e| DepotError::Probe(format!("ffprobe produced non-utf8 output: {e}")))?;

    serde_json::from_str(json_str)
        .map_err(|e| DepotError::Probe(format!("failed to parse ffprobe json: {e}")))
}
