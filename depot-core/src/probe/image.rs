use std::path::Path;

use serde_json::json;

use crate::error::{DepotError, Result};

/// Probe an image file for its basic format tags: container format, width,
/// and height.
pub fn probe(path: &Path) -> Result<serde_json::Value> {
    let reader = image::ImageReader::open(path)
        .map_err(|e| DepotError::Probe(format!("failed to open {}: {e}", path.display())))?
        .with_guessed_format()
        .map_err(|e| DepotError::Probe(format!("failed to detect format for {}: {e}", path.display())))?;

    let format = reader
        .format()
        .ok_or_else(|| DepotError::Probe(format!("unrecognized image format: {}", path.display())))?;

    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| DepotError::Probe(format!("failed to read dimensions for {}: {e}", path.display())))?;

    Ok(json!({
        "format": format!("{format:?}"),
        "width": width,
        "height": height,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_reads_format_and_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solid.png");

        let img = image::RgbImage::from_pixel(4, 3, image::Rgb([10, 20, 30]));
        img.save(&path).unwrap();

        let tags = probe(&path).unwrap();
        assert_eq!(tags["width"], 4);
        assert_eq!(tags["height"], 3);
        assert_eq!(tags["format"], "Png");
    }

    #[test]
    fn probe_fails_on_non_image_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-an-image.png");
        std::fs::write(&path, b"this is not image data").unwrap();

        assert!(probe(&path).is_err());
    }
}
