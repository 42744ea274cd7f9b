use std::path::{Path, PathBuf};

use crate::error::{DepotError, Result};

const TAGS_FILE: &str = "tags.txt";
const AUTHORS_FILE: &str = "authors.txt";

/// The manual annotations attached to an ingested file: whitespace-separated
/// tokens read from `tags.txt` / `authors.txt`.
#[derive(Debug, Clone, Default)]
pub struct ManualTags {
    pub tags: Vec<String>,
    pub authors: Vec<String>,
}

/// Find and read the manual tag/author files for `source`, relative to
/// `barn_root`. Two candidate directories are tried in order:
///
/// - **optional**: the directory directly containing `source`.
/// - **mandatory**: the top-level subdirectory of `source` under `barn_root`
///   (the "job" directory).
///
/// Whichever directory has *both* files wins; if neither does, this fails.
/// Each file's first line is split on whitespace into tokens, preserving
/// order (empty tokens are not produced by `split_whitespace`).
pub fn discover(source: &Path, barn_root: &Path) -> Result<ManualTags> {
    let optional_dir = source.parent().map(Path::to_path_buf);
    let mandatory_dir = job_root(source, barn_root);

    for candidate in [optional_dir, mandatory_dir].into_iter().flatten() {
        if let Some(tags) = try_read(&candidate)? {
            return Ok(tags);
        }
    }

    Err(DepotError::TagsMissing(format!(
        "no tags.txt/authors.txt pair found for {}",
        source.display()
    )))
}

/// The first path component of `source` relative to `barn_root`, joined back
/// onto `barn_root` — i.e. the "job" directory a source file lives under.
fn job_root(source: &Path, barn_root: &Path) -> Option<PathBuf> {
    let relative = source.strip_prefix(barn_root).ok()?;
    let first_component = relative.components().next()?;
    Some(barn_root.join(first_component))
}

/// Read `tags.txt` and `authors.txt` from `dir` if both are present.
fn try_read(dir: &Path) -> Result<Option<ManualTags>> {
    let tags_path = dir.join(TAGS_FILE);
    let authors_path = dir.join(AUTHORS_FILE);

    if !tags_path.is_file() || !authors_path.is_file() {
        return Ok(None);
    }

    let tags = first_line_tokens(&tags_path)?;
    let authors = first_line_tokens(&authors_path)?;

    Ok(Some(ManualTags { tags, authors }))
}

fn first_line_tokens(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    let first_line = content.lines().next().unwrap_or("");
    Ok(first_line.split_whitespace().map(str::to_string).collect())
}
