use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::error::{DepotError, Result};
use crate::model::Artifact;

/// Fixed first-level subdirectory name under the warehouse (see GLOSSARY: Rack).
const RACK: &str = "originals";

/// Bytes read per hashing chunk; media files routinely exceed convenient
/// single-read buffer sizes, so the digest is streamed rather than computed
/// over a single `read_to_end`.
const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Hashes, content-addressed-copies, and destructively removes files moving
/// between the barn and the warehouse, plus the startup inventory sweep.
#[derive(Debug, Clone)]
pub struct Store {
    warehouse_root: PathBuf,
}

impl Store {
    pub fn new(warehouse_root: PathBuf) -> Self {
        Self { warehouse_root }
    }

    pub fn warehouse_root(&self) -> &Path {
        &self.warehouse_root
    }

    /// Compute the lowercase hex SHA-256 digest of a file's full contents.
    ///
    /// Read errors (permission denied, transient I/O) are surfaced as
    /// `DepotError::Io` and are not retried here; the caller decides policy.
    pub async fn checksum(&self, path: &Path) -> Result<String> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; HASH_CHUNK_SIZE];
        loop {
            let read = file.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Derive the deterministic warehouse path for a given hash and suffix:
    /// `<warehouse>/originals/<h[0]>/<h><suffix>`.
    pub fn warehouse_path(&self, hash: &str, suffix: &str) -> PathBuf {
        let shard = &hash[..1];
        self.warehouse_root
            .join(RACK)
            .join(shard)
            .join(format!("{hash}{suffix}"))
    }

    /// Copy `source` into the warehouse, keyed by its content hash. If the
    /// destination already exists (identical content previously stocked),
    /// this is a no-op rather than an overwrite — content addressing makes
    /// that safe, and it avoids redundant I/O under repeated sweeps.
    ///
    /// The source is left untouched; removing it is a separate, explicit
    /// `destroy` call made by the orchestrator once cataloging succeeds.
    pub async fn stock(&self, source: &Path) -> Result<Artifact> {
        let hash = self.checksum(source).await?;
        let suffix = source
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let dest = self.warehouse_path(&hash, &suffix);

        let file_size = tokio::fs::metadata(source).await?.len();

        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            debug!(path = %dest.display(), "warehouse entry already present, skipping copy");
            return Ok(Artifact {
                hash,
                suffix,
                file_size,
                warehouse_path: dest,
                source_path: source.to_path_buf(),
            });
        }

        let shard_dir = dest.parent().ok_or_else(|| {
            DepotError::Copy(format!("warehouse path has no parent: {}", dest.display()))
        })?;
        tokio::fs::create_dir_all(shard_dir)
            .await
            .map_err(|e| DepotError::Copy(format!("failed to create shard dir: {e}")))?;

        // Copy to a temp name in the same shard directory, then rename, so a
        // reader never observes a partially-written warehouse file.
        let tmp = shard_dir.join(format!(
            "{hash}{suffix}.tmp-{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or_default()
        ));

        tokio::fs::copy(source, &tmp)
            .await
            .map_err(|e| DepotError::Copy(format!("failed to copy {}: {e}", source.display())))?;

        if let Err(e) = tokio::fs::rename(&tmp, &dest).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            // Another writer may have won the race with identical content.
            if !tokio::fs::try_exists(&dest).await.unwrap_or(false) {
                return Err(DepotError::Copy(format!(
                    "failed to move copied file into warehouse: {e}"
                )));
            }
        }

        Ok(Artifact {
            hash,
            suffix,
            file_size,
            warehouse_path: dest,
            source_path: source.to_path_buf(),
        })
    }

    /// Best-effort delete. Never fatal: a permission error just returns
    /// `false` and is logged by the caller.
    pub async fn destroy(&self, path: &Path) -> bool {
        match tokio::fs::remove_file(path).await {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to remove file");
                false
            }
        }
    }

    /// Recursively list every regular file under `dir`.
    pub async fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        let mut stack = vec![dir.to_path_buf()];
        while let Some(current) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(entry.path());
                } else if file_type.is_file() {
                    out.push(entry.path());
                }
            }
        }
        Ok(out)
    }

    /// List every regular file currently in the barn — the inventory sweep's
    /// raw material. Publishing them is the caller's job (see `Orchestrator`).
    pub async fn check_inventory(&self, barn: &Path) -> Result<Vec<PathBuf>> {
        self.list_files(barn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn warehouse_path_shards_on_first_hex_char() {
        let store = Store::new(PathBuf::from("/warehouse"));
        let path = store.warehouse_path("abcdef1234", ".jpg");
        assert_eq!(
            path,
            PathBuf::from("/warehouse/originals/a/abcdef1234.jpg")
        );
    }

    #[tokio::test]
    async fn stock_copies_and_is_idempotent() {
        let src_dir = tempfile::tempdir().unwrap();
        let warehouse_dir = tempfile::tempdir().unwrap();
        let src_file = src_dir.path().join("photo.jpg");
        tokio::fs::write(&src_file, b"hello world").await.unwrap();

        let store = Store::new(warehouse_dir.path().to_path_buf());
        let artifact = store.stock(&src_file).await.unwrap();

        assert!(artifact.warehouse_path.ends_with(format!("{}.jpg", artifact.hash)));
        let copied = tokio::fs::read(&artifact.warehouse_path).await.unwrap();
        assert_eq!(copied, b"hello world");
        assert_eq!(artifact.file_size, 11);

        // Source untouched.
        assert!(tokio::fs::try_exists(&src_file).await.unwrap());

        // Second stock of identical content is a no-op, not an error.
        let artifact2 = store.stock(&src_file).await.unwrap();
        assert_eq!(artifact2.warehouse_path, artifact.warehouse_path);
    }

    #[tokio::test]
    async fn destroy_is_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.jpg");
        let store = Store::new(dir.path().to_path_buf());
        assert!(!store.destroy(&missing).await);
    }

    #[tokio::test]
    async fn check_inventory_lists_files_recursively() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("jobA")).await.unwrap();
        tokio::fs::write(dir.path().join("jobA/photo.jpg"), b"x").await.unwrap();
        tokio::fs::write(dir.path().join("top.png"), b"y").await.unwrap();

        let store = Store::new(tempfile::tempdir().unwrap().path().to_path_buf());
        let mut files = store.check_inventory(dir.path()).await.unwrap();
        files.sort();

        assert_eq!(files.len(), 2);
    }
}
