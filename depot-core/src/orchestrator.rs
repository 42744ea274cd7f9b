use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::broker::BrokerClient;
use crate::catalog::CatalogStore;
use crate::config::{Config, SentinelScope};
use crate::error::{DepotError, Result};
use crate::model::{CatalogRecord, FileEvent, MediaKind};
use crate::probe;
use crate::store::Store;
use crate::tags;

/// A file dropped anywhere recognized (see `policy.sentinel_scope`) under the
/// barn whose sole purpose is triggering a fresh inventory sweep.
const SENTINEL_FILENAME: &str = "dwarf.run";

/// Per-second poll while waiting for a not-yet-visible source file.
const PROBE_EXISTS_WAIT: Duration = Duration::from_secs(1);

/// Backoff between failed parse attempts, distinct from the existence-wait
/// tick: a failed parse counts against `max_num_try` but not `timeout`.
const PROBE_RETRY_BACKOFF: Duration = Duration::from_secs(3);

/// Drives the ten-stage per-file pipeline against the `Store` and
/// `CatalogStore` collaborators, and republishes onto `publisher` during
/// inventory sweeps. `catalog` is a trait object so the dedup/compensate
/// branches can be driven in tests against `InMemoryCatalogStore` instead
/// of a live MongoDB instance.
pub struct Orchestrator {
    config: Config,
    store: Store,
    catalog: Arc<dyn CatalogStore>,
    publisher: Arc<BrokerClient>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").finish()
    }
}

impl Orchestrator {
    pub fn new(
        config: Config,
        store: Store,
        catalog: Arc<dyn CatalogStore>,
        publisher: Arc<BrokerClient>,
    ) -> Self {
        Self { config, store, catalog, publisher }
    }

    /// Process one message end to end. Always resolves to `true` (ack): every
    /// failure the pipeline detects is converted to "log and ack" rather than
    /// left for redelivery, matching the error taxonomy's ack-and-log policy.
    pub async fn process(&self, event: FileEvent) -> bool {
        let path = event.into_path();
        if let Err(e) = self.process_inner(&path).await {
            warn!(path = %path.display(), error = %e, "pipeline stage failed, acking and discarding");
        }
        true
    }

    async fn process_inner(&self, path: &Path) -> Result<()> {
        if self.is_sentinel(path) {
            return self.handle_sentinel(path).await;
        }

        let kind = self.precheck(path)?;

        let hash = self.store.checksum(path).await?;
        let collection = kind
            .collection_name(&self.config.mongodb.collections.images, &self.config.mongodb.collections.videos)
            .to_string();

        if self.catalog.exists(&hash, &collection).await? {
            warn!(path = %path.display(), hash = %hash, "duplicate content, skipping");
            if self.config.policy.duplicate_removes_source {
                self.store.destroy(path).await;
            }
            return Err(DepotError::Duplicate(hash));
        }

        let raw_tag = self.probe_with_retry(kind, path).await?;

        let artifact = self.store.stock(path).await?;

        let manual = tags::discover(path, &self.config.dirs.barn)?;

        let record = CatalogRecord::from_artifact(&artifact, raw_tag, manual.tags, manual.authors);

        if let Err(e) = self.catalog.insert(&collection, &record).await {
            warn!(
                path = %artifact.warehouse_path.display(),
                "compensating: removing warehouse file after catalog insert failure"
            );
            self.store.destroy(&artifact.warehouse_path).await;
            return Err(e);
        }

        if !self.store.destroy(path).await {
            warn!(path = %path.display(), "failed to remove source after successful catalog insert");
        }

        Ok(())
    }

    fn is_sentinel(&self, path: &Path) -> bool {
        is_sentinel(&self.config, path)
    }

    async fn handle_sentinel(&self, path: &Path) -> Result<()> {
        info!(path = %path.display(), "sentinel observed, triggering inventory sweep");
        self.store.destroy(path).await;
        self.sweep().await
    }

    /// Walk the barn and republish every remaining regular file. Used both
    /// at startup and whenever the sentinel fires.
    pub async fn sweep(&self) -> Result<()> {
        let files = self.store.check_inventory(&self.config.dirs.barn).await?;
        for file in files {
            if let Err(e) = self.publisher.publish_event(&FileEvent::new(file.clone())).await {
                warn!(path = %file.display(), error = %e, "failed to republish during inventory sweep");
            }
        }
        Ok(())
    }

    fn precheck(&self, path: &Path) -> Result<MediaKind> {
        precheck(&self.config, path)
    }

    /// Waits up to `timeout` seconds in one-second ticks for the file to
    /// exist, then attempts up to
    /// `max_num_try` parses with a three-second backoff between failures. A
    /// missing prober binary short-circuits immediately without consuming
    /// either budget.
    async fn probe_with_retry(&self, kind: MediaKind, path: &Path) -> Result<serde_json::Value> {
        let max_num_try = self.config.monitor.max_num_try;
        let timeout = self.config.monitor.timeout;

        let mut num_try = 0u32;
        let mut seconds_wait = 0u64;

        loop {
            if num_try >= max_num_try {
                return Err(DepotError::Probe(format!(
                    "exhausted {max_num_try} attempts probing {}",
                    path.display()
                )));
            }
            if seconds_wait >= timeout {
                return Err(DepotError::Probe(format!(
                    "timed out after {timeout}s waiting for {} to appear",
                    path.display()
                )));
            }

            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                seconds_wait += 1;
                tokio::time::sleep(PROBE_EXISTS_WAIT).await;
                continue;
            }

            num_try += 1;
            let owned_path = path.to_path_buf();
            let attempt = tokio::task::spawn_blocking(move || probe::probe(kind, &owned_path))
                .await
                .map_err(|e| DepotError::Probe(format!("probe task panicked: {e}")))?;

            match attempt {
                Ok(raw_tag) => return Ok(raw_tag),
                Err(e @ DepotError::ProberMissing(_)) => return Err(e),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "probe attempt failed, retrying");
                    tokio::time::sleep(PROBE_RETRY_BACKOFF).await;
                }
            }
        }
    }
}

/// Whether `path` is the sentinel marker, under the configured scope.
fn is_sentinel(config: &Config, path: &Path) -> bool {
    let Some(name) = path.file_name() else {
        return false;
    };
    if name != SENTINEL_FILENAME {
        return false;
    }
    match config.policy.sentinel_scope {
        SentinelScope::Anywhere => true,
        SentinelScope::BarnRoot => path.parent() == Some(config.dirs.barn.as_path()),
    }
}

/// Classify `path` by its lowercased suffix against the configured type
/// lists, or fail with `UnsupportedSuffix`.
fn precheck(config: &Config, path: &Path) -> Result<MediaKind> {
    let suffix = path.extension().map(|s| s.to_string_lossy().to_lowercase()).unwrap_or_default();
    config.classify(&suffix).ok_or(DepotError::UnsupportedSuffix(suffix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        DirsConfig, LoggingConfig, MongoCollections, MongoConfig, MonitorConfig, PolicyConfig,
        RabbitMqConfig, WatchConfig,
    };

    fn test_config(barn: std::path::PathBuf, warehouse: std::path::PathBuf) -> Config {
        Config {
            dirs: DirsConfig { barn, warehouse },
            mongodb: MongoConfig {
                host: "localhost".into(),
                port: 27017,
                username: "dwarf".into(),
                password: "pw".into(),
                name: "mediadb".into(),
                collections: MongoCollections { images: "images".into(), videos: "videos".into() },
            },
            rabbitmq: RabbitMqConfig { host: "localhost".into(), port: 5672, queue: "ingest".into() },
            video_types: vec!["mp4".into()],
            image_types: vec!["jpg".into(), "png".into()],
            monitor: MonitorConfig { max_num_try: 3, timeout: 30 },
            logging: LoggingConfig::default(),
            policy: PolicyConfig::default(),
            watch: WatchConfig::default(),
        }
    }

    #[test]
    fn precheck_routes_by_configured_suffix_lists() {
        let barn = tempfile::tempdir().unwrap();
        let warehouse = tempfile::tempdir().unwrap();
        let config = test_config(barn.path().to_path_buf(), warehouse.path().to_path_buf());

        assert_eq!(precheck(&config, Path::new("/barn/clip.mp4")).unwrap(), MediaKind::Video);
        assert_eq!(precheck(&config, Path::new("/barn/photo.JPG")).unwrap(), MediaKind::Image);
        assert!(matches!(
            precheck(&config, Path::new("/barn/virus.exe")),
            Err(DepotError::UnsupportedSuffix(s)) if s == "exe"
        ));
    }

    #[test]
    fn sentinel_scope_anywhere_matches_any_depth() {
        let barn = tempfile::tempdir().unwrap();
        let warehouse = tempfile::tempdir().unwrap();
        let mut config = test_config(barn.path().to_path_buf(), warehouse.path().to_path_buf());
        config.policy.sentinel_scope = SentinelScope::Anywhere;

        let nested = barn.path().join("jobA/dwarf.run");
        let at_root = barn.path().join("dwarf.run");
        assert!(is_sentinel(&config, &nested));
        assert!(is_sentinel(&config, &at_root));
        assert!(!is_sentinel(&config, &barn.path().join("jobA/photo.jpg")));
    }

    #[test]
    fn sentinel_scope_barn_root_rejects_nested() {
        let barn = tempfile::tempdir().unwrap();
        let warehouse = tempfile::tempdir().unwrap();
        let mut config = test_config(barn.path().to_path_buf(), warehouse.path().to_path_buf());
        config.policy.sentinel_scope = SentinelScope::BarnRoot;

        let nested = barn.path().join("jobA/dwarf.run");
        let at_root = barn.path().join("dwarf.run");
        assert!(!is_sentinel(&config, &nested));
        assert!(is_sentinel(&config, &at_root));
    }

    /// Write a job directory with a tiny valid PNG plus the mandatory tag
    /// files, so a full `process_inner` run can reach the probe/stock/insert
    /// stages without a real `ffprobe` or a network round trip.
    fn write_job_file(barn: &Path, relative: &str) -> std::path::PathBuf {
        let path = barn.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let img = image::RgbImage::from_pixel(2, 2, image::Rgb([1, 2, 3]));
        img.save(&path).unwrap();
        path
    }

    fn write_tag_files(job_dir: &Path) {
        std::fs::create_dir_all(job_dir).unwrap();
        std::fs::write(job_dir.join("tags.txt"), "cat dog").unwrap();
        std::fs::write(job_dir.join("authors.txt"), "alice").unwrap();
    }

    fn test_orchestrator(
        barn: std::path::PathBuf,
        warehouse: std::path::PathBuf,
        catalog: Arc<crate::catalog::InMemoryCatalogStore>,
    ) -> Orchestrator {
        let config = test_config(barn, warehouse.clone());
        let store = Store::new(warehouse);
        let publisher = Arc::new(BrokerClient::new("amqp://localhost:5672", "ingest", crate::broker::Role::Publisher));
        Orchestrator::new(config, store, catalog, publisher)
    }

    #[tokio::test]
    async fn duplicate_hash_short_circuits_and_leaves_source_by_default() {
        let barn = tempfile::tempdir().unwrap();
        let warehouse = tempfile::tempdir().unwrap();
        write_tag_files(&barn.path().join("jobA"));
        let source = write_job_file(barn.path(), "jobA/photo.jpg");

        let hash = Store::new(warehouse.path().to_path_buf()).checksum(&source).await.unwrap();
        let catalog = Arc::new(crate::catalog::InMemoryCatalogStore::new());
        let artifact = crate::model::Artifact {
            hash: hash.clone(),
            suffix: ".jpg".to_string(),
            file_size: 4,
            warehouse_path: "/warehouse/originals/x/prior.jpg".into(),
            source_path: source.clone(),
        };
        let existing = CatalogRecord::from_artifact(&artifact, serde_json::json!({}), vec![], vec![]);
        catalog.seed("images", existing).await;

        let orchestrator = test_orchestrator(barn.path().to_path_buf(), warehouse.path().to_path_buf(), catalog.clone());

        let err = orchestrator.process_inner(&source).await.unwrap_err();
        assert!(matches!(err, DepotError::Duplicate(h) if h == hash));
        assert!(tokio::fs::try_exists(&source).await.unwrap(), "duplicate source must be left in place by default");
        assert_eq!(catalog.record_count("images").await, 1, "no second record is inserted");
    }

    #[tokio::test]
    async fn duplicate_hash_removes_source_when_policy_enabled() {
        let barn = tempfile::tempdir().unwrap();
        let warehouse = tempfile::tempdir().unwrap();
        write_tag_files(&barn.path().join("jobA"));
        let source = write_job_file(barn.path(), "jobA/photo.jpg");

        let hash = Store::new(warehouse.path().to_path_buf()).checksum(&source).await.unwrap();
        let catalog = Arc::new(crate::catalog::InMemoryCatalogStore::new());
        let artifact = crate::model::Artifact {
            hash: hash.clone(),
            suffix: ".jpg".to_string(),
            file_size: 4,
            warehouse_path: "/warehouse/originals/x/prior.jpg".into(),
            source_path: source.clone(),
        };
        catalog.seed("images", CatalogRecord::from_artifact(&artifact, serde_json::json!({}), vec![], vec![])).await;

        let mut config = test_config(barn.path().to_path_buf(), warehouse.path().to_path_buf());
        config.policy.duplicate_removes_source = true;
        let store = Store::new(warehouse.path().to_path_buf());
        let publisher = Arc::new(BrokerClient::new("amqp://localhost:5672", "ingest", crate::broker::Role::Publisher));
        let orchestrator = Orchestrator::new(config, store, catalog.clone(), publisher);

        let err = orchestrator.process_inner(&source).await.unwrap_err();
        assert!(matches!(err, DepotError::Duplicate(_)));
        assert!(
            !tokio::fs::try_exists(&source).await.unwrap(),
            "duplicate source must be removed when the policy flag is set"
        );
    }

    #[tokio::test]
    async fn catalog_insert_failure_compensates_by_deleting_the_warehouse_file() {
        let barn = tempfile::tempdir().unwrap();
        let warehouse = tempfile::tempdir().unwrap();
        write_tag_files(&barn.path().join("jobA"));
        let source = write_job_file(barn.path(), "jobA/photo.jpg");

        let catalog = Arc::new(crate::catalog::InMemoryCatalogStore::new());
        catalog.fail_next_insert("images").await;

        let orchestrator = test_orchestrator(barn.path().to_path_buf(), warehouse.path().to_path_buf(), catalog.clone());

        let err = orchestrator.process_inner(&source).await;
        assert!(err.is_err(), "catalog insert failure must propagate");
        assert_eq!(catalog.record_count("images").await, 0, "failed insert leaves no record behind");

        let mut shards = Vec::new();
        let originals = warehouse.path().join("originals");
        if originals.is_dir() {
            for entry in std::fs::read_dir(&originals).unwrap() {
                let shard = entry.unwrap().path();
                shards.extend(std::fs::read_dir(&shard).unwrap().map(|e| e.unwrap().path()));
            }
        }
        assert!(
            shards.is_empty(),
            "no dangling warehouse file may survive a failed catalog insert, found {shards:?}"
        );
        assert!(
            tokio::fs::try_exists(&source).await.unwrap(),
            "source is only removed after a successful catalog insert"
        );
    }

    #[tokio::test]
    async fn successful_ingest_stocks_catalogs_and_removes_the_source() {
        let barn = tempfile::tempdir().unwrap();
        let warehouse = tempfile::tempdir().unwrap();
        write_tag_files(&barn.path().join("jobA"));
        let source = write_job_file(barn.path(), "jobA/photo.jpg");

        let catalog = Arc::new(crate::catalog::InMemoryCatalogStore::new());
        let orchestrator = test_orchestrator(barn.path().to_path_buf(), warehouse.path().to_path_buf(), catalog.clone());

        orchestrator.process_inner(&source).await.unwrap();

        assert_eq!(catalog.record_count("images").await, 1);
        assert!(!tokio::fs::try_exists(&source).await.unwrap(), "source removed on success");
    }
}
