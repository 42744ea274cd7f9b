use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::options::{ClientOptions, Credential, IndexOptions, ServerAddress};
use mongodb::{Client, Collection, Database, IndexModel};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::MongoConfig;
use crate::error::Result;
use crate::model::CatalogRecord;

/// The existence-check-then-insert surface the Orchestrator drives, kept as
/// a trait so the pipeline's dedup/compensate branches can be exercised
/// against `InMemoryCatalogStore` without a live MongoDB instance.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Returns true if a record with this hash already exists in the named
    /// collection.
    async fn exists(&self, hash: &str, collection_name: &str) -> Result<bool>;

    /// Insert a record into the named collection, returning its inserted id
    /// as a string.
    async fn insert(&self, collection_name: &str, record: &CatalogRecord) -> Result<String>;
}

/// Thin wrapper over the document store, scoped to one database: connect,
/// `exists` check before insert, `insert` to persist.
#[derive(Debug, Clone)]
pub struct Catalog {
    db: Database,
    images_collection: String,
    videos_collection: String,
}

impl Catalog {
    pub async fn connect(cfg: &MongoConfig) -> Result<Self> {
        let options = ClientOptions::builder()
            .hosts(vec![ServerAddress::Tcp {
                host: cfg.host.clone(),
                port: Some(cfg.port),
            }])
            .credential(
                Credential::builder()
                    .username(cfg.username.clone())
                    .password(cfg.password.clone())
                    .source(cfg.name.clone())
                    .build(),
            )
            .app_name("depot".to_string())
            .build();
        let client = Client::with_options(options)?;
        let db = client.database(&cfg.name);

        // Readiness probe: find_one against images at construction time. A
        // transient failure here is logged, not fatal — Mongo may become
        // reachable before the first message arrives.
        if let Err(e) = db
            .collection::<CatalogRecord>(&cfg.collections.images)
            .find_one(doc! {})
            .await
        {
            error!(error = %e, "failed to read database, please check");
        }

        let catalog = Self {
            db,
            images_collection: cfg.collections.images.clone(),
            videos_collection: cfg.collections.videos.clone(),
        };

        catalog.ensure_indexes().await;

        Ok(catalog)
    }

    /// Best-effort creation of a unique index on `hash` per collection. The
    /// dedup check before insert is correct but racy under concurrent
    /// consumers without this backstop, so failure here is logged rather
    /// than fatal.
    async fn ensure_indexes(&self) {
        for name in [&self.images_collection, &self.videos_collection] {
            let collection: Collection<CatalogRecord> = self.db.collection(name);
            let model = IndexModel::builder()
                .keys(doc! { "hash": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build();
            if let Err(e) = collection.create_index(model).await {
                warn!(collection = name, error = %e, "failed to ensure unique hash index");
            } else {
                info!(collection = name, "unique hash index ensured");
            }
        }
    }

    fn collection(&self, name: &str) -> Collection<CatalogRecord> {
        self.db.collection(name)
    }
}

#[async_trait]
impl CatalogStore for Catalog {
    async fn exists(&self, hash: &str, collection_name: &str) -> Result<bool> {
        let found = self
            .collection(collection_name)
            .find_one(doc! { "hash": hash })
            .await?;
        Ok(found.is_some())
    }

    async fn insert(&self, collection_name: &str, record: &CatalogRecord) -> Result<String> {
        let result = self.collection(collection_name).insert_one(record).await?;
        Ok(result.inserted_id.to_string())
    }
}

/// In-memory `CatalogStore` for unit-testing the Orchestrator's dedup,
/// compensate, and insert paths without a live MongoDB instance. Mirrors
/// the teacher's `InMemorySeriesScanStateRepository` shape: a
/// `tokio::sync::Mutex`-guarded map, keyed here by `(collection, hash)`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalogStore {
    records: Arc<Mutex<HashMap<(String, String), CatalogRecord>>>,
    fail_insert_for: Arc<Mutex<Option<String>>>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly, bypassing the dedup check — used to set up
    /// "this hash is already cataloged" test fixtures.
    pub async fn seed(&self, collection_name: &str, record: CatalogRecord) {
        let mut guard = self.records.lock().await;
        guard.insert((collection_name.to_string(), record.hash.clone()), record);
    }

    /// Make the next `insert` into `collection_name` fail, to exercise the
    /// compensating-delete path after a catalog error.
    pub async fn fail_next_insert(&self, collection_name: &str) {
        *self.fail_insert_for.lock().await = Some(collection_name.to_string());
    }

    pub async fn record_count(&self, collection_name: &str) -> usize {
        self.records
            .lock()
            .await
            .keys()
            .filter(|(collection, _)| collection == collection_name)
            .count()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn exists(&self, hash: &str, collection_name: &str) -> Result<bool> {
        let guard = self.records.lock().await;
        Ok(guard.contains_key(&(collection_name.to_string(), hash.to_string())))
    }

    async fn insert(&self, collection_name: &str, record: &CatalogRecord) -> Result<String> {
        let mut fail_guard = self.fail_insert_for.lock().await;
        if fail_guard.as_deref() == Some(collection_name) {
            *fail_guard = None;
            return Err(crate::error::DepotError::Internal(format!(
                "simulated insert failure for collection {collection_name}"
            )));
        }
        drop(fail_guard);

        let mut guard = self.records.lock().await;
        guard.insert((collection_name.to_string(), record.hash.clone()), record.clone());
        Ok(record.hash.clone())
    }
}
