use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Result;

/// Barn/warehouse directory configuration (`dirs.*` in the YAML file).
#[derive(Debug, Clone, Deserialize)]
pub struct DirsConfig {
    pub barn: PathBuf,
    pub warehouse: PathBuf,
}

/// Document-store connection and collection naming (`mongodb.*`).
#[derive(Debug, Clone, Deserialize)]
pub struct MongoCollections {
    pub images: String,
    pub videos: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub name: String,
    pub collections: MongoCollections,
}

/// Broker endpoint and queue naming (`rabbitmq.*`).
#[derive(Debug, Clone, Deserialize)]
pub struct RabbitMqConfig {
    pub host: String,
    pub port: u16,
    pub queue: String,
}

impl RabbitMqConfig {
    pub fn amqp_uri(&self) -> String {
        format!("amqp://{}:{}", self.host, self.port)
    }
}

/// Probe retry budget (`monitor.*`).
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "MonitorConfig::default_max_num_try")]
    pub max_num_try: u32,
    #[serde(default = "MonitorConfig::default_timeout")]
    pub timeout: u64,
}

impl MonitorConfig {
    fn default_max_num_try() -> u32 {
        3
    }

    fn default_timeout() -> u64 {
        30
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_num_try: Self::default_max_num_try(),
            timeout: Self::default_timeout(),
        }
    }
}

/// Structured logging knobs with no counterpart in the distilled spec, added
/// so the binary can actually be operated (`logging.*`).
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
        }
    }
}

/// Whether a duplicate's source is removed, and how widely the `dwarf.run`
/// sentinel is recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentinelScope {
    Anywhere,
    BarnRoot,
}

impl Default for SentinelScope {
    fn default() -> Self {
        Self::Anywhere
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub duplicate_removes_source: bool,
    #[serde(default)]
    pub sentinel_scope: SentinelScope,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            duplicate_removes_source: false,
            sentinel_scope: SentinelScope::default(),
        }
    }
}

/// Tuning for the `StabilizationWatcher` fallback (see `watch` module).
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "WatchConfig::default_interval")]
    pub stabilization_interval_secs: u64,
    #[serde(default = "WatchConfig::default_required_polls")]
    pub stabilization_required_polls: u32,
}

impl WatchConfig {
    fn default_interval() -> u64 {
        2
    }

    fn default_required_polls() -> u32 {
        2
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            stabilization_interval_secs: Self::default_interval(),
            stabilization_required_polls: Self::default_required_polls(),
        }
    }
}

/// The full recognized configuration tree, loaded once at `main` and passed
/// down to component constructors rather than read from module-scope
/// globals (see DESIGN.md).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub dirs: DirsConfig,
    pub mongodb: MongoConfig,
    pub rabbitmq: RabbitMqConfig,
    pub video_types: Vec<String>,
    pub image_types: Vec<String>,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub watch: WatchConfig,
}

impl Config {
    /// Load and validate the YAML config at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?;
        let cfg: Config = settings.try_deserialize()?;
        Ok(cfg)
    }

    /// Determine the routing class of a lowercased suffix (no leading dot),
    /// or `None` if it's in neither configured list (the "unsupported"
    /// precheck failure).
    pub fn classify(&self, suffix: &str) -> Option<crate::model::MediaKind> {
        if self.video_types.iter().any(|s| s == suffix) {
            Some(crate::model::MediaKind::Video)
        } else if self.image_types.iter().any(|s| s == suffix) {
            Some(crate::model::MediaKind::Image)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_yaml() -> &'static str {
        r#"
dirs:
  barn: /srv/barn
  warehouse: /srv/warehouse
mongodb:
  host: localhost
  port: 27017
  username: dwarf
  password: "secret pass"
  name: mediadb
  collections:
    images: images
    videos: videos
rabbitmq:
  host: localhost
  port: 5672
  queue: ingest
video_types: [mp4, mov, mkv]
image_types: [jpg, png, gif]
monitor:
  max_num_try: 5
  timeout: 10
"#
    }

    #[test]
    fn loads_required_fields_and_applies_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(sample_yaml().as_bytes()).unwrap();
        let cfg = Config::load(file.path()).unwrap();

        assert_eq!(cfg.dirs.barn, PathBuf::from("/srv/barn"));
        assert_eq!(cfg.monitor.max_num_try, 5);
        assert_eq!(cfg.monitor.timeout, 10);
        assert!(!cfg.policy.duplicate_removes_source);
        assert_eq!(cfg.policy.sentinel_scope, SentinelScope::Anywhere);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn classify_routes_by_configured_suffix_lists() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(sample_yaml().as_bytes()).unwrap();
        let cfg = Config::load(file.path()).unwrap();

        assert_eq!(cfg.classify("mp4"), Some(crate::model::MediaKind::Video));
        assert_eq!(cfg.classify("jpg"), Some(crate::model::MediaKind::Image));
        assert_eq!(cfg.classify("exe"), None);
    }
}
