use thiserror::Error;

/// The taxonomy of failures the pipeline can hit, named by kind rather than
/// by originating crate so the orchestrator can decide ack/retry/compensate
/// by matching on a handful of variants instead of inspecting messages.
#[derive(Error, Debug)]
pub enum DepotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("filesystem watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("unsupported suffix: {0}")]
    UnsupportedSuffix(String),

    #[error("duplicate content: hash {0} already cataloged")]
    Duplicate(String),

    #[error("format probe failed: {0}")]
    Probe(String),

    #[error("probe binary not found: {0}")]
    ProberMissing(String),

    #[error("warehouse copy failed: {0}")]
    Copy(String),

    #[error("manual tag discovery failed: {0}")]
    TagsMissing(String),

    #[error("catalog error: {0}")]
    Catalog(#[from] mongodb::error::Error),

    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DepotError>;
