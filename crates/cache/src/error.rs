use std::io;
use std::path::PathBuf;

/// Errors raised by cache construction, disk I/O and configuration.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(
        "neither {} nor reserve {} is usable as a cache directory",
        primary.display(),
        reserve.display()
    )]
    NoCacheDirectory { primary: PathBuf, reserve: PathBuf },
    #[error("{size} bytes exceeds the disk cache limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("configuration serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;
