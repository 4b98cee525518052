//! Engine configuration: worker pool sizing, queue order and cache settings.

use resload_cache::config::parse_env;
use resload_cache::{CacheConfig, CacheResult};
use std::str::FromStr;
use std::time::Duration;

/// Order in which a fixed pool drains its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueProcessingType {
    /// Oldest request first
    #[default]
    Fifo,
    /// Newest request first; favours whatever the consumer asked for last
    Lifo,
}

impl FromStr for QueueProcessingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(QueueProcessingType::Fifo),
            "lifo" => Ok(QueueProcessingType::Lifo),
            other => Err(other.to_string()),
        }
    }
}

/// Configuration for a [`DispatchEngine`](crate::DispatchEngine).
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Threads in each of the fast and slow pools.
    /// Default: 3.
    pub thread_pool_size: usize,

    /// Queue order of the fast and slow pools.
    pub queue_type: QueueProcessingType,

    /// Prefix of worker thread names.
    /// Default: `resload-pool-`.
    pub thread_name_prefix: String,

    /// How long an idle distributor thread lingers before exiting.
    /// Default: 60s.
    pub distributor_keep_alive: Duration,

    /// Settings for the caches the engine creates itself.
    pub cache: CacheConfig,
}

pub const DEFAULT_THREAD_POOL_SIZE: usize = 3;
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "resload-pool-";
pub const DISTRIBUTOR_THREAD_NAME_PREFIX: &str = "resload-pool-d-";

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thread_pool_size: DEFAULT_THREAD_POOL_SIZE,
            queue_type: QueueProcessingType::Fifo,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            distributor_keep_alive: Duration::from_secs(60),
            cache: CacheConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with the given pool size.
    pub fn new(thread_pool_size: usize) -> Self {
        Self {
            thread_pool_size: thread_pool_size.max(1),
            ..Self::default()
        }
    }

    pub fn with_queue_type(mut self, queue_type: QueueProcessingType) -> Self {
        self.queue_type = queue_type;
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn with_distributor_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.distributor_keep_alive = keep_alive;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Loads configuration from environment variables.
    ///
    /// Reads `RESLOAD_THREAD_POOL_SIZE` and `RESLOAD_QUEUE_TYPE` (`fifo` or
    /// `lifo`) on top of the variables understood by
    /// [`CacheConfig::from_env`].
    pub fn from_env() -> CacheResult<Self> {
        let mut config = Self {
            cache: CacheConfig::from_env()?,
            ..Self::default()
        };

        if let Some(size) = parse_env::<usize>("RESLOAD_THREAD_POOL_SIZE")? {
            config.thread_pool_size = size.max(1);
        }
        if let Some(queue_type) = parse_env::<QueueProcessingType>("RESLOAD_QUEUE_TYPE")? {
            config.queue_type = queue_type;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.thread_pool_size, 3);
        assert_eq!(config.queue_type, QueueProcessingType::Fifo);
        assert_eq!(config.thread_name_prefix, "resload-pool-");
        assert_eq!(config.distributor_keep_alive, Duration::from_secs(60));
    }

    #[test]
    fn test_engine_config_builder() {
        let config = EngineConfig::new(0)
            .with_queue_type(QueueProcessingType::Lifo)
            .with_thread_name_prefix("loader-")
            .with_distributor_keep_alive(Duration::from_millis(10));

        assert_eq!(config.thread_pool_size, 1);
        assert_eq!(config.queue_type, QueueProcessingType::Lifo);
        assert_eq!(config.thread_name_prefix, "loader-");
        assert_eq!(config.distributor_keep_alive, Duration::from_millis(10));
    }

    #[test]
    fn test_queue_type_parse() {
        assert_eq!("LIFO".parse(), Ok(QueueProcessingType::Lifo));
        assert_eq!("fifo".parse(), Ok(QueueProcessingType::Fifo));
        assert!("stack".parse::<QueueProcessingType>().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let saved: Vec<_> = ["RESLOAD_THREAD_POOL_SIZE", "RESLOAD_QUEUE_TYPE"]
            .iter()
            .map(|name| (*name, env::var(name).ok()))
            .collect();

        env::set_var("RESLOAD_THREAD_POOL_SIZE", "5");
        env::set_var("RESLOAD_QUEUE_TYPE", "lifo");
        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.thread_pool_size, 5);
        assert_eq!(config.queue_type, QueueProcessingType::Lifo);

        env::set_var("RESLOAD_THREAD_POOL_SIZE", "many");
        assert!(EngineConfig::from_env().is_err());

        for (name, value) in saved {
            match value {
                Some(v) => env::set_var(name, v),
                None => env::remove_var(name),
            }
        }
    }
}
