use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AnalyzerError, Result};

pub const DEFAULT_KEY_TOP: usize = 100;
pub const DEFAULT_MONITOR_SECS: u64 = 10;
pub const DEFAULT_MAX_KEY_LENGTH: usize = 100;
pub const DEFAULT_SHARD_COUNT: usize = 5;
pub const DEFAULT_QUEUE_CAPACITY: usize = 100_000;
pub const DEFAULT_PENDING_TTL_SECS: u64 = 60;

/// Per-shard cap on retained slow-call samples
pub const SLOW_CALL_CAPACITY: usize = 1000;

/// Separators used to cut keys into prefixes
pub const KEY_SEPARATORS: &str = ":;,_- ";

/// Everything one analysis run needs, already resolved by the caller
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub capture_duration: Duration,
    pub monitored_port: u16,
    pub max_key_length: usize,
    pub top_n: usize,
    pub host_ip: IpAddr,
    pub shard_count: usize,
    pub command_log: Option<PathBuf>,
    pub queue_capacity: usize,
    pub pending_ttl: Duration,
    pub pin_workers: bool,
}

impl AnalyzerConfig {
    pub fn new(monitored_port: u16, host_ip: IpAddr) -> Self {
        Self {
            capture_duration: Duration::from_secs(DEFAULT_MONITOR_SECS),
            monitored_port,
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
            top_n: DEFAULT_KEY_TOP,
            host_ip,
            shard_count: DEFAULT_SHARD_COUNT,
            command_log: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            pending_ttl: Duration::from_secs(DEFAULT_PENDING_TTL_SECS),
            pin_workers: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(AnalyzerError::InvalidConfig(msg.to_string()));

        if self.monitored_port == 0 {
            return invalid("monitored port must be non-zero");
        }
        if self.host_ip.is_unspecified() {
            return invalid("host IP must be a concrete address");
        }
        if self.capture_duration.is_zero() {
            return invalid("capture duration must be positive");
        }
        if self.top_n == 0 {
            return invalid("top-N must be at least 1");
        }
        if self.max_key_length == 0 {
            return invalid("maximum key length must be at least 1");
        }
        if self.shard_count == 0 {
            return invalid("shard count must be at least 1");
        }
        if self.queue_capacity == 0 {
            return invalid("queue capacity must be at least 1");
        }
        Ok(())
    }

    pub fn pending_ttl_us(&self) -> i64 {
        i64::try_from(self.pending_ttl.as_micros()).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> AnalyzerConfig {
        AnalyzerConfig::new(6379, "10.0.0.1".parse().unwrap())
    }

    #[test]
    fn test_defaults_validate() {
        let config = base();
        assert!(config.validate().is_ok());
        assert_eq!(config.top_n, DEFAULT_KEY_TOP);
        assert_eq!(config.shard_count, DEFAULT_SHARD_COUNT);
        assert_eq!(config.pending_ttl_us(), 60_000_000);
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = base();
        config.monitored_port = 0;
        assert!(matches!(config.validate(), Err(AnalyzerError::InvalidConfig(_))));

        let mut config = base();
        config.host_ip = "0.0.0.0".parse().unwrap();
        assert!(config.validate().is_err());

        let mut config = base();
        config.shard_count = 0;
        assert!(config.validate().is_err());

        let mut config = base();
        config.top_n = 0;
        assert!(config.validate().is_err());

        let mut config = base();
        config.capture_duration = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
