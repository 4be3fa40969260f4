use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{BrokerError, Result};
use crate::scheduler::job::DEFAULT_REDELIVERY_GRACE;

pub const DEFAULT_PORT: u16 = 9009;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub listen_addr: SocketAddr,
    /// Time a job waits after its last delivery before redelivering
    /// tasks that were never reported complete.
    pub redelivery_grace: Duration,
    /// Submissions beyond this many live jobs are rejected.
    pub max_jobs: usize,
    /// Upper bound on the `max` a worker may request in one poll.
    pub max_batch_size: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            redelivery_grace: DEFAULT_REDELIVERY_GRACE,
            max_jobs: 10_000,
            max_batch_size: 1_000,
        }
    }
}

/// On-disk form of the configuration. Every field is optional and falls
/// back to [`BrokerConfig::default`].
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub redelivery_grace_secs: Option<u64>,
    pub max_jobs: Option<usize>,
    pub max_batch_size: Option<usize>,
}

impl BrokerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    /// Read a TOML config file and apply it over the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents)
            .map_err(|e| BrokerError::Config(format!("invalid config file: {}", e)))?;
        let mut config = Self::default();
        config.apply(file);
        config.validate()?;
        Ok(config)
    }

    /// Overwrite fields that are set in `file`.
    pub fn apply(&mut self, file: ConfigFile) {
        if let Some(bind) = file.bind {
            self.listen_addr.set_ip(bind);
        }
        if let Some(port) = file.port {
            self.listen_addr.set_port(port);
        }
        if let Some(secs) = file.redelivery_grace_secs {
            self.redelivery_grace = Duration::from_secs(secs);
        }
        if let Some(max_jobs) = file.max_jobs {
            self.max_jobs = max_jobs;
        }
        if let Some(max_batch_size) = file.max_batch_size {
            self.max_batch_size = max_batch_size;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_jobs == 0 {
            return Err(BrokerError::Config("max_jobs must be at least 1".to_string()));
        }
        if self.max_batch_size == 0 {
            return Err(BrokerError::Config(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_config_default() {
        let cfg = BrokerConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "0.0.0.0:9009");
        assert_eq!(cfg.redelivery_grace, Duration::from_secs(30));
        assert_eq!(cfg.max_jobs, 10_000);
        assert_eq!(cfg.max_batch_size, 1_000);
    }

    #[test]
    fn broker_config_new() {
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let cfg = BrokerConfig::new(addr);
        assert_eq!(cfg.listen_addr, addr);
        assert_eq!(cfg.max_jobs, 10_000);
    }

    #[test]
    fn empty_file_keeps_defaults() {
        let cfg = BrokerConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.listen_addr.port(), DEFAULT_PORT);
        assert_eq!(cfg.redelivery_grace, DEFAULT_REDELIVERY_GRACE);
    }

    #[test]
    fn file_overrides_fields() {
        let cfg = BrokerConfig::from_toml_str(
            r#"
            bind = "127.0.0.1"
            port = 8080
            redelivery_grace_secs = 5
            max_jobs = 12
            max_batch_size = 50
            "#,
        )
        .unwrap();
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(cfg.redelivery_grace, Duration::from_secs(5));
        assert_eq!(cfg.max_jobs, 12);
        assert_eq!(cfg.max_batch_size, 50);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = BrokerConfig::from_toml_str("graph_cache = 3").unwrap_err();
        assert!(matches!(err, BrokerError::Config(_)));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = BrokerConfig::from_toml_str("max_batch_size = 0").unwrap_err();
        assert!(matches!(err, BrokerError::Config(_)));
    }

    #[test]
    fn zero_max_jobs_is_rejected() {
        let cfg = BrokerConfig {
            max_jobs: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.toml");
        std::fs::write(&path, "port = 7000\n").unwrap();

        let cfg = BrokerConfig::load(&path).unwrap();
        assert_eq!(cfg.listen_addr.port(), 7000);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = BrokerConfig::load(Path::new("/nonexistent/broker.toml")).unwrap_err();
        assert!(matches!(err, BrokerError::Io(_)));
    }
}
