//! Instance configuration

use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use super::RuntimeError;

/// Configuration for one coordination instance.
#[derive(Clone, Debug)]
pub struct InstanceConfig {
    /// Unique identifier for this instance
    pub instance_id: String,
    /// Path to the project root the instance coordinates
    pub project_root: PathBuf,
    /// Path handed to the persistence port
    pub db_path: PathBuf,
    /// Network port handed to the distribution port
    pub coordination_port: u16,
    /// Interval between background sync passes, in milliseconds
    pub sync_interval_ms: u64,
    /// Retention bound for the operation log; zero means unbounded
    pub max_history_entries: usize,
    /// Whether the distribution port should encrypt traffic
    pub encryption_enabled: bool,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
            project_root: PathBuf::from("."),
            db_path: PathBuf::from("./.syncopate/history.db"),
            coordination_port: 15001,
            sync_interval_ms: 1000,
            max_history_entries: 1000,
            encryption_enabled: true,
        }
    }
}

impl InstanceConfig {
    /// Check the configuration before any port is opened.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.instance_id.is_empty() {
            return Err(RuntimeError::InvalidConfig(
                "instance_id must not be empty".to_string(),
            ));
        }
        if self.project_root.as_os_str().is_empty() {
            return Err(RuntimeError::InvalidConfig(
                "project_root must not be empty".to_string(),
            ));
        }
        if self.db_path.as_os_str().is_empty() {
            return Err(RuntimeError::InvalidConfig(
                "db_path must not be empty".to_string(),
            ));
        }
        if self.coordination_port == 0 {
            return Err(RuntimeError::InvalidConfig(
                "coordination_port must be non-zero".to_string(),
            ));
        }
        if self.sync_interval_ms == 0 {
            return Err(RuntimeError::InvalidConfig(
                "sync_interval_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = InstanceConfig::default();
        assert!(config.validate().is_ok());
        // Each default config gets its own generated id.
        assert_ne!(config.instance_id, InstanceConfig::default().instance_id);
    }

    #[test]
    fn test_empty_instance_id_rejected() {
        let config = InstanceConfig {
            instance_id: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RuntimeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_port_rejected() {
        let config = InstanceConfig {
            coordination_port: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = InstanceConfig {
            sync_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
