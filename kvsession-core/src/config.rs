//! Configuration management

use crate::error::{ErrorContext, SessionError, SessionResult};
use crate::logging::LoggingConfig;
use crate::types::{BackendKind, KvSessionConfig, PoolConfig, StoreConfig};

use std::path::Path;

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:6379".to_string(),
            password: None,
        }
    }
}

impl Default for KvSessionConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Cached,
            store: StoreConfig::default(),
            pool: PoolConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl KvSessionConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> SessionResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SessionError::Config {
            message: format!("Failed to read config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("read_file")
                .with_suggestion("Check if the config file exists and is readable"),
        })?;

        let config: KvSessionConfig = toml::from_str(&content).map_err(|e| SessionError::Config {
            message: format!("Failed to parse config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("parse_toml")
                .with_suggestion("Check TOML syntax in config file"),
        })?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> SessionResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| SessionError::Config {
            message: format!("Failed to serialize config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("serialize_toml"),
        })?;

        std::fs::write(path, content).map_err(|e| SessionError::Config {
            message: format!("Failed to write config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("write_file")
                .with_suggestion("Check if the directory exists and is writable"),
        })?;

        Ok(())
    }

    /// Options handed to `SessionManager::init`: the credential, when configured
    pub fn init_options(&self) -> Vec<String> {
        self.store.password.iter().cloned().collect()
    }

    /// Validate configuration
    pub fn validate(&self) -> SessionResult<()> {
        if self.backend == BackendKind::Cached && self.store.address.trim().is_empty() {
            return Err(SessionError::Config {
                message: "Store address must not be empty for the cached backend".to_string(),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Set store.address to host:port of the key-value store"),
            });
        }

        if self.pool.max_idle == 0 {
            return Err(SessionError::Config {
                message: "Pool max_idle must be greater than 0".to_string(),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Set pool.max_idle to a positive value"),
            });
        }

        if self.pool.max_active != 0 && self.pool.max_idle > self.pool.max_active {
            return Err(SessionError::Config {
                message: format!(
                    "Pool max_idle ({}) exceeds max_active ({})",
                    self.pool.max_idle, self.pool.max_active
                ),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Lower pool.max_idle or raise pool.max_active"),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = KvSessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool.max_idle, 64);
        assert_eq!(config.pool.max_active, 1000);
        assert_eq!(config.pool.idle_timeout_ms, 1000);
    }

    #[test]
    fn test_validation_rejects_bad_pool_bounds() {
        let mut config = KvSessionConfig::default();
        config.pool.max_idle = 10;
        config.pool.max_active = 5;

        match config.validate().unwrap_err() {
            SessionError::Config { message, .. } => assert!(message.contains("max_idle")),
            other => panic!("Expected Config error, got {:?}", other),
        }

        // Unbounded active count accepts any idle bound
        config.pool.max_active = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_empty_address() {
        let mut config = KvSessionConfig::default();
        config.store.address = "  ".to_string();
        assert!(config.validate().is_err());

        config.backend = BackendKind::Local;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kvsession.toml");

        let mut config = KvSessionConfig::default();
        config.store.password = Some("hunter2".to_string());
        config.pool.max_idle = 8;
        config.save_to_file(&path).unwrap();

        let loaded = KvSessionConfig::from_file(&path).unwrap();
        assert_eq!(loaded.backend, BackendKind::Cached);
        assert_eq!(loaded.store.password.as_deref(), Some("hunter2"));
        assert_eq!(loaded.pool, config.pool);
        assert_eq!(loaded.init_options(), vec!["hunter2".to_string()]);
    }

    #[test]
    fn test_missing_logging_section_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("minimal.toml");
        std::fs::write(
            &path,
            r#"
backend = "local"

[store]
address = "10.0.0.5:6380"

[pool]
max_idle = 4
max_active = 16
idle_timeout_ms = 250
"#,
        )
        .unwrap();

        let config = KvSessionConfig::from_file(&path).unwrap();
        assert_eq!(config.backend, BackendKind::Local);
        assert_eq!(config.store.address, "10.0.0.5:6380");
        assert!(config.store.password.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_unreadable_file_is_config_error() {
        let result = KvSessionConfig::from_file("/definitely/not/here.toml");
        assert!(matches!(result, Err(SessionError::Config { .. })));
    }
}
