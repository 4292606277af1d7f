//! Configuration loading.
//!
//! The whole governance stack can be configured from one TOML file with the
//! following resolution order:
//! 1. explicit path (e.g. `--config <path>`)
//! 2. `~/.vedrfolnir/config.toml` (user)
//! 3. `/etc/vedrfolnir/config.toml` (system)
//!
//! Every section and field is optional; missing values take the defaults of
//! the corresponding config struct.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::{CacheConfig, CachePolicy, DurableStore, FileStore, MemoryStore};
use crate::ratelimit::RateLimitConfig;
use crate::{GovernorError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    pub cache: CacheConfig,
    pub policy: CachePolicy,
    pub storage: StorageConfig,
    pub rate_limit: RateLimitConfig,
}

/// Which durable store backs the cache's second tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// No durable tier.
    None,
    /// Process-local store; contents are lost on exit.
    Memory,
    /// One file per entry on disk.
    #[default]
    File,
}

/// Durable store configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for the `file` backend. Defaults to the platform cache
    /// directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Instantiate the configured store.
    pub fn build(&self) -> Result<Option<Arc<dyn DurableStore>>> {
        let store: Arc<dyn DurableStore> = match self.backend {
            StorageBackend::None => return Ok(None),
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
            StorageBackend::File => Arc::new(self.file_store()?),
        };
        Ok(Some(store))
    }

    fn file_store(&self) -> Result<FileStore> {
        match &self.dir {
            Some(dir) => Ok(FileStore::new(dir)),
            None => default_file_store(),
        }
    }
}

#[cfg(feature = "file-store")]
fn default_file_store() -> Result<FileStore> {
    Ok(FileStore::default_location())
}

#[cfg(not(feature = "file-store"))]
fn default_file_store() -> Result<FileStore> {
    Err(GovernorError::Configuration(
        "storage.dir is required when the file-store feature is disabled".into(),
    ))
}

impl GovernanceConfig {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.vedrfolnir/config.toml`
    /// 3. `/etc/vedrfolnir/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        let content = fs::read_to_string(&path).map_err(|e| {
            GovernorError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        let config = Self::from_toml(&content).map_err(|e| match e {
            GovernorError::Configuration(msg) => {
                GovernorError::Configuration(format!("{path:?}: {msg}"))
            }
            other => other,
        })?;
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| {
            GovernorError::Configuration(format!("Failed to parse config: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| GovernorError::Configuration(format!("Failed to render config: {e}")))
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.rate_limit.validate()?;
        if !(0.0..=2.0).contains(&self.policy.max_temperature) {
            return Err(GovernorError::Configuration(
                "policy.max_temperature must be within [0, 2]".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(GovernorError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        #[cfg(feature = "file-store")]
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".vedrfolnir").join("config.toml");
            if user_config.exists() {
                return Ok(user_config);
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/vedrfolnir/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }

        Err(GovernorError::Configuration(
            "No config file found. Create ~/.vedrfolnir/config.toml or /etc/vedrfolnir/config.toml"
                .to_string(),
        ))
    }
}

/// Serde adapter storing a `Duration` as whole seconds.
pub(crate) mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::ratelimit::{IdentityClass, RuleSet};

    #[test]
    fn empty_document_yields_defaults() {
        let config = GovernanceConfig::from_toml("").unwrap();
        assert_eq!(config, GovernanceConfig::default());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
            [cache]
            max_size = 250
            default_ttl_secs = 900
            durable_tier = false

            [policy]
            max_temperature = 0.5
            min_response_len = 20

            [storage]
            backend = "memory"

            [rate_limit]
            default_class = "free"
            cost_per_token = 0.00001
            cleanup_interval_secs = 300

            [rate_limit.rule_sets.guest]
            minute = 1
            day = 5

            [rate_limit.emergency_brake]
            max_hourly_cost = 2.5
            max_daily_cost = 20.0

            [rate_limit.adaptive]
            enabled = false
        "#;
        let config = GovernanceConfig::from_toml(toml).unwrap();
        assert_eq!(config.cache.max_size, 250);
        assert_eq!(config.cache.default_ttl, Duration::from_secs(900));
        assert!(!config.cache.durable_tier);
        assert_eq!(config.policy.min_response_len, 20);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.rate_limit.default_class, IdentityClass::Free);
        assert_eq!(
            config.rate_limit.rule_sets.guest,
            RuleSet {
                minute: Some(1),
                hour: None,
                day: Some(5)
            }
        );
        // Untouched classes keep their defaults.
        assert_eq!(config.rate_limit.rule_sets.free, RuleSet::new(10, 100, 500));
        assert_eq!(config.rate_limit.emergency_brake.max_hourly_cost, 2.5);
        assert!(config.rate_limit.emergency_brake.enabled);
        assert!(!config.rate_limit.adaptive.enabled);
        assert_eq!(config.rate_limit.cleanup_interval, Duration::from_secs(300));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = GovernanceConfig::from_toml(
            r#"
            [rate_limit.emergency_brake]
            max_hourly_cost = -1.0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("ceilings"));

        assert!(GovernanceConfig::from_toml("[cache]\nmax_size = \"big\"").is_err());
    }

    #[test]
    fn toml_rendering_round_trips() {
        let config = GovernanceConfig::default();
        let rendered = config.to_toml().unwrap();
        assert_eq!(GovernanceConfig::from_toml(&rendered).unwrap(), config);
    }

    #[test]
    fn config_not_found_returns_error() {
        let result = GovernanceConfig::load(Some(Path::new("/nonexistent/config.toml")));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Config file not found"));
    }

    #[test]
    fn storage_backends_build() {
        let none = StorageConfig {
            backend: StorageBackend::None,
            dir: None,
        };
        assert!(none.build().unwrap().is_none());

        let file = StorageConfig {
            backend: StorageBackend::File,
            dir: Some(PathBuf::from("/tmp/vedrfolnir-test")),
        };
        assert_eq!(file.build().unwrap().unwrap().name(), "file");
    }
}
