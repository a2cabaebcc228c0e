//! Hierarchical configuration loader with precedence
//!
//! Loads resilience configuration from multiple sources with the following
//! precedence (low to high):
//! 1. Embedded defaults (built into the binary)
//! 2. User config (`~/.tessera/resilience.yaml`)
//! 3. Environment variables (`TESSERA_*` prefix)
//! 4. Explicit overrides applied by the caller

use crate::error::{Error, Result};
use crate::types::ResilienceConfig;
use camino::{Utf8Path, Utf8PathBuf};
use rust_embed::RustEmbed;
use serde::de::DeserializeOwned;
use std::env;
use std::fs;
use std::str::FromStr;

/// Embedded configuration files
#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/../../embedded/config/"]
#[prefix = ""]
struct EmbeddedConfigs;

const DEFAULTS_FILE: &str = "resilience-defaults.yaml";
const USER_CONFIG_FILE: &str = "resilience.yaml";

/// Configuration hierarchy loader
pub struct HierarchicalConfigLoader {
    /// Directory holding the user config file
    config_dir: Utf8PathBuf,
}

impl HierarchicalConfigLoader {
    /// Create a loader rooted at `~/.tessera`
    pub fn new() -> Result<Self> {
        let config_dir = Self::default_config_dir()?;
        Ok(Self { config_dir })
    }

    /// Create a loader with a custom config directory
    pub fn with_dir(config_dir: Utf8PathBuf) -> Self {
        Self { config_dir }
    }

    /// `~/.tessera`, preferring `$HOME` over the passwd entry so containers that
    /// override HOME resolve the same directory their shells do
    fn default_config_dir() -> Result<Utf8PathBuf> {
        let home = env::var("HOME")
            .ok()
            .map(std::path::PathBuf::from)
            .or_else(dirs::home_dir)
            .ok_or_else(|| Error::invalid_config("Could not determine home directory"))?;

        let home = Utf8PathBuf::from_path_buf(home)
            .map_err(|p| Error::invalid_config(format!("Home directory is not UTF-8: {}", p.display())))?;

        Ok(home.join(".tessera"))
    }

    /// Load the resilience configuration with hierarchical precedence
    pub fn load(&self) -> Result<ResilienceConfig> {
        let mut config = Self::load_embedded_config::<ResilienceConfig>(DEFAULTS_FILE)?;

        let user_config_path = self.user_config_path();
        if user_config_path.exists() {
            tracing::debug!(path = %user_config_path, "loading user resilience config");
            config = self.load_yaml_file::<ResilienceConfig>(&user_config_path)?;
        }

        Self::apply_env_overrides(config)
    }

    /// Load the embedded defaults only
    pub fn load_defaults() -> Result<ResilienceConfig> {
        Self::load_embedded_config(DEFAULTS_FILE)
    }

    /// Load an embedded configuration file
    fn load_embedded_config<T: DeserializeOwned>(filename: &str) -> Result<T> {
        let embedded_file = EmbeddedConfigs::get(filename).ok_or_else(|| {
            Error::config_not_found(format!("Embedded config not found: {}", filename))
        })?;

        let content = std::str::from_utf8(&embedded_file.data).map_err(|_| {
            Error::invalid_config(format!("Invalid UTF-8 in embedded config: {}", filename))
        })?;

        serde_yaml_ng::from_str(content).map_err(|e| {
            Error::invalid_config(format!(
                "Failed to parse embedded config {}: {}",
                filename, e
            ))
        })
    }

    /// Load a YAML file and parse it
    ///
    /// Sections missing from the file fall back to their serde defaults,
    /// which match the embedded defaults.
    fn load_yaml_file<T: DeserializeOwned>(&self, path: &Utf8Path) -> Result<T> {
        let content = fs::read_to_string(path)?;
        serde_yaml_ng::from_str(&content)
            .map_err(|e| Error::invalid_config(format!("Failed to parse {}: {}", path, e)))
    }

    /// Apply `TESSERA_*` environment variable overrides
    fn apply_env_overrides(mut config: ResilienceConfig) -> Result<ResilienceConfig> {
        if let Some(val) = env_parse::<usize>("TESSERA_SESSION_CAPACITY")? {
            config.session.capacity = val;
        }
        if let Some(val) = env_parse::<bool>("TESSERA_REGION_SCOPED_SESSION")? {
            config.session.region_scoped_capturing = val;
        }

        if let Some(val) = env_parse::<u64>("TESSERA_SESSION_MAX_WAIT_MS")? {
            config.session_retry.max_wait_ms = val;
        }
        if let Some(val) = env_parse::<u64>("TESSERA_SESSION_INITIAL_BACKOFF_MS")? {
            config.session_retry.initial_backoff_ms = val;
        }
        if let Some(val) = env_parse::<u64>("TESSERA_NETWORK_MAX_WAIT_MS")? {
            config.network_retry.max_wait_ms = val;
        }

        if let Some(val) = env_parse::<u32>("TESSERA_THROTTLE_MAX_ATTEMPTS")? {
            config.throttling.max_attempts = val;
        }
        if let Some(val) = env_parse::<u64>("TESSERA_THROTTLE_MAX_WAIT_MS")? {
            config.throttling.max_wait_ms = val;
        }

        if let Ok(val) = env::var("TESSERA_PREFERRED_REGIONS") {
            config.endpoint.preferred_regions = val
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(val) = env_parse::<bool>("TESSERA_BREAKER_ENABLED")? {
            config.circuit_breaker.enabled = val;
        }
        if let Some(val) = env_parse::<u32>("TESSERA_BREAKER_THRESHOLD")? {
            config.circuit_breaker.failure_threshold = val;
        }
        if let Some(val) = env_parse::<u64>("TESSERA_BREAKER_COOLDOWN_MS")? {
            config.circuit_breaker.cooldown_ms = val;
        }

        if let Some(val) = env_parse::<bool>("TESSERA_HEDGING_ENABLED")? {
            config.hedging.enabled = val;
        }
        if let Some(val) = env_parse::<u64>("TESSERA_HEDGING_DELAY_MS")? {
            config.hedging.min_delay_ms = val;
        }

        if let Some(val) = env_parse::<u64>("TESSERA_E2E_TIMEOUT_MS")? {
            config.operation.end_to_end_timeout_ms = Some(val);
        }

        Ok(config)
    }

    /// Path of the user config file
    pub fn user_config_path(&self) -> Utf8PathBuf {
        self.config_dir.join(USER_CONFIG_FILE)
    }

    /// Get the config directory path
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }
}

/// Read and parse an environment variable, `None` when unset
fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::invalid_config(format!("{} has an invalid value: {}", name, val))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn create_temp_loader() -> (HierarchicalConfigLoader, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_dir =
            Utf8PathBuf::from_path_buf(temp_dir.path().to_path_buf()).expect("Invalid UTF-8 path");
        let loader = HierarchicalConfigLoader::with_dir(config_dir);
        (loader, temp_dir)
    }

    #[test]
    fn test_embedded_defaults_match_code_defaults() {
        let config = HierarchicalConfigLoader::load_defaults().unwrap();
        assert_eq!(config, ResilienceConfig::default());
    }

    #[test]
    #[serial]
    fn test_load_defaults_without_user_file() {
        let (loader, _temp) = create_temp_loader();
        let config = loader.load().unwrap();
        assert_eq!(config.throttling.max_attempts, 9);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
    }

    #[test]
    #[serial]
    fn test_load_from_user_file() {
        let (loader, _temp) = create_temp_loader();

        let config_content = r#"
session:
  capacity: 64
  region-scoped-capturing: true
circuit-breaker:
  failure-threshold: 3
  cooldown-ms: 2000
endpoint:
  preferred-regions: ["West Europe", "North Europe"]
"#;
        fs::write(loader.user_config_path(), config_content).unwrap();

        let config = loader.load().unwrap();
        assert_eq!(config.session.capacity, 64);
        assert!(config.session.region_scoped_capturing);
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.cooldown_ms, 2000);
        assert_eq!(
            config.endpoint.preferred_regions,
            vec!["West Europe".to_string(), "North Europe".to_string()]
        );
        assert_eq!(config.throttling.max_attempts, 9);
    }

    #[test]
    #[serial]
    fn test_invalid_user_file() {
        let (loader, _temp) = create_temp_loader();
        fs::write(loader.user_config_path(), "circuit-breaker: [not, a, map]").unwrap();

        let err = loader.load().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        let (loader, _temp) = create_temp_loader();

        env::set_var("TESSERA_BREAKER_THRESHOLD", "7");
        env::set_var("TESSERA_PREFERRED_REGIONS", "East US, West US ,");
        env::set_var("TESSERA_E2E_TIMEOUT_MS", "2500");
        env::set_var("TESSERA_REGION_SCOPED_SESSION", "true");

        let config = loader.load().unwrap();
        assert_eq!(config.circuit_breaker.failure_threshold, 7);
        assert_eq!(
            config.endpoint.preferred_regions,
            vec!["East US".to_string(), "West US".to_string()]
        );
        assert_eq!(config.operation.end_to_end_timeout_ms, Some(2500));
        assert!(config.session.region_scoped_capturing);

        env::remove_var("TESSERA_BREAKER_THRESHOLD");
        env::remove_var("TESSERA_PREFERRED_REGIONS");
        env::remove_var("TESSERA_E2E_TIMEOUT_MS");
        env::remove_var("TESSERA_REGION_SCOPED_SESSION");
    }

    #[test]
    #[serial]
    fn test_invalid_env_value() {
        let (loader, _temp) = create_temp_loader();

        env::set_var("TESSERA_THROTTLE_MAX_ATTEMPTS", "many");
        let result = loader.load();
        env::remove_var("TESSERA_THROTTLE_MAX_ATTEMPTS");

        let err = result.unwrap_err();
        assert!(err.to_string().contains("TESSERA_THROTTLE_MAX_ATTEMPTS"));
    }

    #[test]
    fn test_config_dir_accessors() {
        let temp_dir = TempDir::new().unwrap();
        let config_dir = Utf8PathBuf::from_path_buf(temp_dir.path().join("nested"))
            .expect("Invalid UTF-8 path");

        let loader = HierarchicalConfigLoader::with_dir(config_dir.clone());
        assert_eq!(loader.config_dir(), config_dir);
        assert_eq!(loader.user_config_path(), config_dir.join("resilience.yaml"));
    }
}
