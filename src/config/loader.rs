//! Configuration Loader
//!
//! Environment-aware configuration loading. Sources are merged in this order,
//! later sources winning:
//!
//! 1. compiled defaults
//! 2. TOML file (`DEPLOYER_CONFIG_PATH`, falling back to `config/deployer.toml`)
//! 3. environment variables, e.g. `DEPLOYER_PROVISIONING__MAX_WORKERS=4`

use super::error::{ConfigResult, ConfigurationError};
use super::DeployerConfig;
use crate::constants::env;
use config::{Config, Environment, File, FileFormat};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const DEFAULT_CONFIG_FILE: &str = "config/deployer.toml";

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: DeployerConfig,
    environment: String,
    config_file: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        let explicit = std::env::var(env::CONFIG_PATH).ok().map(PathBuf::from);
        Self::load_from_path(explicit)
    }

    /// Load configuration from a specific file. An explicit path must exist;
    /// without one the default location is used when present.
    pub fn load_from_path(path: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_env_source(path, None)
    }

    /// Load configuration with an explicit environment variable map instead of the
    /// process environment. Useful for testing without touching global state.
    pub fn load_with_overrides(
        path: Option<PathBuf>,
        overrides: HashMap<String, String>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_env_source(path, Some(overrides))
    }

    fn load_with_env_source(
        path: Option<PathBuf>,
        env_source: Option<HashMap<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        let config_file = Self::resolve_config_file(path)?;

        debug!(
            environment = %environment,
            config_file = ?config_file,
            "Loading deployer configuration"
        );

        let defaults = Config::try_from(&DeployerConfig::default())
            .map_err(|e| ConfigurationError::load_error("defaults", e))?;

        let mut builder = Config::builder().add_source(defaults);
        if let Some(file) = &config_file {
            builder = builder.add_source(File::from(file.as_path()).format(FileFormat::Toml));
        }

        let mut environment_source = Environment::with_prefix(env::CONFIG_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true);
        if let Some(source) = env_source {
            environment_source = environment_source.source(Some(source.into_iter().collect()));
        }
        builder = builder.add_source(environment_source);

        let description = config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "defaults and environment".to_string());

        let config: DeployerConfig = builder
            .build()
            .and_then(|merged| merged.try_deserialize::<DeployerConfig>())
            .map_err(|e| ConfigurationError::load_error(description, e))?;

        config.validate()?;

        debug!(
            "Configuration loaded: {}",
            serde_json::to_string(&Self::sanitize_config_for_logging(&config))
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );

        crate::log_run!(info, "Configuration loaded",
            environment: environment,
            base_url: config.service.base_url,
            max_workers: config.provisioning.max_workers
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment,
            config_file,
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &DeployerConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    /// Configuration as JSON with credentials masked
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    /// Current environment from `DEPLOYER_ENV`, defaulting to development
    pub fn detect_environment() -> String {
        std::env::var(env::ENVIRONMENT).unwrap_or_else(|_| "development".to_string())
    }

    fn resolve_config_file(path: Option<PathBuf>) -> ConfigResult<Option<PathBuf>> {
        match path {
            Some(path) if path.is_file() => Ok(Some(path)),
            Some(path) => Err(ConfigurationError::FileNotFound { path }),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                Ok(default.is_file().then_some(default))
            }
        }
    }

    fn sanitize_config_for_logging(config: &DeployerConfig) -> serde_json::Value {
        let mut config_json = serde_json::json!(config);
        let sensitive_patterns = ["password", "secret", "key", "token", "credential"];
        Self::sanitize_json_recursive(&mut config_json, &sensitive_patterns);
        config_json
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    // header names are not secrets
                    let is_sensitive = !key_lower.ends_with("_header")
                        && sensitive_patterns
                            .iter()
                            .any(|pattern| key_lower.contains(pattern));

                    if is_sensitive {
                        *val = match val {
                            serde_json::Value::String(s) if s.is_empty() => {
                                serde_json::Value::String("[EMPTY]".to_string())
                            }
                            _ => serde_json::Value::String("[MASKED]".to_string()),
                        };
                    } else {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                    }
                }
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_masks_credentials() {
        let mut config = DeployerConfig::default();
        config.service.api_key = "super-secret".to_string();
        let sanitized = ConfigManager::sanitize_config_for_logging(&config);

        assert_eq!(sanitized["service"]["api_key"], "[MASKED]");
        assert_eq!(sanitized["service"]["bearer_token"], "[EMPTY]");
        assert_eq!(sanitized["service"]["api_key_header"], "X-API-Key");
        assert_eq!(sanitized["provisioning"]["max_workers"], 10);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let result = ConfigManager::load_from_path(Some(PathBuf::from(
            "/definitely/not/here/deployer.toml",
        )));
        assert!(matches!(
            result,
            Err(ConfigurationError::FileNotFound { .. })
        ));
    }
}
