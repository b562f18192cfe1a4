//! Configuration for the fan-out core.
//!
//! A layered `Config`: struct defaults, optionally overridden by a TOML or
//! YAML file, then by environment variables, then by CLI flags (wired up
//! in [`crate::app`]) — no hidden global, loaded once by the entry point
//! and passed down explicitly, matching §9's stance on the registry.

mod byte_size;
mod duration;
mod general;

pub use byte_size::ByteSize;
pub use duration::Duration;
pub use general::General;

use crate::errors::ConfigError;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration file format, detected from the path extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
}

impl ConfigFormat {
    pub fn detect(path: &str) -> Self {
        let path_lower = path.to_lowercase();
        if path_lower.ends_with(".yaml") || path_lower.ends_with(".yml") {
            ConfigFormat::Yaml
        } else {
            ConfigFormat::Toml
        }
    }
}

fn parse_config_content<T: serde::de::DeserializeOwned>(
    contents: &str,
    format: ConfigFormat,
) -> Result<T, ConfigError> {
    match format {
        ConfigFormat::Toml => {
            toml::from_str(contents).map_err(|err| ConfigError::Parse(err.to_string()))
        }
        ConfigFormat::Yaml => {
            serde_yaml::from_str(contents).map_err(|err| ConfigError::Parse(err.to_string()))
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub general: General,
}

impl Config {
    /// Loads defaults, then overlays a config file if one was given. A
    /// missing `path` yields pure defaults — the core is runnable with no
    /// configuration at all.
    pub async fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Config::default());
        };
        let format = ConfigFormat::detect(path);
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| ConfigError::Read {
                path: path.to_string(),
                message: err.to_string(),
            })?;
        let config: Config = parse_config_content(&contents, format)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.general.bundle_trigger.as_bytes() == 0 {
            return Err(ConfigError::Invalid(
                "general.bundle_trigger must be greater than zero".into(),
            ));
        }
        if self.general.scan_page_size == 0 {
            return Err(ConfigError::Invalid(
                "general.scan_page_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn show(&self) {
        tracing::info!(
            host = %self.general.host,
            port = self.general.port,
            rollback_threshold_ms = self.general.rollback_threshold.as_millis(),
            bundle_trigger_bytes = self.general.bundle_trigger.as_bytes(),
            scan_page_size = self.general.scan_page_size,
            "loaded configuration"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_format_detects_yaml_by_extension() {
        assert_eq!(ConfigFormat::detect("foo.yaml"), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::detect("foo.yml"), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::detect("foo.toml"), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::detect("foo"), ConfigFormat::Toml);
    }

    #[tokio::test]
    async fn load_with_no_path_returns_defaults() {
        let config = Config::load(None).await.unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn validate_rejects_zero_bundle_trigger() {
        let mut config = Config::default();
        config.general.bundle_trigger = ByteSize::from_bytes(0);
        assert!(config.validate().is_err());
    }
}
