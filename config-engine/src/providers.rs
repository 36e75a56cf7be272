// Configuration providers (files and environment)
use figment::{
    providers::{Env, Format, Serialized, Toml, Yaml},
    Figment,
};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};
use crate::settings::SurveyConfig;
use crate::validation::ConfigValidator;

/// Environment prefix used by [`ConfigLoader::standard`]
pub const ENV_PREFIX: &str = "SURVEY_";

/// A single configuration layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// YAML or TOML file chosen by extension; must exist
    File(PathBuf),
    /// Environment variables with a prefix, nested with `__`
    Env { prefix: String },
}

impl ConfigSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        ConfigSource::File(path.into())
    }

    pub fn env(prefix: impl Into<String>) -> Self {
        ConfigSource::Env { prefix: prefix.into() }
    }
}

/// Merges sources over the built-in defaults; later sources win
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    sources: Vec<ConfigSource>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, then the optional file, then `SURVEY_*` variables
    pub fn standard(path: Option<&Path>) -> Self {
        let mut loader = Self::new();
        if let Some(path) = path {
            loader = loader.add_source(ConfigSource::file(path));
        }
        loader.add_source(ConfigSource::env(ENV_PREFIX))
    }

    pub fn add_source(mut self, source: ConfigSource) -> Self {
        self.sources.push(source);
        self
    }

    pub fn figment(&self) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(SurveyConfig::default()));

        for source in &self.sources {
            figment = match source {
                ConfigSource::File(path) => {
                    if !path.exists() {
                        return Err(ConfigError::SourceNotFound(path.clone()));
                    }
                    match path.extension().and_then(|ext| ext.to_str()) {
                        Some("yaml") | Some("yml") => figment.merge(Yaml::file(path)),
                        Some("toml") => figment.merge(Toml::file(path)),
                        other => {
                            return Err(ConfigError::UnsupportedFormat(
                                other.unwrap_or("<none>").to_string(),
                            ))
                        }
                    }
                }
                ConfigSource::Env { prefix } => figment.merge(Env::prefixed(prefix).split("__")),
            };
        }

        Ok(figment)
    }

    /// Extract and validate the configuration
    pub fn load(&self) -> Result<SurveyConfig> {
        let config: SurveyConfig = self.figment()?.extract()?;
        config.validate()?;

        tracing::debug!(
            sources = self.sources.len(),
            remote_enabled = config.remote.enabled,
            database = %config.database.path.display(),
            "Configuration loaded"
        );

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_file_then_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "survey.yaml",
                r#"
remote:
  base_url: "https://survey.example.org"
  api_key: "anon"
sync:
  error_threshold: 3
"#,
            )?;
            jail.set_env("SURVEY_SYNC__ERROR_THRESHOLD", "7");
            jail.set_env("SURVEY_DATABASE__PATH", ":memory:");

            let config = ConfigLoader::standard(Some(Path::new("survey.yaml")))
                .load()
                .unwrap();

            assert_eq!(config.remote.base_url, "https://survey.example.org");
            assert_eq!(config.remote.photo_bucket, "household-photos");
            assert_eq!(config.sync.error_threshold, 7);
            assert_eq!(config.database.path, PathBuf::from(":memory:"));
            Ok(())
        });
    }

    #[test]
    fn test_toml_source() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "survey.toml",
                r#"
[remote]
enabled = false

[sync]
drain_interval_secs = 60
"#,
            )?;

            let config = ConfigLoader::new()
                .add_source(ConfigSource::file("survey.toml"))
                .load()
                .unwrap();

            assert!(!config.remote.enabled);
            assert_eq!(config.sync.drain_interval_secs, 60);
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_is_reported() {
        let result = ConfigLoader::new()
            .add_source(ConfigSource::file("/definitely/not/here.yaml"))
            .load();
        assert!(matches!(result, Err(ConfigError::SourceNotFound(_))));
    }

    #[test]
    fn test_unsupported_extension() {
        Jail::expect_with(|jail| {
            jail.create_file("survey.ini", "remote=1")?;
            let result = ConfigLoader::new()
                .add_source(ConfigSource::file("survey.ini"))
                .load();
            assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        Jail::expect_with(|jail| {
            jail.set_env("SURVEY_REMOTE__BASE_URL", "https://survey.example.org");
            jail.set_env("SURVEY_SYNC__BACKOFF_BASE_SECS", "9000");
            let result = ConfigLoader::standard(None).load();
            assert!(matches!(result, Err(ConfigError::ValidationError(_))));
            Ok(())
        });
    }
}
