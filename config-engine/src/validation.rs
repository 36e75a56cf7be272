// Configuration validation
use crate::error::{ConfigError, Result};
use crate::settings::SurveyConfig;

pub trait ConfigValidator {
    fn validate(&self) -> Result<()>;
}

impl ConfigValidator for SurveyConfig {
    fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.database.max_connections == 0 {
            problems.push("database.max_connections must be at least 1".to_string());
        }

        if self.remote.enabled {
            let url = self.remote.base_url.trim();
            if url.is_empty() {
                problems.push("remote.base_url is required when remote sync is enabled".to_string());
            } else if !(url.starts_with("http://") || url.starts_with("https://")) {
                problems.push(format!("remote.base_url must be an http(s) URL, got {url}"));
            }
            if self.remote.photo_bucket.trim().is_empty() {
                problems.push("remote.photo_bucket must not be empty".to_string());
            }
        }

        if self.remote.request_timeout_secs == 0 {
            problems.push("remote.request_timeout_secs must be positive".to_string());
        }
        if self.sync.drain_interval_secs == 0 {
            problems.push("sync.drain_interval_secs must be positive".to_string());
        }
        if self.sync.backoff_base_secs > self.sync.backoff_max_secs {
            problems.push("sync.backoff_base_secs must not exceed sync.backoff_max_secs".to_string());
        }
        if self.sync.error_threshold == 0 {
            problems.push("sync.error_threshold must be at least 1".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationError(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> SurveyConfig {
        let mut config = SurveyConfig::default();
        config.remote.base_url = "https://survey.example.org".to_string();
        config
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_missing_url_fails_only_when_remote_enabled() {
        let mut config = SurveyConfig::default();
        assert!(config.validate().is_err());

        config.remote.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_problems_are_collected() {
        let mut config = valid_config();
        config.sync.backoff_base_secs = 600;
        config.sync.backoff_max_secs = 60;
        config.sync.error_threshold = 0;

        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("backoff_base_secs"));
        assert!(message.contains("error_threshold"));
    }

    #[test]
    fn test_non_http_url_rejected() {
        let mut config = valid_config();
        config.remote.base_url = "ftp://survey.example.org".to_string();
        assert!(config.validate().is_err());
    }
}
