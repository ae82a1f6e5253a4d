use std::path::Path;

use crate::config::schema::{ResearchConfig, SUPPORTED_VERSION};
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ResearchConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<ResearchConfig, ConfigError> {
    let config: ResearchConfig = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &ResearchConfig) -> Result<(), ConfigError> {
    if config.version != SUPPORTED_VERSION {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let url = reqwest::Url::parse(config.api_base_url.trim()).map_err(|e| ConfigError::Validation {
        message: format!("Invalid api_base_url '{}': {}", config.api_base_url, e),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Validation {
            message: format!("api_base_url must use http or https, got '{}'", url.scheme()),
        });
    }

    if config.report_directory.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "report_directory must not be empty".to_string(),
        });
    }

    for (name, value) in [
        ("request_timeout_secs", config.request_timeout_secs),
        ("connect_timeout_secs", config.connect_timeout_secs),
        ("poll_interval_ms", config.poll_interval_ms),
        ("max_backoff_ms", config.max_backoff_ms),
    ] {
        if value == 0 {
            return Err(ConfigError::Validation {
                message: format!("{} must be greater than zero", name),
            });
        }
    }

    if config.user_id.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "user_id must not be empty".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogFormat;

    #[test]
    fn test_load_minimal_config_applies_defaults() {
        let config_json = r#"
        {
            "version": "1.0",
            "api_base_url": "https://research.example.com",
            "report_directory": "/notes/research"
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.user_id, "local");
        assert_eq!(config.poll_interval_ms, 5_000);
        assert_eq!(config.max_backoff_ms, 60_000);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.resume_limit, 50);
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert!(config.api_key().unwrap().is_none());
    }

    #[test]
    fn test_load_full_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "api_base_url": "http://localhost:8080",
            "api_key": "sk-test",
            "user_id": "ana",
            "poll_interval_ms": 2000,
            "report_directory": "/notes",
            "database_path": "/tmp/research.db",
            "logging": {"format": "json", "filter": "deepresearch=debug"}
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.user_id, "ana");
        assert_eq!(config.poll_interval().as_millis(), 2000);
        assert_eq!(config.database_path().unwrap().to_str(), Some("/tmp/research.db"));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.api_key().unwrap().is_some());
    }

    #[test]
    fn test_invalid_version() {
        let config_json = r#"{"version": "2.0", "api_base_url": "https://a.b", "report_directory": "/n"}"#;
        assert!(matches!(
            load_config_from_str(config_json),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn test_invalid_base_url() {
        for url in ["not a url", "ftp://files.example.com"] {
            let config_json = format!(
                r#"{{"version": "1.0", "api_base_url": "{}", "report_directory": "/n"}}"#,
                url
            );
            assert!(load_config_from_str(&config_json).is_err(), "{}", url);
        }
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config_json = r#"{"version": "1.0", "api_base_url": "https://a.b", "report_directory": "/n", "request_timeout_secs": 0}"#;
        let err = load_config_from_str(config_json).unwrap_err();
        assert!(err.to_string().contains("request_timeout_secs"));
    }

    #[test]
    fn test_empty_report_directory_rejected() {
        let config_json = r#"{"version": "1.0", "api_base_url": "https://a.b", "report_directory": "  "}"#;
        assert!(load_config_from_str(config_json).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_config("/nonexistent/deepresearch.json"),
            Err(ConfigError::ReadFile { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"version": "1.0", "api_base_url": "https://a.b", "report_directory": "~/notes"}"#,
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert!(!config.report_directory().starts_with("~"));
    }
}
