//! Configuration loader for YAML files and environment overrides

use std::env;
use std::path::Path;

use crate::config::types::DiagConfig;
use crate::errors::DiagError;

/// Environment variable that overrides `endpoint.url`.
pub const URL_ENV_VAR: &str = "DIAGLOOP_MCP_URL";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<DiagConfig, DiagError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            DiagError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_str(content: &str) -> Result<DiagConfig, DiagError> {
        let mut config: DiagConfig = if content.trim().is_empty() {
            DiagConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };
        Self::apply_env_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub async fn load_or_default<P: AsRef<Path>>(path: P) -> Result<DiagConfig, DiagError> {
        let path = path.as_ref();
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            log::info!("Loading configuration from {}", path.display());
            Self::from_file(path).await
        } else {
            log::debug!(
                "No configuration file at {}, using defaults",
                path.display()
            );
            Self::from_str("")
        }
    }

    fn apply_env_overrides(config: &mut DiagConfig) {
        Self::apply_url_override(config, env::var(URL_ENV_VAR).ok());
    }

    /// Blank values leave the configured URL in place.
    fn apply_url_override(config: &mut DiagConfig, url: Option<String>) {
        let Some(url) = url.filter(|url| !url.trim().is_empty()) else {
            return;
        };
        log::debug!("Endpoint URL overridden by {}", URL_ENV_VAR);
        config.endpoint.url = url.trim().to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ColorChoice;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_match_observed_constants() {
        let config = ConfigLoader::from_str("").unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.delay(), Duration::from_secs(2));
        assert_eq!(config.compilation.stability_window(), Duration::from_secs(60));
        assert_eq!(config.compilation.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.tests.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.endpoint.quiet_tools, vec!["get_test_job".to_string()]);
        assert_eq!(config.console.benign_patterns.len(), 4);
        assert!(!config.tests.skip);
    }

    #[test]
    fn test_yaml_overrides_apply() {
        let yaml = r#"
retry:
  max_attempts: 5
compilation:
  stability_window_secs: 10
  sources:
    - dir: Assets/Game
      extension: cs
tests:
  skip: true
  mode: PlayMode
output:
  color: never
"#;
        let config = ConfigLoader::from_str(yaml).unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.delay_secs, 2);
        assert_eq!(config.compilation.stability_window_secs, 10);
        assert_eq!(config.compilation.sources.len(), 1);
        assert_eq!(config.compilation.artifacts[0].extension, "dll");
        assert!(config.tests.skip);
        assert_eq!(config.tests.mode, "PlayMode");
        assert_eq!(config.output.color, ColorChoice::Never);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(ConfigLoader::from_str("retry:\n  max_attempts: 0\n").is_err());
        assert!(ConfigLoader::from_str("endpoint:\n  url: localhost:8080\n").is_err());
        assert!(ConfigLoader::from_str("console:\n  benign_patterns: [[]]\n").is_err());
        assert!(ConfigLoader::from_str("retry: [not, a, map]").is_err());
    }

    #[test]
    fn test_url_override_replaces_configured_endpoint() {
        let mut config =
            serde_yaml::from_str::<DiagConfig>("endpoint:\n  url: http://from-file:1/mcp\n").unwrap();

        ConfigLoader::apply_url_override(&mut config, Some("  ".to_string()));
        assert_eq!(config.endpoint.url, "http://from-file:1/mcp");

        ConfigLoader::apply_url_override(&mut config, None);
        assert_eq!(config.endpoint.url, "http://from-file:1/mcp");

        ConfigLoader::apply_url_override(&mut config, Some(" http://10.0.0.5:8080/mcp ".to_string()));
        assert_eq!(config.endpoint.url, "http://10.0.0.5:8080/mcp");
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "console:\n  count: 42").unwrap();
        let config = ConfigLoader::from_file(file.path()).await.unwrap();
        assert_eq!(config.console.count, 42);
    }

    #[tokio::test]
    async fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigLoader::load_or_default(dir.path().join("absent.yaml"))
            .await
            .unwrap();
        assert_eq!(config.console.count, 500);
    }
}
