//! Configuration file loading and parsing.

use crate::types::BogoslavConfig;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

/// Directory holding project-local configuration.
pub const CONFIG_DIR: &str = ".bogoslav";

/// Configuration file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "config.yaml";

/// Config loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("failed to read config: {source}")]
    ReadError {
        #[from]
        source: std::io::Error,
    },

    #[error("invalid YAML at line {}: {message}", line.map(|l| l.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    ParseError { line: Option<usize>, message: String },

    #[error("validation error: {message}")]
    ValidationError { message: String },

    #[error("environment variable not found: {var}")]
    EnvVarNotFound { var: String },
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("env var pattern is valid")
    })
}

/// Configuration loader.
pub struct ConfigLoader {
    base_path: PathBuf,
}

impl ConfigLoader {
    /// Create a loader for the given project directory.
    pub fn new(project_dir: impl AsRef<Path>) -> Self {
        Self {
            base_path: project_dir.as_ref().to_path_buf(),
        }
    }

    /// Path of the project configuration file.
    pub fn config_path(&self) -> PathBuf {
        self.base_path.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Load configuration from `.bogoslav/config.yaml`.
    ///
    /// Returns defaults when the file does not exist.
    pub fn load(&self) -> Result<BogoslavConfig, ConfigError> {
        let config_path = self.config_path();

        if !config_path.exists() {
            return Ok(BogoslavConfig::default());
        }

        self.load_from(&config_path)
    }

    /// Load configuration from an explicit file. The file must exist.
    pub fn load_from(&self, path: impl AsRef<Path>) -> Result<BogoslavConfig, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let contents = std::fs::read_to_string(path)?;
        let expanded = self.expand_env_vars(&contents)?;

        let config: BogoslavConfig =
            serde_yaml::from_str(&expanded).map_err(|e| ConfigError::ParseError {
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            })?;

        self.validate(&config)?;
        Ok(config)
    }

    /// Expand environment variables in the form `${VAR}` or `${VAR:-default}`.
    fn expand_env_vars(&self, content: &str) -> Result<String, ConfigError> {
        let mut result = content.to_string();

        for cap in env_var_pattern().captures_iter(content) {
            let full_match = &cap[0];
            let var_name = &cap[1];
            let default = cap.get(2).map(|m| m.as_str());

            let value = match std::env::var(var_name) {
                Ok(v) => v,
                Err(_) => match default {
                    Some(d) => d.to_string(),
                    None => {
                        return Err(ConfigError::EnvVarNotFound {
                            var: var_name.to_string(),
                        })
                    }
                },
            };

            result = result.replace(full_match, &value);
        }

        Ok(result)
    }

    /// Validate configuration values.
    pub fn validate(&self, config: &BogoslavConfig) -> Result<(), ConfigError> {
        if config.watch.debounce_ms == 0 {
            return Err(ConfigError::ValidationError {
                message: "watch.debounce_ms must be greater than 0".to_string(),
            });
        }

        for pattern in &config.watch.ignore_patterns {
            if let Err(e) = glob::Pattern::new(pattern) {
                return Err(ConfigError::ValidationError {
                    message: format!("watch.ignore_patterns: invalid glob '{}': {}", pattern, e),
                });
            }
        }

        if config.model.max_tokens == 0 {
            return Err(ConfigError::ValidationError {
                message: "model.max_tokens must be greater than 0".to_string(),
            });
        }

        if let Some(t) = config.model.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::ValidationError {
                    message: "model.temperature must be between 0.0 and 2.0".to_string(),
                });
            }
        }

        if config.retry.max_retries > 10 {
            return Err(ConfigError::ValidationError {
                message: "retry.max_retries must be at most 10".to_string(),
            });
        }

        if config.retry.base_delay_ms > config.retry.max_delay_ms {
            return Err(ConfigError::ValidationError {
                message: "retry.base_delay_ms must not exceed retry.max_delay_ms".to_string(),
            });
        }

        Ok(())
    }

    /// Save configuration to `.bogoslav/config.yaml`.
    pub fn save(&self, config: &BogoslavConfig) -> Result<(), ConfigError> {
        let config_dir = self.base_path.join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir)?;

        let yaml = serde_yaml::to_string(config).map_err(|e| ConfigError::ParseError {
            line: None,
            message: e.to_string(),
        })?;

        std::fs::write(config_dir.join(CONFIG_FILE), yaml)?;
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new(std::env::current_dir().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderKind;
    use std::fs;
    use tempfile::tempdir;

    fn write_config(dir: &Path, content: &str) {
        let config_dir = dir.join(CONFIG_DIR);
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join(CONFIG_FILE), content).unwrap();
    }

    #[test]
    fn test_load_defaults_when_no_file() {
        let dir = tempdir().unwrap();
        let loader = ConfigLoader::new(dir.path());
        let config = loader.load().unwrap();
        assert_eq!(config.model.provider, ProviderKind::Gemini);
        assert_eq!(config.watch.debounce_ms, 300);
    }

    #[test]
    fn test_load_from_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let loader = ConfigLoader::new(dir.path());
        let result = loader.load_from(dir.path().join("nope.yaml"));
        assert!(matches!(result, Err(ConfigError::NotFound { .. })));
    }

    #[test]
    fn test_load_config_from_yaml_file() {
        let dir = tempdir().unwrap();
        write_config(
            dir.path(),
            r#"
watch:
  paths: [notes.md, journal]
  debounce_ms: 150
model:
  provider: anthropic
  max_tokens: 1024
retry:
  max_retries: 5
session:
  persist_dir: .bogoslav/sessions
"#,
        );

        let config = ConfigLoader::new(dir.path()).load().unwrap();

        assert_eq!(config.watch.paths.len(), 2);
        assert_eq!(config.watch.debounce_ms, 150);
        assert_eq!(config.model.provider, ProviderKind::Anthropic);
        assert_eq!(config.model.max_tokens, 1024);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(
            config.session.persist_dir,
            Some(PathBuf::from(".bogoslav/sessions"))
        );

        // Unspecified values use defaults
        assert_eq!(config.retry.base_delay_ms, 500);
        assert!(config.dispatch.dispatch_existing);
    }

    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("BOGOSLAV_TEST_VAR", "test_value");
        let loader = ConfigLoader::new(".");
        let result = loader.expand_env_vars("key: ${BOGOSLAV_TEST_VAR}").unwrap();
        assert_eq!(result, "key: test_value");
        std::env::remove_var("BOGOSLAV_TEST_VAR");
    }

    #[test]
    fn test_env_var_default() {
        let loader = ConfigLoader::new(".");
        let result = loader
            .expand_env_vars("key: ${BOGOSLAV_NONEXISTENT:-default}")
            .unwrap();
        assert_eq!(result, "key: default");
    }

    #[test]
    fn test_env_var_missing_error() {
        let loader = ConfigLoader::new(".");
        let result = loader.expand_env_vars("key: ${BOGOSLAV_MISSING_VAR}");
        match result.unwrap_err() {
            ConfigError::EnvVarNotFound { var } => assert_eq!(var, "BOGOSLAV_MISSING_VAR"),
            other => panic!("Expected EnvVarNotFound error, got {other:?}"),
        }
    }

    #[test]
    fn test_env_var_expansion_in_config() {
        std::env::set_var("BOGOSLAV_TEST_MODEL", "gemini-custom");

        let dir = tempdir().unwrap();
        write_config(
            dir.path(),
            r#"
model:
  model: ${BOGOSLAV_TEST_MODEL}
watch:
  debounce_ms: ${BOGOSLAV_TEST_DEBOUNCE:-75}
"#,
        );

        let config = ConfigLoader::new(dir.path()).load().unwrap();

        assert_eq!(config.model.model_name(), "gemini-custom");
        assert_eq!(config.watch.debounce_ms, 75);

        std::env::remove_var("BOGOSLAV_TEST_MODEL");
    }

    #[test]
    fn test_validation_errors() {
        let loader = ConfigLoader::new(".");

        let mut config = BogoslavConfig::default();
        config.watch.debounce_ms = 0;
        match loader.validate(&config).unwrap_err() {
            ConfigError::ValidationError { message } => assert!(message.contains("debounce_ms")),
            other => panic!("Expected ValidationError, got {other:?}"),
        }

        let mut config = BogoslavConfig::default();
        config.watch.ignore_patterns.push("[unclosed".to_string());
        match loader.validate(&config).unwrap_err() {
            ConfigError::ValidationError { message } => {
                assert!(message.contains("ignore_patterns"))
            }
            other => panic!("Expected ValidationError, got {other:?}"),
        }

        let mut config = BogoslavConfig::default();
        config.model.temperature = Some(3.5);
        assert!(loader.validate(&config).is_err());

        let mut config = BogoslavConfig::default();
        config.retry.base_delay_ms = 10_000;
        assert!(loader.validate(&config).is_err());

        assert!(loader.validate(&BogoslavConfig::default()).is_ok());
    }

    #[test]
    fn test_parse_error_with_line_number() {
        let dir = tempdir().unwrap();
        write_config(
            dir.path(),
            r#"
watch:
  debounce_ms: 300
  paths: [unclosed
"#,
        );

        match ConfigLoader::new(dir.path()).load().unwrap_err() {
            ConfigError::ParseError { line, .. } => assert!(line.is_some()),
            other => panic!("Expected ParseError with line number, got {other:?}"),
        }
    }

    #[test]
    fn test_save_config() {
        let dir = tempdir().unwrap();
        let loader = ConfigLoader::new(dir.path());

        let mut config = BogoslavConfig::default();
        config.model.model = "gemini-1.5-pro".to_string();
        config.watch.debounce_ms = 42;

        loader.save(&config).unwrap();
        assert!(loader.config_path().exists());

        let loaded = loader.load().unwrap();
        assert_eq!(loaded.model.model_name(), "gemini-1.5-pro");
        assert_eq!(loaded.watch.debounce_ms, 42);
    }
}
