//! Configuration loader with layered approach.
//!
//! Layers, later ones overriding earlier ones:
//! 1. Default values
//! 2. Configuration file (TOML, JSON or YAML)
//! 3. Environment variables

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use crate::{ConfigError, TwinportConfig};

/// Conventional location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "configs/config.yml";

/// Configuration loader with layered approach.
///
/// # Example
///
/// ```no_run
/// use twinport_config::ConfigLoader;
///
/// # fn main() -> Result<(), twinport_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_defaults()
///     .with_file("configs/config.yml")?
///     .with_env_prefix("TWINPORT")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: TwinportConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: TwinportConfig::default(),
            env_prefix: None,
        }
    }

    /// Reset to default configuration values.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = TwinportConfig::default();
        self
    }

    /// Start from the development preset.
    ///
    /// ```
    /// use twinport_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new().with_development().load().unwrap();
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = TwinportConfig::development();
        self
    }

    /// Load configuration from a file.
    ///
    /// The format is chosen by extension: `.toml`, `.json`, `.yml` or `.yaml`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing, unreadable, malformed,
    /// contains unknown fields, or has an unsupported extension.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::missing(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read(path, e))?;

        self.config = Self::parse_file(&content, path)?;
        Ok(self)
    }

    /// Load configuration from a file if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string in the given format.
    ///
    /// ```
    /// use twinport_config::ConfigLoader;
    ///
    /// let yaml = "server:\n  grpc_port: 50051\n";
    /// let config = ConfigLoader::new()
    ///     .with_string(yaml, "yaml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.server.grpc_port, 50051);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails.
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = Self::parse_as(content, &format.to_lowercase())
            .ok_or_else(|| ConfigError::UnsupportedFormat(format.to_string()))??;
        Ok(self)
    }

    /// Set environment variable prefix for overrides.
    ///
    /// Variables use the format `PREFIX__SECTION__KEY`, for example
    /// `TWINPORT__SERVER__GRPC_PORT=50051`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load a `.env` file into the process environment, if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::DotEnv` if a `.env` file exists but is malformed.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply environment overrides, validate, and return the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an override cannot be parsed or validation
    /// fails.
    pub fn load(mut self) -> Result<TwinportConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            let vars: BTreeMap<String, String> = env::vars()
                .filter(|(k, _)| k.starts_with(&prefix))
                .collect();
            self.apply_env_overrides(&prefix, &vars)?;
        }

        self.config.validate()?;

        Ok(self.config)
    }

    /// Finalize without environment overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> TwinportConfig {
        self.config
    }

    fn parse_file(content: &str, path: &Path) -> Result<TwinportConfig, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        Self::parse_as(content, &extension)
            .unwrap_or_else(|| Err(ConfigError::UnsupportedFormat(path.display().to_string())))
    }

    fn parse_as(content: &str, format: &str) -> Option<Result<TwinportConfig, ConfigError>> {
        let parsed = match format {
            "toml" => toml::from_str(content).map_err(|e| ConfigError::parse("toml", e)),
            "json" => serde_json::from_str(content).map_err(|e| ConfigError::parse("json", e)),
            "yml" | "yaml" => serde_yaml::from_str(content).map_err(|e| ConfigError::parse("yaml", e)),
            _ => return None,
        };
        Some(parsed)
    }

    fn apply_env_overrides(
        &mut self,
        prefix: &str,
        vars: &BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        for (key, value) in vars {
            self.apply_env_var(key, value, prefix)?;
        }
        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let key_without_prefix = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
            .ok_or_else(|| ConfigError::env(key, "invalid key format"))?;

        let parts: Vec<&str> = key_without_prefix.split("__").collect();

        let server = &mut self.config.server;
        let telemetry = &mut self.config.telemetry;

        match parts.as_slice() {
            ["SERVER", "HOST"] => server.host = value.to_string(),
            ["SERVER", "GRPC_PORT"] => server.grpc_port = parse_num(key, value)?,
            ["SERVER", "HTTP_PORT"] => server.http_port = parse_num(key, value)?,
            ["SERVER", "MAX_SEND_MESSAGE_LENGTH"] => {
                server.max_send_message_length = parse_num(key, value)?;
            }
            ["SERVER", "MAX_RECEIVE_MESSAGE_LENGTH"] => {
                server.max_receive_message_length = parse_num(key, value)?;
            }
            ["SERVER", "SHUTDOWN_TIMEOUT"] => server.shutdown_timeout = parse_num(key, value)?,

            ["TELEMETRY", "LOGGING", "ENABLED"] => {
                telemetry.logging.enabled = parse_bool(value)
                    .ok_or_else(|| ConfigError::env(key, "expected boolean"))?;
            }
            ["TELEMETRY", "LOGGING", "LEVEL"] => telemetry.logging.level = value.to_string(),
            ["TELEMETRY", "LOGGING", "FORMAT"] => {
                telemetry.logging.format = match value.to_lowercase().as_str() {
                    "json" => twinport_telemetry::LogFormat::Json,
                    "pretty" => twinport_telemetry::LogFormat::Pretty,
                    _ => {
                        return Err(ConfigError::env(
                            key,
                            "expected 'json' or 'pretty'",
                        ))
                    }
                };
            }
            ["TELEMETRY", "LOGGING", "ANSI_ENABLED"] => {
                telemetry.logging.ansi_enabled = parse_bool(value)
                    .ok_or_else(|| ConfigError::env(key, "expected boolean"))?;
            }
            ["TELEMETRY", "METRICS", "ENABLED"] => {
                telemetry.metrics.enabled = parse_bool(value)
                    .ok_or_else(|| ConfigError::env(key, "expected boolean"))?;
            }

            _ => {}
        }

        Ok(())
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env(key, "expected non-negative integer in range"))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(suffix)
            .tempfile()
            .expect("temp file");
        file.write_all(content.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn test_loader_defaults() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config.server.grpc_port, 9090);
        assert_eq!(config.server.http_port, 8080);
        assert_eq!(config.server.shutdown_timeout, 30);
    }

    #[test]
    fn test_loader_yaml_file() {
        let file = write_config(
            ".yml",
            "server:\n  host: 127.0.0.1\n  grpc_port: 50051\n  http_port: 8081\n  shutdown_timeout: 5\n",
        );
        let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.grpc_port, 50051);
        assert_eq!(config.server.http_port, 8081);
        assert_eq!(config.server.shutdown_timeout, 5);
        assert_eq!(config.server.max_send_message_length, 4 * 1024 * 1024);
    }

    #[test]
    fn test_loader_toml_file() {
        let file = write_config(
            ".toml",
            r#"
                [server]
                max_receive_message_length = 1048576

                [telemetry.logging]
                level = "warn"
                format = "pretty"
            "#,
        );
        let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();
        assert_eq!(config.server.max_receive_message_length, 1_048_576);
        assert_eq!(config.telemetry.logging.level, "warn");
    }

    #[test]
    fn test_loader_json_string() {
        let json = r#"{"server": {"http_port": 3000}}"#;
        let config = ConfigLoader::new()
            .with_string(json, "json")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.server.http_port, 3000);
    }

    #[test]
    fn test_loader_unknown_field_in_yaml() {
        let file = write_config(".yaml", "server:\n  grpc_prot: 1\n");
        let err = ConfigLoader::new().with_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { format: "yaml", .. }));
    }

    #[test]
    fn test_loader_unsupported_extension() {
        let file = write_config(".ini", "grpc_port=1");
        let err = ConfigLoader::new().with_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));

        let err = ConfigLoader::new().with_string("x", "xml").unwrap_err();
        assert!(err.to_string().contains("xml"));
    }

    #[test]
    fn test_loader_with_file_not_found() {
        let err = ConfigLoader::new()
            .with_file("/nonexistent/config.yml")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing { .. }));
    }

    #[test]
    fn test_loader_with_optional_file_not_found() {
        let config = ConfigLoader::new()
            .with_optional_file("/nonexistent/config.yml")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.server.grpc_port, 9090);
    }

    #[test]
    fn test_loader_validation_failure() {
        let yaml = "server:\n  grpc_port: 7000\n  http_port: 7000\n";
        let result = ConfigLoader::new().with_string(yaml, "yaml").unwrap().load();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_apply_env_var_server() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("TEST__SERVER__HOST", "127.0.0.1", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__SERVER__GRPC_PORT", "50051", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__SERVER__SHUTDOWN_TIMEOUT", "2", "TEST")
            .unwrap();
        assert_eq!(loader.config.server.host, "127.0.0.1");
        assert_eq!(loader.config.server.grpc_port, 50051);
        assert_eq!(loader.config.server.shutdown_timeout, 2);
    }

    #[test]
    fn test_apply_env_var_out_of_range_port() {
        let mut loader = ConfigLoader::new();
        let result = loader.apply_env_var("TEST__SERVER__HTTP_PORT", "70000", "TEST");
        assert!(matches!(result, Err(ConfigError::Env { .. })));
    }

    #[test]
    fn test_apply_env_overrides_batch() {
        let mut loader = ConfigLoader::new();
        let vars = BTreeMap::from([
            ("TEST__TELEMETRY__LOGGING__FORMAT".to_string(), "pretty".to_string()),
            ("TEST__TELEMETRY__METRICS__ENABLED".to_string(), "off".to_string()),
            ("TEST__UNKNOWN__KEY".to_string(), "ignored".to_string()),
        ]);
        loader.apply_env_overrides("TEST", &vars).unwrap();
        assert_eq!(
            loader.config.telemetry.logging.format,
            twinport_telemetry::LogFormat::Pretty
        );
        assert!(!loader.config.telemetry.metrics.enabled);
    }

    #[test]
    fn test_apply_env_var_bad_format() {
        let mut loader = ConfigLoader::new();
        let result = loader.apply_env_var("TEST__TELEMETRY__LOGGING__FORMAT", "xml", "TEST");
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("True"), Some(true));
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
