use log::{debug, error, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, WriterError};

/// Configuration keys advertised to the host
pub const CONFIG_KEYS: [&str; 4] = ["ServerURL", "ContextName", "NodeName", "StartupDelay"];

/// Destination used when no `ServerURL` is configured: the local output stream
pub const DEFAULT_SERVER_URL: &str = "file:-";

/// Context (experiment) name used when none is configured
pub const DEFAULT_CONTEXT_NAME: &str = "collectd";

/// Warm-up window in seconds
pub const DEFAULT_STARTUP_DELAY: u64 = 10;

/// Writer configuration, filled in one key/value pair at a time
#[derive(Debug, Clone, PartialEq)]
pub struct WriterConfig {
    /// Sink endpoint; `None` means write to the local stream
    pub server_url: Option<String>,
    /// Logical experiment/session name
    pub context_name: String,
    /// Logical node identity
    pub node_name: String,
    /// Seconds to wait after start before committing the discovered schemas
    pub startup_delay: u64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            context_name: DEFAULT_CONTEXT_NAME.to_string(),
            node_name: default_node_name(),
            startup_delay: DEFAULT_STARTUP_DELAY,
        }
    }
}

fn default_node_name() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            warn!("Unable to determine hostname, using 'localhost': {}", e);
            "localhost".to_string()
        }
    }
}

impl WriterConfig {
    /// Apply one configuration entry.
    ///
    /// Keys are matched case-insensitively. An unknown key or an unparsable
    /// value is rejected and leaves everything applied so far untouched.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        if key.eq_ignore_ascii_case("ServerURL") {
            self.server_url = Some(value.to_string());
        } else if key.eq_ignore_ascii_case("ContextName") {
            self.context_name = value.to_string();
        } else if key.eq_ignore_ascii_case("NodeName") {
            self.node_name = value.to_string();
        } else if key.eq_ignore_ascii_case("StartupDelay") {
            self.startup_delay = value.trim().parse::<u64>().map_err(|_| {
                WriterError::Config(format!(
                    "StartupDelay must be a non-negative integer, got '{}'",
                    value
                ))
            })?;
        } else {
            error!("Unknown configuration key '{}'", key);
            return Err(WriterError::Config(format!("Unknown configuration key: {}", key)));
        }

        debug!("Configured {} = {}", key, value);
        Ok(())
    }

    /// The endpoint handed to the sink
    pub fn server_url(&self) -> &str {
        self.server_url.as_deref().unwrap_or(DEFAULT_SERVER_URL)
    }
}

/// Source of configuration entries
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// File path; the format follows the extension
    File(PathBuf),
    /// Environment variables with a prefix
    Environment(String),
    /// TOML string
    Toml(String),
}

/// Build a configuration from several sources. Later sources override earlier ones.
pub fn load_config(sources: Vec<ConfigSource>) -> Result<WriterConfig> {
    let mut builder = config::Config::builder();

    for source in sources {
        match source {
            ConfigSource::File(path) => {
                let format = file_format(&path)?;
                debug!("Loading configuration from {}", path.display());
                builder = builder.add_source(config::File::from(path.as_path()).format(format));
            }
            ConfigSource::Environment(prefix) => {
                debug!("Loading configuration from environment with prefix: {}", prefix);
                builder = builder.add_source(config::Environment::with_prefix(&prefix));
            }
            ConfigSource::Toml(toml_str) => {
                debug!("Loading configuration from TOML string");
                builder = builder.add_source(config::File::from_str(&toml_str, config::FileFormat::Toml));
            }
        }
    }

    let entries: HashMap<String, config::Value> = builder.build()?.try_deserialize()?;

    let mut writer_config = WriterConfig::default();
    for (key, value) in entries {
        let value = value.into_string().map_err(|e| {
            WriterError::Config(format!("Configuration key {} must be a scalar: {}", key, e))
        })?;
        writer_config.apply(&key, &value)?;
    }

    Ok(writer_config)
}

/// Load the writer configuration from a single file
pub fn load_config_file<P: AsRef<Path>>(path: P) -> Result<WriterConfig> {
    let path = path.as_ref();

    if !path.exists() {
        error!("Configuration file {} does not exist", path.display());
        return Err(WriterError::Config(format!("Configuration file not found: {}", path.display())));
    }

    load_config(vec![ConfigSource::File(path.to_path_buf())])
}

fn file_format(path: &Path) -> Result<config::FileFormat> {
    let extension = match path.extension() {
        Some(ext) => ext.to_string_lossy().to_lowercase(),
        None => {
            return Err(WriterError::Config(format!(
                "Configuration file has no extension: {}",
                path.display()
            )));
        }
    };

    match extension.as_str() {
        "toml" => Ok(config::FileFormat::Toml),
        "json" => Ok(config::FileFormat::Json),
        "yaml" | "yml" => Ok(config::FileFormat::Yaml),
        format => Err(WriterError::Config(format!("Unsupported config format: {}", format))),
    }
}

/// Logging level
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level
    #[default]
    Info,
    /// Debug level
    Debug,
    /// Trace level
    Trace,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_defaults() {
        let config = WriterConfig::default();
        assert_eq!(config.server_url, None);
        assert_eq!(config.server_url(), "file:-");
        assert_eq!(config.context_name, "collectd");
        assert_eq!(config.startup_delay, 10);
        assert!(!config.node_name.is_empty());
    }

    #[test]
    fn test_apply_is_case_insensitive() {
        let mut config = WriterConfig::default();
        config.apply("serverurl", "tcp:localhost:3003").unwrap();
        config.apply("CONTEXTNAME", "exp1").unwrap();
        config.apply("NodeName", "node-a").unwrap();
        config.apply("startupdelay", "0").unwrap();

        assert_eq!(config.server_url(), "tcp:localhost:3003");
        assert_eq!(config.context_name, "exp1");
        assert_eq!(config.node_name, "node-a");
        assert_eq!(config.startup_delay, 0);
    }

    #[test]
    fn test_unknown_key_keeps_earlier_values() {
        let mut config = WriterConfig::default();
        config.apply("ContextName", "kept").unwrap();

        let err = config.apply("Bogus", "x").unwrap_err();
        assert!(matches!(err, WriterError::Config(_)));
        assert_eq!(config.context_name, "kept");
    }

    #[test]
    fn test_negative_startup_delay_rejected() {
        let mut config = WriterConfig::default();
        assert!(matches!(config.apply("StartupDelay", "-1"), Err(WriterError::Config(_))));
        assert!(matches!(config.apply("StartupDelay", "soon"), Err(WriterError::Config(_))));
        assert_eq!(config.startup_delay, 10);
    }

    #[test]
    fn test_load_from_toml_string() {
        let config = load_config(vec![ConfigSource::Toml(
            r#"
            ServerURL = "file:/tmp/out.oml"
            StartupDelay = 3
            "#
            .to_string(),
        )])
        .unwrap();

        assert_eq!(config.server_url(), "file:/tmp/out.oml");
        assert_eq!(config.startup_delay, 3);
        assert_eq!(config.context_name, "collectd");
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
            ContextName = "from-file"
            NodeName = "n1"
            "#
        )
        .unwrap();

        let config = load_config_file(file.path()).unwrap();
        assert_eq!(config.context_name, "from-file");
        assert_eq!(config.node_name, "n1");
    }

    #[test]
    fn test_load_from_json_file_with_numeric_delay() {
        let mut file = Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"ServerURL": "tcp:oml.example:3003", "StartupDelay": 0}}"#).unwrap();

        let config = load_config_file(file.path()).unwrap();
        assert_eq!(config.server_url(), "tcp:oml.example:3003");
        assert_eq!(config.startup_delay, 0);
    }

    #[test]
    fn test_unknown_key_in_file_is_rejected() {
        let result = load_config(vec![ConfigSource::Toml("Verbose = true".to_string())]);
        assert!(matches!(result, Err(WriterError::Config(_))));
    }

    #[test]
    fn test_nested_table_is_rejected() {
        let result = load_config(vec![ConfigSource::Toml("[ServerURL]\nhost = \"x\"".to_string())]);
        assert!(matches!(result, Err(WriterError::Config(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = load_config_file("/nonexistent/write_oml.toml");
        assert!(matches!(result, Err(WriterError::Config(_))));
    }
}
