use crate::cache::ProbeCacheConfig;
use crate::cli::{Cli, OutputFormat};
use crate::harvest::HarvestConfig;
use crate::http_client::HttpClientConfig;
use crate::namespaces::Namespaces;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const ENV_PREFIX: &str = "VALIDATE_METADATA_";

/// libxml2 reads at most `c_int::MAX` bytes from memory.
const MAX_DOCUMENT_MB: u64 = 2047;

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub harvest: HarvestSettings,
    pub store: StoreConfig,
    pub rules: RulesConfig,
    pub probe: ProbeConfig,
    pub output: OutputConfig,
    /// Extra XPath prefixes, layered over the built-in ones
    pub namespaces: BTreeMap<String, String>,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// HTTP request timeout in seconds
    pub timeout_seconds: u64,
    /// Largest document accepted, in megabytes
    pub max_document_mb: u64,
}

/// Harvest configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct HarvestSettings {
    /// Candidates validated at once (default: CPU count)
    pub concurrency: Option<usize>,
}

/// Report store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file holding jobs and report history
    pub path: PathBuf,
}

/// Rule catalog configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RulesConfig {
    pub catalog: Option<PathBuf>,
}

/// URL probe cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    pub max_entries: u64,
    pub ttl_seconds: u64,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format
    pub format: OutputFormatConfig,
    /// Verbose output
    pub verbose: bool,
    /// Quiet mode (failures only)
    pub quiet: bool,
}

/// Output format configuration (serializable version of CLI OutputFormat)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormatConfig {
    #[default]
    Human,
    Json,
    Summary,
}

impl From<OutputFormat> for OutputFormatConfig {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Human => OutputFormatConfig::Human,
            OutputFormat::Json => OutputFormatConfig::Json,
            OutputFormat::Summary => OutputFormatConfig::Summary,
        }
    }
}

impl From<OutputFormatConfig> for OutputFormat {
    fn from(format: OutputFormatConfig) -> Self {
        match format {
            OutputFormatConfig::Human => OutputFormat::Human,
            OutputFormatConfig::Json => OutputFormat::Json,
            OutputFormatConfig::Summary => OutputFormat::Summary,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            max_document_mb: 64,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("validate-metadata")
                .join("history.json"),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl_seconds: 3600,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormatConfig::Human,
            verbose: false,
            quiet: false,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Environment(format!("Invalid {} value: {}", key, value)))
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> Result<Config> {
        let mut config = Config::default();

        if let Some(config_path) = &cli.config {
            let file_config = Self::load_from_file(config_path).await?;
            config = Self::merge_configs(config, file_config);
        } else if let Some(found_config) = Self::find_config_file().await? {
            config = Self::merge_configs(config, found_config);
        }

        config = Self::apply_environment_overrides(config)?;
        config = Self::merge_with_cli(config, cli);
        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                if let Ok(config) = toml::from_str::<Config>(&content) {
                    Ok(config)
                } else {
                    Ok(serde_json::from_str(&content)?)
                }
            }
        }
    }

    /// Find configuration file in standard locations
    pub async fn find_config_file() -> Result<Option<Config>> {
        let config_names = [
            "validate-metadata.toml",
            "validate-metadata.json",
            ".validate-metadata.toml",
            ".validate-metadata.json",
        ];

        for name in &config_names {
            let path = PathBuf::from(name);
            if path.exists() {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("validate-metadata");
            for name in &config_names {
                let path = app_config_dir.join(name);
                if path.exists() {
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(config: Config) -> Result<Config> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, config)
    }

    /// Apply `VALIDATE_METADATA_*` overrides from `env`
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        let var = |name: &str| {
            let key = format!("{}{}", ENV_PREFIX, name);
            env.get(&key).map(|value| (key, value))
        };

        if let Some((key, value)) = var("TIMEOUT") {
            config.network.timeout_seconds = parse_env(&key, &value)?;
        }
        if let Some((key, value)) = var("MAX_DOCUMENT_MB") {
            config.network.max_document_mb = parse_env(&key, &value)?;
        }
        if let Some((key, value)) = var("CONCURRENCY") {
            config.harvest.concurrency = Some(parse_env(&key, &value)?);
        }
        if let Some((_, value)) = var("STORE") {
            config.store.path = PathBuf::from(value);
        }
        if let Some((_, value)) = var("CATALOG") {
            config.rules.catalog = Some(PathBuf::from(value));
        }
        if let Some((key, value)) = var("PROBE_TTL") {
            config.probe.ttl_seconds = parse_env(&key, &value)?;
        }
        if let Some((key, value)) = var("PROBE_CAPACITY") {
            config.probe.max_entries = parse_env(&key, &value)?;
        }
        if let Some((key, value)) = var("VERBOSE") {
            config.output.verbose = parse_env(&key, &value)?;
        }
        if let Some((key, value)) = var("QUIET") {
            config.output.quiet = parse_env(&key, &value)?;
        }
        if let Some((key, value)) = var("FORMAT") {
            config.output.format = match value.to_lowercase().as_str() {
                "human" => OutputFormatConfig::Human,
                "json" => OutputFormatConfig::Json,
                "summary" => OutputFormatConfig::Summary,
                _ => {
                    return Err(ConfigError::Environment(format!(
                        "Invalid {} value: {}",
                        key, value
                    )));
                }
            };
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence)
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        if cli.threads.is_some() {
            config.harvest.concurrency = cli.threads;
        }
        if let Some(timeout) = cli.timeout {
            config.network.timeout_seconds = timeout;
        }
        if let Some(store) = &cli.store {
            config.store.path = store.clone();
        }
        if let Some(catalog) = &cli.catalog {
            config.rules.catalog = Some(catalog.clone());
        }
        if let Some(format) = cli.output_format {
            config.output.format = format.into();
        }
        if cli.verbose {
            config.output.verbose = true;
            config.output.quiet = false;
        }
        if cli.quiet {
            config.output.quiet = true;
            config.output.verbose = false;
        }

        config
    }

    /// Merge two configurations (second takes precedence for set values)
    pub fn merge_configs(mut base: Config, override_config: Config) -> Config {
        base.network = override_config.network;

        if override_config.harvest.concurrency.is_some() {
            base.harvest.concurrency = override_config.harvest.concurrency;
        }

        base.store = override_config.store;

        if override_config.rules.catalog.is_some() {
            base.rules.catalog = override_config.rules.catalog;
        }

        base.probe = override_config.probe;
        base.output = override_config.output;
        base.namespaces.extend(override_config.namespaces);

        base
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if let Some(concurrency) = config.harvest.concurrency {
            if concurrency == 0 {
                return Err(ConfigError::Validation(
                    "Harvest concurrency must be greater than 0".to_string(),
                ));
            }
            if concurrency > 1000 {
                return Err(ConfigError::Validation(
                    "Harvest concurrency cannot exceed 1000".to_string(),
                ));
            }
        }

        if config.network.timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        if config.network.max_document_mb == 0 {
            return Err(ConfigError::Validation(
                "Maximum document size must be greater than 0".to_string(),
            ));
        }
        if config.network.max_document_mb > MAX_DOCUMENT_MB {
            return Err(ConfigError::Validation(format!(
                "Maximum document size cannot exceed {} MB",
                MAX_DOCUMENT_MB
            )));
        }

        if config.probe.ttl_seconds == 0 {
            return Err(ConfigError::Validation(
                "Probe cache TTL must be greater than 0".to_string(),
            ));
        }

        if config.output.verbose && config.output.quiet {
            return Err(ConfigError::Validation(
                "Cannot enable both verbose and quiet modes".to_string(),
            ));
        }

        for (prefix, uri) in &config.namespaces {
            if prefix.is_empty() || prefix.contains(':') || prefix.contains(char::is_whitespace)
            {
                return Err(ConfigError::Validation(format!(
                    "Invalid namespace prefix: '{}'",
                    prefix
                )));
            }
            if uri.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Namespace prefix '{}' has an empty URI",
                    prefix
                )));
            }
        }

        Ok(())
    }

    pub fn get_concurrency(config: &Config) -> usize {
        config.harvest.concurrency.unwrap_or_else(num_cpus::get)
    }

    pub fn http_client_config(config: &Config) -> HttpClientConfig {
        HttpClientConfig {
            timeout_seconds: config.network.timeout_seconds,
            max_body_bytes: config.network.max_document_mb.saturating_mul(1024 * 1024),
            ..Default::default()
        }
    }

    pub fn harvest_config(config: &Config) -> HarvestConfig {
        HarvestConfig {
            concurrency: Self::get_concurrency(config),
        }
    }

    pub fn probe_cache_config(config: &Config) -> ProbeCacheConfig {
        ProbeCacheConfig {
            max_entries: config.probe.max_entries,
            ttl: Duration::from_secs(config.probe.ttl_seconds),
        }
    }

    /// Built-in prefixes with the configured ones layered on top
    pub fn namespaces(config: &Config) -> Namespaces {
        Namespaces::default().extended_with(&config.namespaces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    /// Mock environment variable provider for testing
    #[derive(Default)]
    struct MockEnvProvider {
        vars: HashMap<String, String>,
    }

    impl MockEnvProvider {
        fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
            self.vars.insert(key.into(), value.into());
        }
    }

    impl EnvProvider for MockEnvProvider {
        fn get(&self, key: &str) -> Option<String> {
            self.vars.get(key).cloned()
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.network.timeout_seconds, 30);
        assert_eq!(config.harvest.concurrency, None);
        assert!(
            config
                .store
                .path
                .to_string_lossy()
                .contains("validate-metadata")
        );
        assert_eq!(config.rules.catalog, None);
        assert_eq!(config.probe.ttl_seconds, 3600);
        assert_eq!(config.output.format, OutputFormatConfig::Human);
        assert!(config.namespaces.is_empty());
        assert!(ConfigManager::validate_config(&config).is_ok());
    }

    #[tokio::test]
    async fn test_load_toml_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let toml_content = r#"
[network]
timeout_seconds = 10

[harvest]
concurrency = 8

[store]
path = "/var/lib/validate-metadata/history.json"

[rules]
catalog = "rules.toml"

[output]
format = "json"

[namespaces]
usgin = "http://resources.usgin.org/uri-gin/usgin/schema"
"#;
        fs::write(&config_path, toml_content).unwrap();

        let config = ConfigManager::load_from_file(&config_path).await.unwrap();

        assert_eq!(config.network.timeout_seconds, 10);
        assert_eq!(config.network.max_document_mb, 64);
        assert_eq!(config.harvest.concurrency, Some(8));
        assert_eq!(
            config.store.path,
            PathBuf::from("/var/lib/validate-metadata/history.json")
        );
        assert_eq!(config.rules.catalog, Some(PathBuf::from("rules.toml")));
        assert_eq!(config.output.format, OutputFormatConfig::Json);
        assert_eq!(
            ConfigManager::namespaces(&config).get("usgin"),
            Some("http://resources.usgin.org/uri-gin/usgin/schema")
        );
    }

    #[tokio::test]
    async fn test_load_json_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        fs::write(
            &config_path,
            r#"{ "probe": { "max_entries": 5, "ttl_seconds": 60 }, "output": { "quiet": true } }"#,
        )
        .unwrap();

        let config = ConfigManager::load_from_file(&config_path).await.unwrap();
        assert_eq!(config.probe.max_entries, 5);
        assert!(config.output.quiet);
        assert_eq!(config.network.timeout_seconds, 30);
    }

    #[tokio::test]
    async fn test_unsupported_extension() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "network: {}").unwrap();

        assert!(matches!(
            ConfigManager::load_from_file(&config_path).await,
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_environment_overrides() {
        let mut env = MockEnvProvider::default();
        env.set("VALIDATE_METADATA_TIMEOUT", "5");
        env.set("VALIDATE_METADATA_CONCURRENCY", "3");
        env.set("VALIDATE_METADATA_CATALOG", "/etc/rules.json");
        env.set("VALIDATE_METADATA_FORMAT", "Summary");

        let config =
            ConfigManager::apply_environment_overrides_with(&env, Config::default()).unwrap();
        assert_eq!(config.network.timeout_seconds, 5);
        assert_eq!(config.harvest.concurrency, Some(3));
        assert_eq!(config.rules.catalog, Some(PathBuf::from("/etc/rules.json")));
        assert_eq!(config.output.format, OutputFormatConfig::Summary);
    }

    #[test]
    fn test_invalid_environment_value() {
        let mut env = MockEnvProvider::default();
        env.set("VALIDATE_METADATA_TIMEOUT", "soon");

        let err =
            ConfigManager::apply_environment_overrides_with(&env, Config::default()).unwrap_err();
        assert!(err.to_string().contains("VALIDATE_METADATA_TIMEOUT"));
    }

    #[test]
    fn test_cli_takes_precedence() {
        let cli = Cli::try_parse_from([
            "validate-metadata",
            "--threads",
            "2",
            "--timeout",
            "7",
            "--catalog",
            "cli-rules.toml",
            "-f",
            "summary",
            "check-rules",
        ])
        .unwrap();

        let mut base = Config::default();
        base.harvest.concurrency = Some(16);
        base.rules.catalog = Some(PathBuf::from("file-rules.toml"));

        let config = ConfigManager::merge_with_cli(base, &cli);
        assert_eq!(config.harvest.concurrency, Some(2));
        assert_eq!(config.network.timeout_seconds, 7);
        assert_eq!(config.rules.catalog, Some(PathBuf::from("cli-rules.toml")));
        assert_eq!(config.output.format, OutputFormatConfig::Summary);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.harvest.concurrency = Some(0);
        assert!(ConfigManager::validate_config(&config).is_err());

        let mut config = Config::default();
        config.network.timeout_seconds = 0;
        assert!(ConfigManager::validate_config(&config).is_err());

        let mut config = Config::default();
        config
            .namespaces
            .insert("bad:prefix".to_string(), "urn:x".to_string());
        assert!(ConfigManager::validate_config(&config).is_err());
    }

    #[test]
    fn test_document_size_is_bounded() {
        let mut config = Config::default();
        config.network.max_document_mb = MAX_DOCUMENT_MB;
        assert!(ConfigManager::validate_config(&config).is_ok());

        config.network.max_document_mb = 1 << 50;
        let err = ConfigManager::validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("cannot exceed 2047 MB"));
        assert_eq!(
            ConfigManager::http_client_config(&config).max_body_bytes,
            u64::MAX
        );
    }

    #[test]
    fn test_derived_settings() {
        let mut config = Config::default();
        config.network.max_document_mb = 2;
        config.harvest.concurrency = Some(5);

        assert_eq!(
            ConfigManager::http_client_config(&config).max_body_bytes,
            2 * 1024 * 1024
        );
        assert_eq!(ConfigManager::harvest_config(&config).concurrency, 5);
        assert_eq!(
            ConfigManager::probe_cache_config(&config).ttl,
            Duration::from_secs(3600)
        );
    }
}
