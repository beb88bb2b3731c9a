//! Configuration management for do-agent.
//!
//! This module handles loading, merging, and validating configuration from files
//! and CLI arguments. It supports YAML, JSON, and TOML formats.

use crate::cli::{Args, ConfigFormat, LogLevel};
use crate::client::{DEFAULT_AUTH_ENDPOINT, DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_METRIC_LENGTH, DEFAULT_METADATA_ENDPOINT};
use crate::collectors::scraper::DEFAULT_SCRAPE_TIMEOUT;
use crate::decorate::PROCESS_TOPK_PATTERN;
use crate::model::Label;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

// Default configuration constants
pub const DEFAULT_WEB_LISTEN_ADDRESS: &str = "127.0.0.1:9100";
pub const DEFAULT_PROCFS: &str = "/proc";
pub const DEFAULT_PROCESS_TOPK: usize = 50;
pub const DEFAULT_LOG_LEVEL: &str = "info";

const DEFAULT_CONFIG_LOCATIONS: &[&str] = &[
    "/etc/do-agent/config.yaml",
    "/etc/do-agent/config.yml",
    "/etc/do-agent/config.json",
    "/etc/do-agent/config.toml",
];

const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

static LABEL_NAME: Lazy<Option<Regex>> = Lazy::new(|| Regex::new("^[a-zA-Z_][a-zA-Z0-9_]*$").ok());

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("failed to render config: {0}")]
    Render(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn kind(&self) -> &'static str {
        "fatal_config"
    }
}

/// Agent configuration. Every field is optional so a config file only has to
/// name what it changes; [`resolve_config`] fills the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    // Endpoints
    #[serde(alias = "auth-host")]
    pub auth_host: Option<String>,
    #[serde(alias = "metadata-host")]
    pub metadata_host: Option<String>,
    #[serde(alias = "sonar-host")]
    pub sonar_host: Option<String>,

    // Output
    #[serde(alias = "stdout-only")]
    pub stdout_only: Option<bool>,

    // Logging
    #[serde(alias = "log-level")]
    pub log_level: Option<String>,
    pub syslog: Option<bool>,

    // Scrape targets
    #[serde(alias = "k8s-metrics-path")]
    pub k8s_metrics_path: Option<String>,
    #[serde(alias = "dbaas-metrics-path")]
    pub dbaas_metrics_path: Option<String>,
    #[serde(alias = "metrics-path")]
    pub metrics_path: Option<String>,
    #[serde(alias = "scrape-bearer-token-file")]
    pub scrape_bearer_token_file: Option<PathBuf>,
    #[serde(alias = "scrape-timeout-seconds")]
    pub scrape_timeout_seconds: Option<u64>,

    // Collector enable flags
    #[serde(alias = "enable-node-collector")]
    pub enable_node_collector: Option<bool>,
    #[serde(alias = "enable-process-collector")]
    pub enable_process_collector: Option<bool>,
    #[serde(alias = "procfs-path")]
    pub procfs_path: Option<PathBuf>,

    /// Local /metrics endpoint; disabled when unset.
    #[serde(alias = "web-listen-address")]
    pub web_listen_address: Option<String>,

    // Decoration and limits
    #[serde(alias = "additional-labels")]
    pub additional_labels: Option<Vec<String>>,
    #[serde(alias = "max-batch-size")]
    pub max_batch_size: Option<u32>,
    #[serde(alias = "max-metric-length")]
    pub max_metric_length: Option<u32>,
    #[serde(alias = "process-topk")]
    pub process_topk: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth_host: Some(DEFAULT_AUTH_ENDPOINT.to_string()),
            metadata_host: Some(DEFAULT_METADATA_ENDPOINT.to_string()),
            sonar_host: None,
            stdout_only: Some(false),
            log_level: Some(DEFAULT_LOG_LEVEL.into()),
            syslog: Some(false),
            k8s_metrics_path: None,
            dbaas_metrics_path: None,
            metrics_path: None,
            scrape_bearer_token_file: None,
            scrape_timeout_seconds: Some(DEFAULT_SCRAPE_TIMEOUT.as_secs()),
            enable_node_collector: Some(true),
            enable_process_collector: Some(true),
            procfs_path: Some(PathBuf::from(DEFAULT_PROCFS)),
            web_listen_address: None,
            additional_labels: Some(Vec::new()),
            max_batch_size: Some(DEFAULT_MAX_BATCH_SIZE),
            max_metric_length: Some(DEFAULT_MAX_METRIC_LENGTH),
            process_topk: Some(DEFAULT_PROCESS_TOPK),
        }
    }
}

impl Config {
    /// Fields set in `file` win over the ones in `self`.
    fn overlay(self, file: Config) -> Config {
        Config {
            auth_host: file.auth_host.or(self.auth_host),
            metadata_host: file.metadata_host.or(self.metadata_host),
            sonar_host: file.sonar_host.or(self.sonar_host),
            stdout_only: file.stdout_only.or(self.stdout_only),
            log_level: file.log_level.or(self.log_level),
            syslog: file.syslog.or(self.syslog),
            k8s_metrics_path: file.k8s_metrics_path.or(self.k8s_metrics_path),
            dbaas_metrics_path: file.dbaas_metrics_path.or(self.dbaas_metrics_path),
            metrics_path: file.metrics_path.or(self.metrics_path),
            scrape_bearer_token_file: file.scrape_bearer_token_file.or(self.scrape_bearer_token_file),
            scrape_timeout_seconds: file.scrape_timeout_seconds.or(self.scrape_timeout_seconds),
            enable_node_collector: file.enable_node_collector.or(self.enable_node_collector),
            enable_process_collector: file.enable_process_collector.or(self.enable_process_collector),
            procfs_path: file.procfs_path.or(self.procfs_path),
            web_listen_address: file.web_listen_address.or(self.web_listen_address),
            additional_labels: file.additional_labels.or(self.additional_labels),
            max_batch_size: file.max_batch_size.or(self.max_batch_size),
            max_metric_length: file.max_metric_length.or(self.max_metric_length),
            process_topk: file.process_topk.or(self.process_topk),
        }
    }

    pub fn auth_host(&self) -> &str {
        self.auth_host.as_deref().unwrap_or(DEFAULT_AUTH_ENDPOINT)
    }

    pub fn metadata_host(&self) -> &str {
        self.metadata_host.as_deref().unwrap_or(DEFAULT_METADATA_ENDPOINT)
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }

    pub fn procfs_path(&self) -> &Path {
        self.procfs_path.as_deref().unwrap_or(Path::new(DEFAULT_PROCFS))
    }

    pub fn scrape_timeout(&self) -> Duration {
        self.scrape_timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SCRAPE_TIMEOUT)
    }

    pub fn process_topk(&self) -> usize {
        self.process_topk.unwrap_or(DEFAULT_PROCESS_TOPK)
    }

    pub fn max_batch_size(&self) -> u32 {
        self.max_batch_size.unwrap_or(DEFAULT_MAX_BATCH_SIZE)
    }

    pub fn max_metric_length(&self) -> u32 {
        self.max_metric_length.unwrap_or(DEFAULT_MAX_METRIC_LENGTH)
    }

    pub fn web_listen_address(&self) -> Result<Option<SocketAddr>, ConfigError> {
        self.web_listen_address
            .as_deref()
            .map(|addr| {
                addr.parse().map_err(|e| {
                    ConfigError::Invalid(format!("invalid web listen address {:?}: {}", addr, e))
                })
            })
            .transpose()
    }

    /// Parses the `key:value` additional labels.
    pub fn additional_labels(&self) -> Result<Vec<Label>, ConfigError> {
        self.additional_labels
            .iter()
            .flatten()
            .map(|raw| parse_label(raw))
            .collect()
    }
}

/// Parses one `key:value` pair. The key must be a valid Prometheus label
/// name; the value may contain further colons.
pub fn parse_label(raw: &str) -> Result<Label, ConfigError> {
    let (name, value) = raw.split_once(':').ok_or_else(|| {
        ConfigError::Invalid(format!("additional label {:?} is not in key:value form", raw))
    })?;
    let name = name.trim();

    let valid = LABEL_NAME.as_ref().is_some_and(|re| re.is_match(name));
    if !valid {
        return Err(ConfigError::Invalid(format!(
            "additional label {:?} has an invalid name {:?}",
            raw, name
        )));
    }
    Ok(Label::new(name, value.trim()))
}

fn check_url(field: &str, value: Option<&str>) -> Result<(), ConfigError> {
    let Some(value) = value else {
        return Ok(());
    };
    Url::parse(value)
        .map(|_| ())
        .map_err(|e| ConfigError::Invalid(format!("url for {} ({:?}) is not valid: {}", field, value, e)))
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<(), ConfigError> {
    check_url("auth_host", cfg.auth_host.as_deref())?;
    check_url("metadata_host", cfg.metadata_host.as_deref())?;
    check_url("sonar_host", cfg.sonar_host.as_deref())?;
    check_url("k8s_metrics_path", cfg.k8s_metrics_path.as_deref())?;
    check_url("dbaas_metrics_path", cfg.dbaas_metrics_path.as_deref())?;
    check_url("metrics_path", cfg.metrics_path.as_deref())?;

    let level = cfg.log_level();
    if !LOG_LEVELS.contains(&level) {
        return Err(ConfigError::Invalid(format!(
            "invalid log_level '{}', expected one of {}",
            level,
            LOG_LEVELS.join(", ")
        )));
    }

    cfg.additional_labels()?;
    cfg.web_listen_address()?;

    if cfg.max_batch_size() == 0 {
        return Err(ConfigError::Invalid("max_batch_size must be greater than zero".into()));
    }
    if cfg.max_metric_length() == 0 {
        return Err(ConfigError::Invalid("max_metric_length must be greater than zero".into()));
    }
    if cfg.process_topk() == 0 {
        return Err(ConfigError::Invalid("process_topk must be greater than zero".into()));
    }
    if cfg.scrape_timeout().is_zero() {
        return Err(ConfigError::Invalid("scrape_timeout_seconds must be greater than zero".into()));
    }

    Regex::new(PROCESS_TOPK_PATTERN)
        .map_err(|e| ConfigError::Invalid(format!("process top-k pattern does not compile: {}", e)))?;

    if let Some(path) = &cfg.scrape_bearer_token_file {
        if !path.is_file() {
            return Err(ConfigError::Invalid(format!(
                "scrape bearer token file not found: {}",
                path.display()
            )));
        }
    }

    Ok(())
}

/// Resolves configuration from CLI args, config file, and defaults.
/// This enforces precedence: CLI (if provided) > config file > default.
pub fn resolve_config(args: &Args) -> Result<Config, ConfigError> {
    let mut config = match load_config(args.config.as_deref())? {
        Some(file) => Config::default().overlay(file),
        None => Config::default(),
    };

    // Endpoints
    if let Some(url) = &args.auth_host {
        config.auth_host = Some(url.clone());
    }
    if let Some(url) = &args.metadata_host {
        config.metadata_host = Some(url.clone());
    }
    if let Some(url) = &args.sonar_host {
        config.sonar_host = Some(url.clone());
    }
    if args.stdout_only {
        config.stdout_only = Some(true);
    }

    // Logging: --log-level wins over --debug
    if let Some(level) = args.log_level {
        config.log_level = Some(level.as_str().to_string());
    } else if args.debug {
        config.log_level = Some(LogLevel::Debug.as_str().to_string());
    }
    if args.syslog {
        config.syslog = Some(true);
    }

    // Scrape targets
    if let Some(url) = &args.k8s_metrics_path {
        config.k8s_metrics_path = Some(url.clone());
    }
    if let Some(url) = &args.dbaas_metrics_path {
        config.dbaas_metrics_path = Some(url.clone());
    }
    if let Some(url) = &args.metrics_path {
        config.metrics_path = Some(url.clone());
    }
    if let Some(path) = &args.scrape_bearer_token_file {
        config.scrape_bearer_token_file = Some(path.clone());
    }
    if let Some(secs) = args.scrape_timeout {
        config.scrape_timeout_seconds = Some(secs);
    }

    // Collectors
    if args.no_collector_node {
        config.enable_node_collector = Some(false);
    }
    if args.no_collector_processes {
        config.enable_process_collector = Some(false);
    }
    if let Some(path) = &args.path_procfs {
        config.procfs_path = Some(path.clone());
    }

    // Local exposition
    if let Some(addr) = &args.web_listen_address {
        config.web_listen_address = Some(addr.clone());
    } else if args.web_listen && config.web_listen_address.is_none() {
        config.web_listen_address = Some(DEFAULT_WEB_LISTEN_ADDRESS.to_string());
    }

    // Labels are appended to the ones from the file
    if !args.additional_label.is_empty() {
        config
            .additional_labels
            .get_or_insert_with(Vec::new)
            .extend(args.additional_label.iter().cloned());
    }
    if let Some(n) = args.max_batch_size {
        config.max_batch_size = Some(n);
    }
    if let Some(n) = args.max_metric_length {
        config.max_metric_length = Some(n);
    }
    if let Some(k) = args.process_topk {
        config.process_topk = Some(k);
    }

    Ok(config)
}

/// Loads the config file named on the command line, or the first one found
/// in the default locations. An explicit path that does not exist is an
/// error; a missing default is not.
pub fn load_config(path: Option<&Path>) -> Result<Option<Config>, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match DEFAULT_CONFIG_LOCATIONS.iter().map(Path::new).find(|p| p.exists()) {
            Some(p) => p.to_path_buf(),
            None => return Ok(None),
        },
    };

    let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    let parse_err = |message: String| ConfigError::Parse {
        path: path.clone(),
        message,
    };

    let config: Config = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
        Some("toml") => toml::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
        // Default to YAML
        _ => serde_yaml::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
    };
    info!("Loaded configuration from: {}", path.display());
    Ok(Some(config))
}

/// Renders configuration in the requested format.
pub fn render_config(config: &Config, format: ConfigFormat) -> Result<String, ConfigError> {
    match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config).map_err(|e| ConfigError::Render(e.to_string())),
        ConfigFormat::Toml => toml::to_string_pretty(config).map_err(|e| ConfigError::Render(e.to_string())),
        ConfigFormat::Yaml => serde_yaml::to_string(config).map_err(|e| ConfigError::Render(e.to_string())),
    }
}

/// Shows configuration in requested format
pub fn show_config(config: &Config, format: ConfigFormat) -> Result<(), ConfigError> {
    println!("{}", render_config(config, format)?);
    Ok(())
}
