//! CLI arguments for do-agent.
//!
//! Every option is optional so that [`crate::config::resolve_config`] can
//! tell whether the user supplied it (CLI > config file > defaults).

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Configuration format options for output
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum ConfigFormat {
    #[default]
    Yaml,
    Json,
    Toml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug, Default)]
#[command(
    name = "do-agent",
    about = "Collects host metrics and pushes them to DigitalOcean monitoring",
    long_about = "Collects host metrics and pushes them to DigitalOcean monitoring.\n\n\
                  Gathers node, process and scraped Prometheus metrics, rewrites them to \
                  sonar names, aggregates away high-cardinality labels and pushes the result \
                  at the pace the server asks for.",
    version
)]
pub struct Args {
    /// Endpoint to use for obtaining droplet app key
    #[arg(long, env = "DO_AGENT_AUTH_URL")]
    pub auth_host: Option<String>,

    /// Endpoint to use for obtaining droplet metadata
    #[arg(long)]
    pub metadata_host: Option<String>,

    /// Endpoint to use for delivering metrics
    #[arg(long, env = "DO_AGENT_SONAR_HOST")]
    pub sonar_host: Option<String>,

    /// Write all metrics to stdout only
    #[arg(long)]
    pub stdout_only: bool,

    /// Display debug information
    #[arg(long)]
    pub debug: bool,

    /// Enable logging to syslog
    #[arg(long)]
    pub syslog: bool,

    /// Log level (wins over --debug)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Kubernetes metrics endpoint to scrape
    #[arg(long)]
    pub k8s_metrics_path: Option<String>,

    /// Managed database metrics endpoint to scrape
    #[arg(long)]
    pub dbaas_metrics_path: Option<String>,

    /// Prometheus endpoint to scrape without filtering
    #[arg(long)]
    pub metrics_path: Option<String>,

    /// Bearer token file sent with every scrape request
    #[arg(long = "scrape.bearer-token-file")]
    pub scrape_bearer_token_file: Option<PathBuf>,

    /// Scrape timeout in seconds
    #[arg(long)]
    pub scrape_timeout: Option<u64>,

    /// Disable the process collector
    #[arg(long = "no-collector.processes")]
    pub no_collector_processes: bool,

    /// Disable the node collector
    #[arg(long = "no-collector.node")]
    pub no_collector_node: bool,

    /// procfs mountpoint
    #[arg(long = "path.procfs")]
    pub path_procfs: Option<PathBuf>,

    /// Expose the local registry on /metrics
    #[arg(long = "web.listen")]
    pub web_listen: bool,

    /// Address for the local /metrics endpoint (implies --web.listen)
    #[arg(long = "web.listen-address")]
    pub web_listen_address: Option<String>,

    /// Additional label appended to every metric (key:value, repeatable)
    #[arg(long = "additional-label")]
    pub additional_label: Vec<String>,

    /// Maximum metrics per push until the server says otherwise
    #[arg(long)]
    pub max_batch_size: Option<u32>,

    /// Maximum encoded metric length until the server says otherwise
    #[arg(long)]
    pub max_metric_length: Option<u32>,

    /// Number of processes to report per process metric
    #[arg(long)]
    pub process_topk: Option<usize>,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,
}
