//! do-agent entry point.
//!
//! Resolves configuration, wires collectors, decorators, the writer and the
//! rate limiter together and runs the pipeline until a termination signal
//! arrives.

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};

use do_agent::agent::Agent;
use do_agent::aggregate::{dbaas_spec, host_spec, k8s_spec, AggregationSpec};
use do_agent::cli::Args;
use do_agent::client::{Client, ClientOptions, Limits};
use do_agent::collectors::scraper::{BearerAuth, ScraperOptions};
use do_agent::collectors::{InternalCollector, NodeCollector, Scraper};
use do_agent::config::{resolve_config, show_config, validate_effective_config, Config};
use do_agent::decorate::standard_chain;
use do_agent::diagnostics::{self, Diagnostics};
use do_agent::limiter::{ConstantLimiter, RateLimiter};
use do_agent::logging::setup_logging;
use do_agent::process::ProcessCollector;
use do_agent::registry::Registry;
use do_agent::web::{self, WebState};
use do_agent::whitelist::Whitelist;
use do_agent::writer::{MetricWriter, Sonar, Stdout};

/// Pacing used with the stdout writer.
const STDOUT_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.check_config {
        return match validate_effective_config(&config) {
            Ok(()) => {
                println!("Configuration is valid");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Configuration invalid: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    if let Err(e) = validate_effective_config(&config) {
        eprintln!("Configuration invalid: {}", e);
        return ExitCode::FAILURE;
    }

    if args.show_config {
        return match show_config(&config, args.config_format) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{}", e);
                ExitCode::FAILURE
            }
        };
    }

    if let Err(e) = setup_logging(config.log_level(), config.syslog.unwrap_or(false)) {
        eprintln!("failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("do-agent failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<()> {
    info!(
        "Starting do-agent {} (revision {})",
        diagnostics::VERSION,
        diagnostics::revision()
    );

    let diagnostics = Arc::new(Diagnostics::new().context("failed to register diagnostics")?);
    let (registry, spec) = build_registry(&config, &diagnostics)?;
    let registry = Arc::new(registry);

    let labels = config.additional_labels()?;
    let chain = Arc::new(
        standard_chain(config.process_topk(), labels).context("failed to build decorator chain")?,
    );

    let (writer, limiter, limits) = init_writer(&config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    install_signal_handlers(shutdown_tx)?;

    let web_handle = match config.web_listen_address()? {
        Some(addr) => {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind {}", addr))?;
            let state = WebState {
                registry: Arc::clone(&registry),
                decorator: Arc::clone(&chain),
                limits,
            };
            let rx = shutdown_rx.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = web::serve(listener, state, rx).await {
                    error!("Local metrics server error: {}", e);
                }
            }))
        }
        None => None,
    };

    Agent::new(registry, chain, spec, writer, limiter, diagnostics)
        .run(shutdown_rx)
        .await;

    if let Some(handle) = web_handle {
        if let Err(e) = handle.await {
            warn!("Local metrics server task failed: {}", e);
        }
    }

    info!("do-agent stopped gracefully");
    Ok(())
}

/// Registers the built-in collectors and every configured scrape target,
/// returning the registry and the union of their aggregation specs.
fn build_registry(
    config: &Config,
    diagnostics: &Arc<Diagnostics>,
) -> Result<(Registry, AggregationSpec)> {
    let mut registry = Registry::new();
    let mut spec = host_spec();
    let procfs = config.procfs_path();

    if config.enable_node_collector.unwrap_or(true) {
        registry.register(Arc::new(NodeCollector::new(procfs)));
    }
    if config.enable_process_collector.unwrap_or(true) {
        registry.register(Arc::new(ProcessCollector::new(procfs)));
    }
    registry.register(Arc::new(InternalCollector::new(Arc::clone(diagnostics))));

    let opts = ScraperOptions {
        timeout: config.scrape_timeout(),
        bearer: config
            .scrape_bearer_token_file
            .clone()
            .map(BearerAuth::TokenFile),
        ..ScraperOptions::default()
    };

    let targets = [
        ("dokubernetes", &config.k8s_metrics_path, Whitelist::k8s(), k8s_spec()),
        ("dodbaas", &config.dbaas_metrics_path, Whitelist::dbaas(), dbaas_spec()),
        ("prometheus", &config.metrics_path, Whitelist::allow_all(), AggregationSpec::new()),
    ];
    for (name, endpoint, whitelist, target_spec) in targets {
        let Some(endpoint) = endpoint else {
            continue;
        };
        let scraper = Scraper::new(name, endpoint, Vec::new(), whitelist, opts.clone())
            .with_context(|| format!("failed to initialize {} scraper", name))?;
        info!("Scraping {} metrics from {}", name, endpoint);
        registry.register(Arc::new(scraper));
        spec = spec.union(target_spec);
    }

    info!("Registered collectors: {:?}", registry.names());
    Ok((registry, spec))
}

type WriterParts = (Box<dyn MetricWriter>, Arc<dyn RateLimiter>, Arc<Limits>);

fn init_writer(config: &Config) -> Result<WriterParts> {
    if config.stdout_only.unwrap_or(false) {
        let limits = Arc::new(Limits::new(
            STDOUT_INTERVAL,
            config.max_batch_size(),
            config.max_metric_length(),
        ));
        let writer: Box<dyn MetricWriter> = Box::new(Stdout::new());
        let limiter: Arc<dyn RateLimiter> = Arc::new(ConstantLimiter::new(STDOUT_INTERVAL));
        return Ok((writer, limiter, limits));
    }

    let opts = ClientOptions {
        endpoints: config.sonar_host.iter().cloned().collect(),
        metadata_endpoint: config.metadata_host().to_string(),
        auth_endpoint: config.auth_host().to_string(),
        max_batch_size: config.max_batch_size(),
        max_metric_length: config.max_metric_length(),
        ..ClientOptions::default()
    };
    let client = Arc::new(Client::new(opts).context("failed to create sonar client")?);
    let limits = client.limits();
    let writer: Box<dyn MetricWriter> = Box::new(Sonar::new(Arc::clone(&client)));
    let limiter: Arc<dyn RateLimiter> = client;
    Ok((writer, limiter, limits))
}

/// Flips the shutdown flag on SIGTERM, SIGINT, SIGQUIT or SIGHUP.
fn install_signal_handlers(tx: watch::Sender<bool>) -> Result<()> {
    let mut term = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut int = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let mut quit = signal(SignalKind::quit()).context("failed to install SIGQUIT handler")?;
    let mut hup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;

    tokio::spawn(async move {
        let name = tokio::select! {
            _ = term.recv() => "SIGTERM",
            _ = int.recv() => "SIGINT",
            _ = quit.recv() => "SIGQUIT",
            _ = hup.recv() => "SIGHUP",
        };
        info!("Received {}, finishing current cycle and shutting down", name);
        let _ = tx.send(true);
    });
    Ok(())
}
