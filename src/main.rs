use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tokenpatrol::cli::{Cli, Commands};
use tokenpatrol::config::{self, Config};
use tokenpatrol::gitlab::GitlabClient;
use tokenpatrol::metrics::{MemorySink, ObservabilitySink, PrometheusSink};
use tokenpatrol::scan::CycleOrchestrator;
use tokenpatrol::{api, jobs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Cli::parse();
    let cfg = config::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;
    tracing::debug!(config = ?cfg, "configuration loaded");

    let result = match args.command {
        Some(Commands::Serve { port }) => run_server(cfg, port).await,
        Some(Commands::Scan) => run_once(cfg).await,
        None => run_server(cfg, None).await,
    };

    if let Err(ref e) = result {
        tracing::error!("{:#}", e);
    }
    result
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "tokenpatrol=info,tower_http=info".into()),
    );
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn gitlab_client(cfg: &Config) -> anyhow::Result<Arc<GitlabClient>> {
    let client = GitlabClient::new(&cfg.base_url, &cfg.gitlab_token, cfg.request_timeout)
        .context("failed to build GitLab HTTP client")?;
    Ok(Arc::new(client))
}

async fn run_server(cfg: Config, port: Option<u16>) -> anyhow::Result<()> {
    let sink = Arc::new(PrometheusSink::new().context("failed to register metrics")?);
    let orchestrator = Arc::new(CycleOrchestrator::new(
        gitlab_client(&cfg)?,
        Arc::clone(&sink) as Arc<dyn ObservabilitySink>,
        cfg.scan_settings(),
    ));

    let cancel = CancellationToken::new();
    let scan_job = jobs::token_scan::spawn(orchestrator, cfg.schedule.clone(), cancel.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(cfg.port)));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(
        %addr,
        gitlab = %cfg.base_url,
        schedule = %cfg.schedule,
        "tokenpatrol exporter listening"
    );

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
        }
        tracing::info!("shutdown signal received");
        shutdown.cancel();
    });

    let server_cancel = cancel.clone();
    axum::serve(listener, api::router(sink))
        .with_graceful_shutdown(async move { server_cancel.cancelled().await })
        .await
        .context("metrics server failed")?;

    cancel.cancel();
    if tokio::time::timeout(Duration::from_secs(10), scan_job).await.is_err() {
        tracing::warn!("scan job did not stop within 10s");
    }
    tracing::info!("shutdown complete");
    Ok(())
}

async fn run_once(cfg: Config) -> anyhow::Result<()> {
    let sink = Arc::new(MemorySink::new());
    let orchestrator = CycleOrchestrator::new(gitlab_client(&cfg)?, sink, cfg.scan_settings());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let report = orchestrator.run_cycle(&cancel).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
