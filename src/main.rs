use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod analysis;
mod cli;
mod config;
mod engine;
mod error;
mod github;
mod issue_tracker;
mod policy;
mod policyconfig;
mod repo_evaluator;

use cli::Cli;
use config::OperatorConfig;
use engine::ReconciliationEngine;
use github::GhClientPool;
use issue_tracker::IssueTracker;
use policy::registry::PolicyRegistry;
use policyconfig::ConfigFetcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("ALLSTAR_LOG_LEVEL").unwrap_or_else(|_| "allstar_reconciler=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let operator = OperatorConfig::from_env();

    let private_key = resolve_private_key(&operator).await?;

    let clients = Arc::new(GhClientPool::new(
        operator.app_id,
        private_key,
        operator.ghe_url.clone(),
    )?);
    let config_fetcher = Arc::new(ConfigFetcher::new(clients.cache()));
    let analysis = Arc::new(analysis::AnalysisContext::new());
    let issue_tracker = Arc::new(IssueTracker::new(operator.notice_ping_duration));

    // The individual policy check bodies are a separate concern (spec §1);
    // this binary ships an empty registry plus whatever the operator wires
    // in via future policy crates.
    let registry = PolicyRegistry::new(Vec::new());

    if let Some(name) = &cli.policy {
        if !registry.contains(name) {
            tracing::error!(policy = name, "unknown policy, exiting");
            std::process::exit(1);
        }
    }
    let registry = match &cli.policy {
        Some(name) => registry.restrict_to(name).unwrap_or(registry),
        None => registry,
    };

    let root_token = CancellationToken::new();
    install_signal_handlers(root_token.clone());

    let engine = ReconciliationEngine::new(
        clients,
        config_fetcher,
        analysis,
        registry,
        issue_tracker,
        operator,
        cli.repo_filter(),
        root_token,
    );

    engine.run(cli.once).await;

    Ok(())
}

/// `PRIVATE_KEY` takes precedence over fetching from `KEY_SECRET` (spec
/// §4.2). Secret-manager retrieval is out of scope (spec §1); in its
/// absence this treats `KEY_SECRET` as a file path, which is sufficient
/// for local/dev use and keeps the interface the same shape a real
/// fetcher would have.
async fn resolve_private_key(operator: &OperatorConfig) -> anyhow::Result<Vec<u8>> {
    if let Some(key) = &operator.private_key {
        return Ok(key.clone());
    }
    tokio::fs::read(&operator.key_secret_uri)
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "no PRIVATE_KEY set and failed to read KEY_SECRET path {}: {e}",
                operator.key_secret_uri
            )
        })
}

fn install_signal_handlers(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    token.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        tracing::info!("shutdown signal received, cancelling");
        token.cancel();
    });
}
