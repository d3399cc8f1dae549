use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use arc53_watcher::algod::AlgodClient;
use arc53_watcher::commands::Cli;
use arc53_watcher::config::{DbConfig, environment};
use arc53_watcher::db;
use arc53_watcher::ingest::{Pipeline, ProcessingFailures};
use arc53_watcher::nfd::NfdProvider;
use arc53_watcher::providers::Provider;
use arc53_watcher::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let env = environment();
    tracing::info!(?env, "starting arc53-watcher");

    let pool = db::connect(&DbConfig::from_env()).await?;
    let algod = AlgodClient::new(env);

    let nfd = Arc::new(NfdProvider::new(
        pool.clone(),
        Arc::new(algod.clone()),
        env.registry_app_id(),
    ));
    let providers: Arc<Vec<Arc<dyn Provider>>> = Arc::new(vec![nfd]);
    let failures: ProcessingFailures = Arc::default();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pipeline = Pipeline::new(
        pool.clone(),
        algod,
        Arc::clone(&providers),
        Arc::clone(&failures),
        cli.print_txns,
    );
    let pipeline_shutdown = shutdown_rx.clone();
    let start_round = cli.start_round;
    let pipeline_task = tokio::spawn(async move {
        if let Err(e) = pipeline.run(start_round, pipeline_shutdown).await {
            tracing::error!("ingest pipeline failed: {e}");
        }
    });

    let state = server::AppState {
        pool: pool.clone(),
        providers,
        failures,
    };
    let server_task = tokio::spawn(server::serve(state, cli.port, shutdown_rx));

    wait_for_shutdown_signal().await;
    tracing::info!("shutting down");
    let _ = shutdown_tx.send(true);

    let _ = pipeline_task.await;
    if let Ok(Err(e)) = server_task.await {
        tracing::error!("http facade failed: {e}");
    }
    pool.close().await;

    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
