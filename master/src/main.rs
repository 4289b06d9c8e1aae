mod config;
mod coordinator;
mod error;
mod handlers;
mod lease;
mod progress;
mod results;
mod state;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{Args, SweepConfig};
use crate::coordinator::{Coordinator, CoordinatorConfig};
use crate::lease::{Clock, SystemClock};
use crate::results::FsResultStore;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sweep_master=debug,tower_http=info")),
        )
        .init();

    let args = Args::parse();

    let sweep = SweepConfig::load(&args.sweep)?;
    let mut store = sweep.build_store()?;
    if store.is_empty() {
        anyhow::bail!("el sweep {} no tiene tareas", args.sweep.display());
    }

    let results = FsResultStore::open(&args.results_dir)
        .with_context(|| format!("no se pudo abrir {}", args.results_dir.display()))?;
    let clock = Arc::new(SystemClock);
    let already_done = store.mark_completed(&results, clock.now());
    info!(
        "{} tareas en el sweep, {} ya terminadas en {}",
        store.len(),
        already_done,
        results.dir().display()
    );

    let coordinator = Coordinator::new(
        store,
        Arc::new(results),
        clock,
        CoordinatorConfig {
            lease_timeout: args.lease_timeout()?,
            status_depth: args.status_depth,
            seed: args.seed,
        },
    );

    let lease_timeout = coordinator.lease_timeout();
    let state = AppState {
        coordinator: Arc::new(coordinator),
    };

    // router HTTP
    let app = handlers::build_router(state);

    let listener = TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("no se pudo escuchar en {}", args.bind))?;
    info!(
        "master escuchando en {} (lease de {}s)",
        listener.local_addr()?,
        lease_timeout.num_seconds()
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("apagando master");
        })
        .await?;

    Ok(())
}
