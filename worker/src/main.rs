mod api;
mod worker;

use anyhow::Result;
use clap::Parser;
use std::{path::PathBuf, time::Duration};
use tracing_subscriber::EnvFilter;

use crate::worker::WorkerConfig;

/// Worker: pide tareas al master, las ejecuta con COMMAND y reporta el resultado.
#[derive(Debug, Parser)]
#[command(name = "sweep-worker")]
struct Args {
    /// URL base del master
    /// - En Docker: MASTER_URL=http://master:2116
    /// - Local: http://localhost:2116
    #[arg(long, env = "MASTER_URL", default_value = "http://localhost:2116")]
    master_url: String,

    /// Archivo con patrones (uno por línea) de tareas que este worker no ejecuta
    #[arg(short, long, env = "WORKER_BLACKLIST", value_name = "FILE")]
    blacklist: Option<PathBuf>,

    /// Cada cuántos segundos se manda heartbeat mientras corre una tarea
    #[arg(long, env = "WORKER_HEARTBEAT_SECS", default_value_t = 30)]
    heartbeat_secs: u64,

    /// Tope del backoff cuando no hay tareas
    #[arg(long, env = "WORKER_MAX_BACKOFF_SECS", default_value_t = 300)]
    max_backoff_secs: u64,

    /// Programa (y argumentos) que ejecuta cada tarea
    #[arg(required = true, trailing_var_arg = true, value_name = "COMMAND")]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sweep_worker=debug,reqwest=info")),
        )
        .init();

    let args = Args::parse();

    // Nombre de host + sufijo aleatorio (sólo para logs del master)
    let hostname = hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let worker_id = format!("{}-{}", hostname, &suffix[..8]);

    worker::run(WorkerConfig {
        master_url: args.master_url,
        worker_id,
        command: args.command,
        heartbeat_interval: Duration::from_secs(args.heartbeat_secs.max(1)),
        max_backoff: Duration::from_secs(args.max_backoff_secs),
        blacklist: args.blacklist,
    })
    .await
}
