use anyhow::{Context, Result};
use regex::Regex;
use std::{
    fs,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::Duration,
};
use sweep_common::{Submission, TaskAssignment};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    process::Command,
    time::sleep,
};
use tracing::{info, warn};

use crate::api::{Ack, MasterClient};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub master_url: String,
    pub worker_id: String,
    /// Programa que ejecuta cada tarea: recibe la tarea en JSON por stdin
    /// y escribe el resultado (`{stats, predictions}`) en JSON por stdout.
    pub command: Vec<String>,
    pub heartbeat_interval: Duration,
    pub max_backoff: Duration,
    pub blacklist: Option<PathBuf>,
}

/// Cómo terminó la ejecución de una tarea.
#[derive(Debug)]
pub enum Outcome {
    Finished(Submission),
    Failed(String),
    /// El master respondió 410 a un heartbeat: otro worker ya la terminó.
    Abandoned,
}

/// Espera antes del reintento número `attempt`: 2^attempt segundos, con tope.
pub fn backoff_delay(attempt: u32, max: Duration) -> Duration {
    let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(max)
}

/// Lee la blacklist: una expresión regular por línea, anclada al inicio.
pub fn load_blacklist(path: &Path) -> Result<Vec<Regex>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("no se pudo leer la blacklist {}", path.display()))?;
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| Regex::new(&format!("^(?:{l})")).with_context(|| format!("patrón inválido: {l}")))
        .collect()
}

fn blacklisted<'a>(patterns: &'a [Regex], task: &str) -> Option<&'a Regex> {
    patterns.iter().find(|re| re.is_match(task))
}

/// Loop principal del worker:
/// - pide tareas (con backoff exponencial si no hay)
/// - ejecuta cada una mandando heartbeats
/// - reporta submit / fail / release
pub async fn run(cfg: WorkerConfig) -> Result<()> {
    let api = MasterClient::new(&cfg.master_url);
    info!(
        "worker {} contra {} (comando: {:?})",
        cfg.worker_id, cfg.master_url, cfg.command
    );

    loop {
        let task = next_task(&api, &cfg).await;
        handle_task(&api, &cfg, task).await;
    }
}

async fn next_task(api: &MasterClient, cfg: &WorkerConfig) -> TaskAssignment {
    let mut attempt: u32 = 0;
    loop {
        match api.request_task(&cfg.worker_id).await {
            Ok(Some(task)) => return task,
            Ok(None) => {}
            Err(e) => warn!("no se pudo pedir tarea: {:#}", e),
        }
        let delay = backoff_delay(attempt, cfg.max_backoff);
        info!("no hay tarea disponible, reintentando en {}s", delay.as_secs());
        sleep(delay).await;
        attempt = attempt.saturating_add(1);
    }
}

async fn handle_task(api: &MasterClient, cfg: &WorkerConfig, task: TaskAssignment) {
    let task_str = task.key.to_string();
    info!("tengo tarea {}", task_str);

    if let Some(path) = &cfg.blacklist {
        if path.exists() {
            match load_blacklist(path) {
                Ok(patterns) => {
                    if let Some(re) = blacklisted(&patterns, &task_str) {
                        info!("tarea {} coincide con la blacklist ({}), la suelto", task_str, re);
                        report("release", api.release(&task.key).await);
                        return;
                    }
                }
                Err(e) => warn!("{:#}", e),
            }
        }
    }

    match execute(api, cfg, &task).await {
        Ok(Outcome::Finished(result)) => {
            info!("tarea {} terminada, enviando resultado...", task_str);
            match api.submit(&task.key, &result).await {
                Ok(Ack::Ok) => info!("resultado de {} enviado", task_str),
                Ok(Ack::Gone) => info!("otro worker ya había terminado {}", task_str),
                other => report("submit", other),
            }
        }
        Ok(Outcome::Failed(reason)) => {
            warn!("tarea {} falló: {}", task_str, reason);
            report("fail", api.fail(&task.key).await);
        }
        Ok(Outcome::Abandoned) => {
            info!("tarea {} abandonada (ya terminada por otro worker)", task_str);
        }
        Err(e) => {
            warn!("no se pudo ejecutar {}: {:#}", task_str, e);
            report("fail", api.fail(&task.key).await);
        }
    }
}

fn report(op: &str, ack: Result<Ack>) {
    match ack {
        Ok(Ack::Ok) => {}
        Ok(other) => warn!("{} respondió {:?}", op, other),
        Err(e) => warn!("error HTTP en {}: {:#}", op, e),
    }
}

/// Ejecuta el comando de la tarea mandando heartbeats hasta que termine.
pub async fn execute(
    api: &MasterClient,
    cfg: &WorkerConfig,
    task: &TaskAssignment,
) -> Result<Outcome> {
    let (program, args) = cfg
        .command
        .split_first()
        .context("no hay comando configurado")?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("no se pudo lanzar {program}"))?;

    let input = serde_json::to_vec(task)?;
    let mut stdin = child.stdin.take().context("stdin no disponible")?;
    let mut stdout = child.stdout.take().context("stdout no disponible")?;

    // escritura y lectura en paralelo para no bloquear con payloads grandes
    let writer = tokio::spawn(async move {
        let res = stdin.write_all(&input).await;
        drop(stdin);
        res
    });
    let reader = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout.read_to_end(&mut buf).await.map(|_| buf)
    });

    let mut ticker = tokio::time::interval(cfg.heartbeat_interval);
    let exit = loop {
        tokio::select! {
            status = child.wait() => break Some(status?),
            _ = ticker.tick() => {
                match api.heartbeat(&task.key).await {
                    Ok(Ack::Gone) => break None,
                    Ok(Ack::Ok) => {}
                    other => report("heartbeat", other),
                }
            }
        }
    };

    let Some(status) = exit else {
        child.kill().await.ok();
        return Ok(Outcome::Abandoned);
    };

    if let Ok(Err(e)) = writer.await {
        // el programa puede cerrar stdin sin leerlo todo
        warn!("no se pudo escribir la tarea en stdin: {}", e);
    }
    let output = reader.await.context("lectura de stdout abortada")??;
    Ok(outcome_from(status, &output))
}

fn outcome_from(status: ExitStatus, stdout: &[u8]) -> Outcome {
    if !status.success() {
        return Outcome::Failed(format!("el comando terminó con {status}"));
    }
    match serde_json::from_slice::<Submission>(stdout) {
        Ok(result) => Outcome::Finished(result),
        Err(e) => Outcome::Failed(format!("salida inválida: {e}")),
    }
}
