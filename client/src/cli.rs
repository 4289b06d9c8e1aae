use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::{Client, StatusCode};
use sweep_common::{KeyPart, KeyRequest, StatusReport, TaskAssignment, TaskKey, TaskRequest};

#[derive(Parser)]
#[command(name = "sweep")]
#[command(about = "CLI simple para hablar con el master del sweep")]
struct Cli {
    /// - En Docker: MASTER_URL=http://master:2116
    /// - Local: default http://localhost:2116
    #[arg(long, env = "MASTER_URL", default_value = "http://localhost:2116", global = true)]
    master_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estado del sweep agrupado por prefijo de clave, con tiempo restante
    Status,
    /// Toma una tarea (como lo haría un worker) y la muestra
    Request,
    /// Renueva el lease de una tarea
    Heartbeat {
        /// Clave en JSON, ej: '["svm", "musk1", "rbf", 0, 3]'
        #[arg(value_name = "KEY_JSON")]
        key: String,
    },
    /// Suelta una tarea sin marcarla como fallida
    Release {
        #[arg(value_name = "KEY_JSON")]
        key: String,
    },
    /// Marca una tarea como fallida
    Fail {
        #[arg(value_name = "KEY_JSON")]
        key: String,
    },
}

fn parse_key(raw: &str) -> Result<TaskKey> {
    serde_json::from_str(raw).with_context(|| format!("clave inválida: {raw}"))
}

fn format_group(group: &[KeyPart]) -> String {
    group
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" / ")
}

fn print_status(report: &StatusReport) {
    let t = &report.totals;
    println!("Tiempo restante: {}", report.eta);
    println!(
        "  tareas: total={}, terminadas={}, en progreso={}, fallidas={}, esperando={}",
        t.total(),
        t.finished,
        t.in_progress,
        t.failed,
        t.waiting
    );
    println!("  progreso: {:.1}%", t.percent(t.finished));
    println!();

    let width = report
        .groups
        .iter()
        .map(|g| format_group(&g.group).len())
        .max()
        .unwrap_or(0);

    for g in &report.groups {
        let c = &g.counts;
        let name = format_group(&g.group);
        if c.is_done() {
            println!("  {:<width$}  DONE", name);
        } else {
            println!(
                "  {:<width$}  esperando {:>6.2}%  fallidas {:>6.2}%  en progreso {:>6.2}%  terminadas {:>6.2}%",
                name,
                c.percent(c.waiting),
                c.percent(c.failed),
                c.percent(c.in_progress),
                c.percent(c.finished),
            );
        }
    }
}

fn describe(status: StatusCode) -> &'static str {
    match status {
        StatusCode::OK => "OK",
        StatusCode::NOT_FOUND => "clave desconocida",
        StatusCode::GONE => "la tarea ya está terminada",
        StatusCode::BAD_REQUEST => "pedido mal formado",
        _ => "error del master",
    }
}

async fn post_key(client: &Client, base_url: &str, route: &str, raw: &str) -> Result<()> {
    let key = parse_key(raw)?;
    let url = format!("{}/api/v1/tasks/{}", base_url, route);
    let resp = client.post(&url).json(&KeyRequest { key: key.clone() }).send().await?;
    let status = resp.status();
    println!("{} {}: {} ({})", route, key, describe(status), status);
    if !status.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = cli.master_url.trim_end_matches('/').to_string();

    match cli.command {
        Commands::Status => {
            let url = format!("{}/api/v1/status", base_url);
            let resp = client.get(&url).send().await?;
            if resp.status().is_success() {
                let report: StatusReport = resp.json().await?;
                print_status(&report);
            } else {
                println!("Error consultando {} (status {})", url, resp.status());
            }
        }

        Commands::Request => {
            let url = format!("{}/api/v1/tasks/request", base_url);
            let resp = client
                .post(&url)
                .json(&TaskRequest {
                    worker: Some("sweep-cli".to_string()),
                })
                .send()
                .await?;

            match resp.status() {
                StatusCode::NOT_FOUND => println!("No hay tareas pendientes."),
                s if s.is_success() => {
                    let task: TaskAssignment = resp.json().await?;
                    println!("Tarea:");
                    println!("  key    : {}", serde_json::to_string(&task.key)?);
                    println!("  params : {}", task.params);
                    match task.payload {
                        Some(p) => println!("  payload: {}", p),
                        None => println!("  payload: (sin datos)"),
                    }
                }
                s => println!("Error pidiendo tarea (status {})", s),
            }
        }

        Commands::Heartbeat { key } => post_key(&client, &base_url, "heartbeat", &key).await?,
        Commands::Release { key } => post_key(&client, &base_url, "release", &key).await?,
        Commands::Fail { key } => post_key(&client, &base_url, "fail", &key).await?,
    }

    Ok(())
}
