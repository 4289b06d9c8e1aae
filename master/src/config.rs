use anyhow::{bail, Context, Result};
use chrono::Duration;
use clap::Parser;
use serde::Deserialize;
use serde_json::Value;
use std::{fs, net::SocketAddr, path::PathBuf};
use sweep_common::{KeyPart, TaskKey};

use crate::coordinator::DEFAULT_STATUS_DEPTH;
use crate::lease::{DEFAULT_LEASE_TIMEOUT_SECS, MAX_LEASE_TIMEOUT_SECS};
use crate::state::{TaskRecord, TaskStore};

#[derive(Debug, Parser)]
#[command(name = "sweep-master")]
#[command(about = "Coordinador de tareas de un sweep de experimentos")]
pub struct Args {
    /// Archivo YAML con la lista de experimentos
    #[arg(value_name = "SWEEP_YAML")]
    pub sweep: PathBuf,

    /// Directorio de resultados (se marcan como terminadas las tareas que ya tienen .preds)
    #[arg(long, env = "SWEEP_RESULTS_DIR", default_value = "results")]
    pub results_dir: PathBuf,

    #[arg(long, env = "SWEEP_BIND_ADDR", default_value = "0.0.0.0:2116")]
    pub bind: SocketAddr,

    /// Segundos sin heartbeat tras los cuales un lease se considera abandonado
    #[arg(
        long,
        env = "SWEEP_LEASE_TIMEOUT_SECS",
        default_value_t = DEFAULT_LEASE_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(..=MAX_LEASE_TIMEOUT_SECS)
    )]
    pub lease_timeout_secs: u64,

    /// Cuántos componentes de la clave se usan para agrupar el estado
    #[arg(long, env = "SWEEP_STATUS_DEPTH", default_value_t = DEFAULT_STATUS_DEPTH)]
    pub status_depth: usize,

    /// Semilla fija para el desempate (útil para reproducir una corrida)
    #[arg(long, env = "SWEEP_SEED")]
    pub seed: Option<u64>,
}

impl Args {
    pub fn lease_timeout(&self) -> Result<Duration> {
        i64::try_from(self.lease_timeout_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .with_context(|| format!("lease fuera de rango: {}s", self.lease_timeout_secs))
    }
}

/// Un eje del sweep: lista de valores, un valor suelto o `{range: n}` (0..n).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Axis {
    Range { range: u32 },
    Values(Vec<KeyPart>),
    Single(KeyPart),
}

impl Axis {
    fn values(&self) -> Vec<KeyPart> {
        match self {
            Axis::Range { range } => (0..i64::from(*range)).map(KeyPart::Int).collect(),
            Axis::Values(v) => v.clone(),
            Axis::Single(v) => vec![v.clone()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Experiment {
    /// Ejes en el orden en que forman la clave.
    pub axes: Vec<Axis>,
    /// Parámetros que se pasan tal cual al worker.
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl Experiment {
    /// Producto cartesiano de los ejes, respetando el orden de los valores.
    pub fn keys(&self) -> Vec<TaskKey> {
        let mut keys: Vec<Vec<KeyPart>> = vec![Vec::new()];
        for axis in &self.axes {
            let values = axis.values();
            keys = keys
                .into_iter()
                .flat_map(|prefix| {
                    values.iter().map(move |v| {
                        let mut k = prefix.clone();
                        k.push(v.clone());
                        k
                    })
                })
                .collect();
        }
        keys.into_iter()
            .filter(|k| !k.is_empty())
            .map(TaskKey::new)
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    pub experiments: Vec<Experiment>,
}

impl SweepConfig {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("no se pudo leer {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("sweep inválido en {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let cfg: SweepConfig = serde_yaml::from_str(text)?;
        Ok(cfg)
    }

    /// Construye el TaskStore con una tarea por clave.
    pub fn build_store(&self) -> Result<TaskStore> {
        let mut store = TaskStore::new();
        for (i, exp) in self.experiments.iter().enumerate() {
            let keys = exp.keys();
            if keys.is_empty() {
                bail!("el experimento #{i} no genera ninguna tarea");
            }
            for key in keys {
                store.insert(key, TaskRecord::new(exp.params.clone(), exp.payload.clone()))?;
            }
        }
        Ok(store)
    }
}
