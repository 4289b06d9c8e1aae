use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::key::TaskKey;

/// Cuerpo (opcional) de `POST /api/v1/tasks/request`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Identificador libre del worker, sólo para logs.
    #[serde(default)]
    pub worker: Option<String>,
}

/// Tarea entregada a un worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub key: TaskKey,
    /// Parámetros opacos del experimento; el master no los interpreta.
    pub params: Value,
    /// Datos auxiliares precalculados (opcional), se entregan tal cual.
    #[serde(default)]
    pub payload: Option<Value>,
}

/// Cuerpo de heartbeat / release / fail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRequest {
    pub key: TaskKey,
}

/// Resultado que produce un worker para una tarea.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    #[serde(default)]
    pub stats: Option<Value>,
    #[serde(alias = "preds")]
    pub predictions: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub key: TaskKey,
    pub result: Submission,
}
