use serde::{Deserialize, Serialize};

use crate::key::KeyPart;

/// Conteo de tareas por estado.
///
/// Cada tarea cuenta una sola vez: finished > failed > in_progress > waiting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub waiting: u64,
    pub failed: u64,
    pub in_progress: u64,
    pub finished: u64,
}

impl StateCounts {
    pub fn total(&self) -> u64 {
        self.waiting + self.failed + self.in_progress + self.finished
    }

    pub fn is_done(&self) -> bool {
        self.total() > 0 && self.finished == self.total()
    }

    /// Porcentaje de `n` sobre el total del grupo.
    pub fn percent(&self, n: u64) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            100.0 * n as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStatus {
    /// Prefijo de la clave que identifica al grupo.
    pub group: Vec<KeyPart>,
    pub counts: StateCounts,
}

/// Respuesta de `GET /api/v1/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub totals: StateCounts,
    /// Tiempo restante estimado, ej: "3.2 hours" o "unknown".
    pub eta: String,
    /// Segundos estimados, si hay suficiente historial.
    pub eta_secs: Option<f64>,
    pub groups: Vec<GroupStatus>,
}
