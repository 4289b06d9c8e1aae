// master/src/lease.rs

use chrono::{DateTime, Duration, Utc};

use crate::state::TaskRecord;

/// Lease por defecto: si una tarea no recibe heartbeat en este tiempo,
/// se asume que su worker murió.
pub const DEFAULT_LEASE_TIMEOUT_SECS: u64 = 120;

/// Mayor lease representable como `chrono::Duration` (milisegundos en i64).
pub const MAX_LEASE_TIMEOUT_SECS: u64 = (i64::MAX / 1000) as u64;

/// Fuente de tiempo del coordinador.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Lease vencido: la tarea está en progreso y su último heartbeat
/// es más viejo que `lease_timeout`.
pub fn is_stale(task: &TaskRecord, now: DateTime<Utc>, lease_timeout: Duration) -> bool {
    if !task.in_progress() {
        return false;
    }
    match task.staleness(now) {
        Some(elapsed) => elapsed > lease_timeout,
        // en progreso sin checkin no debería pasar; lo tratamos como vencido
        None => true,
    }
}

#[cfg(test)]
pub use manual::ManualClock;
