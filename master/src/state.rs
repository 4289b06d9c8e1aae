// master/src/state.rs

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::{
    collections::{btree_map::Entry, BTreeMap},
    sync::Arc,
};
use sweep_common::TaskKey;

use crate::coordinator::Coordinator;
use crate::error::DuplicateKey;
use crate::results::ResultSink;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
}

/// Estado mutable de una tarea.
///
/// `finish_time` es `Some` si y sólo si la tarea terminó; una vez terminada
/// ninguna transición la modifica.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    params: Value,
    payload: Option<Value>,

    last_checkin: Option<DateTime<Utc>>,
    in_progress: bool,
    failed: bool,
    finish_time: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(params: Value, payload: Option<Value>) -> Self {
        Self {
            params,
            payload,
            last_checkin: None,
            in_progress: false,
            failed: false,
            finish_time: None,
        }
    }

    pub fn params(&self) -> &Value {
        &self.params
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn is_finished(&self) -> bool {
        self.finish_time.is_some()
    }

    pub fn finish_time(&self) -> Option<DateTime<Utc>> {
        self.finish_time
    }

    pub fn last_checkin(&self) -> Option<DateTime<Utc>> {
        self.last_checkin
    }

    /// Toma (o renueva) el lease.
    pub fn heartbeat(&mut self, now: DateTime<Utc>) {
        if self.is_finished() {
            return;
        }
        self.in_progress = true;
        self.last_checkin = Some(now);
    }

    /// Suelta el lease sin marcar fallo.
    pub fn release(&mut self) {
        if self.is_finished() {
            return;
        }
        self.in_progress = false;
        self.last_checkin = None;
    }

    /// El flag `failed` sólo se limpia con `finish`.
    pub fn mark_failed(&mut self) {
        if self.is_finished() {
            return;
        }
        self.failed = true;
        self.in_progress = false;
    }

    pub fn finish(&mut self, now: DateTime<Utc>) {
        debug_assert!(!self.is_finished(), "finish() sobre una tarea ya terminada");
        if self.is_finished() {
            return;
        }
        self.in_progress = false;
        self.failed = false;
        self.finish_time = Some(now);
    }

    /// Menor es más elegible: libre (0) < fallida libre (100)
    /// < en progreso (1000) < en progreso y fallida (1100).
    pub fn priority(&self) -> u32 {
        1000 * u32::from(self.in_progress) + 100 * u32::from(self.failed)
    }

    /// Tiempo desde el último heartbeat.
    pub fn staleness(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_checkin.map(|t| now - t)
    }
}

/// Todas las tareas del sweep, indexadas por clave.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: BTreeMap<TaskKey, TaskRecord>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: TaskKey, record: TaskRecord) -> Result<(), DuplicateKey> {
        match self.tasks.entry(key) {
            Entry::Occupied(e) => Err(DuplicateKey(e.key().clone())),
            Entry::Vacant(e) => {
                e.insert(record);
                Ok(())
            }
        }
    }

    /// Marca como terminadas las tareas cuyo resultado ya existe
    /// (de una corrida anterior). Devuelve cuántas se marcaron.
    pub fn mark_completed(&mut self, sink: &dyn ResultSink, now: DateTime<Utc>) -> usize {
        let mut marked = 0;
        for (key, task) in self.tasks.iter_mut() {
            if !task.is_finished() && sink.is_complete(key) {
                task.finish(now);
                marked += 1;
            }
        }
        marked
    }

    pub fn get(&self, key: &TaskKey) -> Option<&TaskRecord> {
        self.tasks.get(key)
    }

    pub fn get_mut(&mut self, key: &TaskKey) -> Option<&mut TaskRecord> {
        self.tasks.get_mut(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TaskKey, &TaskRecord)> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn unfinished_keys(&self) -> Vec<TaskKey> {
        self.tasks
            .iter()
            .filter(|(_, t)| !t.is_finished())
            .map(|(k, _)| k.clone())
            .collect()
    }
}
