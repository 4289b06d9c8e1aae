use chrono::Duration;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use sweep_common::{
    GroupStatus, KeyPart, StateCounts, StatusReport, Submission, TaskAssignment, TaskKey,
};
use tracing::{debug, info, warn};

use crate::error::{CoordinatorError, Result};
use crate::lease::{is_stale, Clock, DEFAULT_LEASE_TIMEOUT_SECS};
use crate::progress;
use crate::results::ResultSink;
use crate::state::{TaskRecord, TaskStore};

/// Profundidad de agrupación por defecto del reporte de estado.
pub const DEFAULT_STATUS_DEPTH: usize = 3;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub lease_timeout: Duration,
    pub status_depth: usize,
    /// Semilla del desempate aleatorio; `None` usa entropía del sistema.
    pub seed: Option<u64>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lease_timeout: Duration::seconds(DEFAULT_LEASE_TIMEOUT_SECS as i64),
            status_depth: DEFAULT_STATUS_DEPTH,
            seed: None,
        }
    }
}

struct Inner {
    store: TaskStore,
    // claves no terminadas; se depura en cada clean()
    unfinished: Vec<TaskKey>,
    rng: StdRng,
}

/// Dueño único del estado de las tareas.
///
/// Todas las transiciones pasan por un único mutex, así que cualquier
/// operación ve completos los efectos de las que terminaron antes.
pub struct Coordinator {
    inner: Mutex<Inner>,
    sink: Arc<dyn ResultSink>,
    clock: Arc<dyn Clock>,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(
        store: TaskStore,
        sink: Arc<dyn ResultSink>,
        clock: Arc<dyn Clock>,
        config: CoordinatorConfig,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let unfinished = store.unfinished_keys();
        Self {
            inner: Mutex::new(Inner {
                store,
                unfinished,
                rng,
            }),
            sink,
            clock,
            config,
        }
    }

    // Un pánico con el lock tomado no deja estados a medias (cada operación
    // valida antes de mutar), así que se puede seguir usando el estado.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Quita las terminadas del conjunto pendiente y libera los leases vencidos.
    /// Un lease vencido no cuenta como fallo.
    fn clean(&self, inner: &mut Inner) {
        let now = self.clock.now();
        let Inner {
            store, unfinished, ..
        } = inner;

        unfinished.retain(|k| store.get(k).is_some_and(|t| !t.is_finished()));

        for key in unfinished.iter() {
            if let Some(task) = store.get_mut(key) {
                if is_stale(task, now, self.config.lease_timeout) {
                    warn!(
                        "lease de {} vencido (último heartbeat {:?}), liberando",
                        key,
                        task.last_checkin()
                    );
                    task.release();
                }
            }
        }
    }

    /// Entrega la tarea pendiente más elegible; los empates se rompen al azar.
    pub fn request_task(&self, worker: Option<&str>) -> Result<TaskAssignment> {
        let mut guard = self.lock();
        self.clean(&mut guard);

        let Inner {
            store,
            unfinished,
            rng,
        } = &mut *guard;

        let best = unfinished
            .iter()
            .filter_map(|k| store.get(k))
            .map(TaskRecord::priority)
            .min()
            .ok_or(CoordinatorError::NotFound)?;

        let candidates: Vec<&TaskKey> = unfinished
            .iter()
            .filter(|k| store.get(*k).is_some_and(|t| t.priority() == best))
            .collect();

        let key = candidates
            .choose(rng)
            .map(|k| (*k).clone())
            .ok_or(CoordinatorError::NotFound)?;

        let task = store
            .get_mut(&key)
            .ok_or_else(|| CoordinatorError::UnknownKey(key.clone()))?;
        task.heartbeat(self.clock.now());

        info!(
            "asignando tarea {} (prioridad {}) a {}",
            key,
            best,
            worker.unwrap_or("worker anónimo")
        );

        Ok(TaskAssignment {
            key,
            params: task.params().clone(),
            payload: task.payload().cloned(),
        })
    }

    // valida la clave y aplica `f` sobre una tarea no terminada
    fn with_live_task<F>(&self, key: &TaskKey, f: F) -> Result<()>
    where
        F: FnOnce(&mut TaskRecord),
    {
        let mut guard = self.lock();
        self.clean(&mut guard);

        let task = guard
            .store
            .get_mut(key)
            .ok_or_else(|| CoordinatorError::UnknownKey(key.clone()))?;
        if task.is_finished() {
            return Err(CoordinatorError::AlreadyFinished(key.clone()));
        }
        f(task);
        Ok(())
    }

    pub fn heartbeat(&self, key: &TaskKey) -> Result<()> {
        let now = self.clock.now();
        self.with_live_task(key, |task| task.heartbeat(now))?;
        debug!("heartbeat de {}", key);
        Ok(())
    }

    pub fn release(&self, key: &TaskKey) -> Result<()> {
        self.with_live_task(key, TaskRecord::release)?;
        info!("tarea {} liberada por su worker", key);
        Ok(())
    }

    pub fn mark_failed(&self, key: &TaskKey) -> Result<()> {
        self.with_live_task(key, TaskRecord::mark_failed)?;
        warn!("tarea {} reportada como fallida", key);
        Ok(())
    }

    /// Acepta el resultado de una tarea, como máximo una vez por clave.
    ///
    /// El guardado y `finish()` ocurren bajo el mismo lock; si el guardado
    /// falla la tarea queda intacta.
    pub fn submit(&self, key: &TaskKey, submission: &Submission) -> Result<()> {
        let mut guard = self.lock();
        self.clean(&mut guard);

        let task = guard
            .store
            .get_mut(key)
            .ok_or_else(|| CoordinatorError::UnknownKey(key.clone()))?;
        if task.is_finished() {
            return Err(CoordinatorError::AlreadyFinished(key.clone()));
        }

        self.sink
            .persist(key, submission)
            .map_err(|source| CoordinatorError::Persist {
                key: key.clone(),
                source,
            })?;
        task.finish(self.clock.now());

        info!("tarea {} terminada", key);
        Ok(())
    }

    /// Foto consistente del estado; no libera leases ni muta nada.
    ///
    /// Un lease vencido se cuenta como lo dejaría `clean()`: la tarea ya
    /// no está en progreso aunque nadie la haya liberado todavía.
    pub fn status(&self) -> StatusReport {
        let guard = self.lock();
        let depth = self.config.status_depth;
        let now = self.clock.now();

        let mut totals = StateCounts::default();
        let mut groups: BTreeMap<Vec<KeyPart>, StateCounts> = BTreeMap::new();
        let mut finish_times = Vec::new();
        let mut unfinished = 0usize;

        for (key, task) in guard.store.iter() {
            let counts = groups.entry(key.prefix(depth)).or_default();
            for c in [&mut totals, counts] {
                if task.is_finished() {
                    c.finished += 1;
                } else if task.failed() {
                    c.failed += 1;
                } else if task.in_progress() && !is_stale(task, now, self.config.lease_timeout) {
                    c.in_progress += 1;
                } else {
                    c.waiting += 1;
                }
            }
            match task.finish_time() {
                Some(t) => finish_times.push(t.timestamp_millis() as f64 / 1000.0),
                None => unfinished += 1,
            }
        }
        drop(guard);

        let eta = progress::estimate_remaining(&finish_times, unfinished);

        StatusReport {
            totals,
            eta: eta.to_string(),
            eta_secs: eta.secs(),
            groups: groups
                .into_iter()
                .map(|(group, counts)| GroupStatus { group, counts })
                .collect(),
        }
    }

    pub fn lease_timeout(&self) -> Duration {
        self.config.lease_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::ManualClock;
    use crate::results::MemorySink;
    use serde_json::json;
    use std::collections::HashSet;

    fn key(name: &str) -> TaskKey {
        TaskKey::new(vec![KeyPart::from("svm"), KeyPart::from(name), KeyPart::Int(0)])
    }

    fn submission() -> Submission {
        Submission {
            stats: Some(json!({"time": 2.0})),
            predictions: json!({"1": 0.5}),
        }
    }

    struct Fixture {
        coord: Coordinator,
        clock: Arc<ManualClock>,
        sink: Arc<MemorySink>,
    }

    fn fixture(names: &[&str], seed: u64) -> Fixture {
        let mut store = TaskStore::new();
        for n in names {
            store
                .insert(key(n), TaskRecord::new(json!({ "name": n }), None))
                .unwrap();
        }
        let clock = Arc::new(ManualClock::at(1_000));
        let sink = Arc::new(MemorySink::default());
        let config = CoordinatorConfig {
            seed: Some(seed),
            ..Default::default()
        };
        let coord = Coordinator::new(store, sink.clone(), clock.clone(), config);
        Fixture { coord, clock, sink }
    }

    fn snapshot(coord: &Coordinator, k: &TaskKey) -> TaskRecord {
        coord.lock().store.get(k).unwrap().clone()
    }

    #[test]
    fn request_prefiere_libre_sobre_fallida_y_en_progreso() {
        for seed in 0..20 {
            let f = fixture(&["w", "f", "l"], seed);
            f.coord.mark_failed(&key("f")).unwrap();
            f.coord.heartbeat(&key("l")).unwrap();

            let got = f.coord.request_task(None).unwrap();
            assert_eq!(got.key, key("w"), "seed {seed}");
        }
    }

    #[test]
    fn fallida_libre_antes_que_en_progreso() {
        let f = fixture(&["f", "l"], 7);
        f.coord.mark_failed(&key("f")).unwrap();
        f.coord.heartbeat(&key("l")).unwrap();

        assert_eq!(f.coord.request_task(None).unwrap().key, key("f"));
        // ahora ambas están en progreso; "l" (1000) gana a "f" (1100)
        assert_eq!(f.coord.request_task(None).unwrap().key, key("l"));
    }

    #[test]
    fn empates_se_rompen_al_azar() {
        let mut seen = HashSet::new();
        for seed in 0..64 {
            let f = fixture(&["a", "b", "c"], seed);
            seen.insert(f.coord.request_task(None).unwrap().key);
        }
        assert_eq!(seen.len(), 3, "todas las empatadas deberían salir alguna vez");
    }

    #[test]
    fn misma_semilla_misma_eleccion() {
        let a = fixture(&["a", "b", "c", "d"], 42);
        let b = fixture(&["a", "b", "c", "d"], 42);
        for _ in 0..4 {
            assert_eq!(
                a.coord.request_task(None).unwrap().key,
                b.coord.request_task(None).unwrap().key
            );
        }
    }

    #[test]
    fn request_devuelve_params_y_payload() {
        let mut store = TaskStore::new();
        store
            .insert(
                key("a"),
                TaskRecord::new(json!({"C": 10}), Some(json!([[0, "bag1", 1]]))),
            )
            .unwrap();
        let coord = Coordinator::new(
            store,
            Arc::new(MemorySink::default()),
            Arc::new(ManualClock::at(0)),
            CoordinatorConfig::default(),
        );

        let got = coord.request_task(Some("host-1")).unwrap();
        assert_eq!(got.params, json!({"C": 10}));
        assert_eq!(got.payload, Some(json!([[0, "bag1", 1]])));
        assert!(snapshot(&coord, &key("a")).in_progress());
    }

    #[test]
    fn pool_vacio_da_not_found() {
        let f = fixture(&[], 1);
        assert!(matches!(
            f.coord.request_task(None),
            Err(CoordinatorError::NotFound)
        ));

        let f = fixture(&["a"], 1);
        f.coord.request_task(None).unwrap();
        f.coord.submit(&key("a"), &submission()).unwrap();
        assert!(matches!(
            f.coord.request_task(None),
            Err(CoordinatorError::NotFound)
        ));
    }

    #[test]
    fn flujo_completo_con_tres_tareas() {
        let f = fixture(&["a", "b", "c"], 3);

        let first = f.coord.request_task(None).unwrap().key;
        f.coord.heartbeat(&first).unwrap();
        f.coord.submit(&first, &submission()).unwrap();

        let t = snapshot(&f.coord, &first);
        assert!(t.is_finished());
        assert!(t.finish_time().is_some());

        assert!(matches!(
            f.coord.submit(&first, &submission()),
            Err(CoordinatorError::AlreadyFinished(_))
        ));
        assert_eq!(f.sink.saved().len(), 1);

        for _ in 0..2 {
            let next = f.coord.request_task(None).unwrap().key;
            assert_ne!(next, first);
        }
    }

    #[test]
    fn submit_tras_terminar_no_muta_nada() {
        let f = fixture(&["a"], 1);
        f.coord.submit(&key("a"), &submission()).unwrap();
        let before = snapshot(&f.coord, &key("a")).finish_time();

        f.clock.advance(60);
        for _ in 0..3 {
            assert!(matches!(
                f.coord.submit(&key("a"), &submission()),
                Err(CoordinatorError::AlreadyFinished(_))
            ));
        }
        assert!(matches!(
            f.coord.heartbeat(&key("a")),
            Err(CoordinatorError::AlreadyFinished(_))
        ));
        assert!(matches!(
            f.coord.release(&key("a")),
            Err(CoordinatorError::AlreadyFinished(_))
        ));
        assert!(matches!(
            f.coord.mark_failed(&key("a")),
            Err(CoordinatorError::AlreadyFinished(_))
        ));

        let after = snapshot(&f.coord, &key("a"));
        assert!(after.is_finished());
        assert_eq!(after.finish_time(), before);
        assert_eq!(f.sink.saved().len(), 1);
    }

    #[test]
    fn clave_desconocida() {
        let f = fixture(&["a"], 1);
        let unknown = key("zzz");
        assert!(matches!(
            f.coord.heartbeat(&unknown),
            Err(CoordinatorError::UnknownKey(_))
        ));
        assert!(matches!(
            f.coord.release(&unknown),
            Err(CoordinatorError::UnknownKey(_))
        ));
        assert!(matches!(
            f.coord.mark_failed(&unknown),
            Err(CoordinatorError::UnknownKey(_))
        ));
        assert!(matches!(
            f.coord.submit(&unknown, &submission()),
            Err(CoordinatorError::UnknownKey(_))
        ));
    }

    #[test]
    fn lease_vencido_se_reasigna() {
        let f = fixture(&["a"], 1);
        let leased = f.coord.request_task(Some("w1")).unwrap().key;

        f.clock.advance(f.coord.lease_timeout().num_seconds() + 1);

        let again = f.coord.request_task(Some("w2")).unwrap().key;
        assert_eq!(again, leased);
        let t = snapshot(&f.coord, &leased);
        assert!(t.in_progress());
        assert_eq!(t.last_checkin(), Some(f.clock.now()));
    }

    #[test]
    fn lease_vencido_conserva_failed() {
        let f = fixture(&["a", "b"], 1);
        // "a" falla, se vuelve a tomar y su worker muere
        f.coord.mark_failed(&key("a")).unwrap();
        f.coord.heartbeat(&key("a")).unwrap();
        f.coord.heartbeat(&key("b")).unwrap();

        f.clock.advance(121);
        f.coord.heartbeat(&key("b")).unwrap(); // dispara clean()

        let a = snapshot(&f.coord, &key("a"));
        assert!(!a.in_progress());
        assert!(a.failed());
        assert!(a.last_checkin().is_none());
        assert_eq!(f.coord.request_task(None).unwrap().key, key("a"));
    }

    #[test]
    fn lease_con_heartbeats_no_vence() {
        let f = fixture(&["a", "b"], 1);
        let leased = f.coord.request_task(None).unwrap().key;
        for _ in 0..5 {
            f.clock.advance(100);
            f.coord.heartbeat(&leased).unwrap();
        }
        let other = f.coord.request_task(None).unwrap().key;
        assert_ne!(other, leased);
    }

    #[test]
    fn heartbeat_tardio_recupera_el_lease() {
        let f = fixture(&["a"], 1);
        f.coord.request_task(None).unwrap();
        f.clock.advance(500);
        f.coord.heartbeat(&key("a")).unwrap();
        assert!(snapshot(&f.coord, &key("a")).in_progress());
    }

    #[test]
    fn release_no_toca_failed() {
        let f = fixture(&["a"], 1);
        f.coord.mark_failed(&key("a")).unwrap();
        f.coord.heartbeat(&key("a")).unwrap();
        f.coord.release(&key("a")).unwrap();
        f.coord.release(&key("a")).unwrap();

        let t = snapshot(&f.coord, &key("a"));
        assert!(t.failed());
        assert!(!t.in_progress());
    }

    #[test]
    fn fallo_al_guardar_deja_la_tarea_igual() {
        let f = fixture(&["a"], 1);
        f.coord.request_task(None).unwrap();
        f.sink.set_failing(true);

        assert!(matches!(
            f.coord.submit(&key("a"), &submission()),
            Err(CoordinatorError::Persist { .. })
        ));
        let t = snapshot(&f.coord, &key("a"));
        assert!(!t.is_finished());
        assert!(t.in_progress());

        f.sink.set_failing(false);
        f.coord.submit(&key("a"), &submission()).unwrap();
        assert!(snapshot(&f.coord, &key("a")).is_finished());
    }

    #[test]
    fn tareas_terminadas_al_arrancar_no_se_despachan() {
        let sink = Arc::new(MemorySink::default());
        sink.preload(key("a"));
        let clock = Arc::new(ManualClock::at(0));

        let mut store = TaskStore::new();
        store.insert(key("a"), TaskRecord::new(json!({}), None)).unwrap();
        store.insert(key("b"), TaskRecord::new(json!({}), None)).unwrap();
        store.mark_completed(sink.as_ref(), clock.now());

        let coord = Coordinator::new(store, sink, clock, CoordinatorConfig::default());
        assert_eq!(coord.request_task(None).unwrap().key, key("b"));
        assert!(matches!(
            coord.submit(&key("a"), &submission()),
            Err(CoordinatorError::AlreadyFinished(_))
        ));
    }

    #[test]
    fn status_agrupa_y_estima() {
        let mut store = TaskStore::new();
        for (i, ds) in ["d1", "d1", "d2", "d2", "d2"].iter().enumerate() {
            let k = TaskKey::new(vec![
                KeyPart::from("svm"),
                KeyPart::from(*ds),
                KeyPart::from("rbf"),
                KeyPart::Int(i as i64),
            ]);
            store.insert(k, TaskRecord::new(json!({}), None)).unwrap();
        }
        let clock = Arc::new(ManualClock::at(0));
        let coord = Coordinator::new(
            store,
            Arc::new(MemorySink::default()),
            clock.clone(),
            CoordinatorConfig {
                seed: Some(9),
                ..Default::default()
            },
        );

        let report = coord.status();
        assert_eq!(report.eta, "unknown");
        assert_eq!(report.totals.waiting, 5);
        assert_eq!(report.groups.len(), 2);

        // dos terminadas con 10s de diferencia: ewma = 1.0, quedan 3
        for _ in 0..2 {
            let t = coord.request_task(None).unwrap();
            coord.submit(&t.key, &submission()).unwrap();
            clock.advance(10);
        }
        let t = coord.request_task(None).unwrap();
        coord.mark_failed(&t.key).unwrap();
        coord.request_task(None).unwrap();

        let report = coord.status();
        assert_eq!(report.totals.finished, 2);
        assert_eq!(report.totals.failed, 1);
        assert_eq!(report.totals.in_progress, 1);
        assert_eq!(report.totals.waiting, 1);
        assert!((report.eta_secs.unwrap() - 3.0).abs() < 1e-9);
        assert_eq!(report.eta, "3.0 seconds");

        let per_group: u64 = report.groups.iter().map(|g| g.counts.total()).sum();
        assert_eq!(per_group, 5);
    }

    #[test]
    fn status_no_cuenta_leases_vencidos_como_en_progreso() {
        let f = fixture(&["a", "b"], 1);
        let first = f.coord.request_task(None).unwrap();
        f.clock.advance(3600);

        let report = f.coord.status();
        assert_eq!(report.totals.in_progress, 0);
        assert_eq!(report.totals.waiting, 2);
        // la foto no muta: el lease sigue tomado hasta la próxima llamada de un worker
        assert!(snapshot(&f.coord, &first.key).in_progress());
    }

    #[test]
    fn status_cuenta_lease_vencido_y_fallido_como_fallida() {
        let f = fixture(&["a"], 1);
        f.coord.request_task(None).unwrap();
        f.coord.mark_failed(&key("a")).unwrap();
        f.coord.request_task(None).unwrap();
        f.clock.advance(3600);

        let report = f.coord.status();
        assert_eq!(report.totals.in_progress, 0);
        assert_eq!(report.totals.failed, 1);
    }

    #[test]
    fn status_respeta_leases_vigentes() {
        let f = fixture(&["a"], 1);
        f.coord.request_task(None).unwrap();
        f.clock.advance(60);

        assert_eq!(f.coord.status().totals.in_progress, 1);
    }

    #[test]
    fn acceso_concurrente_entrega_cada_tarea_una_vez() {
        let names: Vec<String> = (0..50).map(|i| format!("t{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let f = fixture(&refs, 5);
        let coord = Arc::new(f.coord);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let coord = Arc::clone(&coord);
                std::thread::spawn(move || {
                    let mut got = Vec::new();
                    while let Ok(t) = coord.request_task(None) {
                        if coord.submit(&t.key, &submission()).is_ok() {
                            got.push(t.key);
                        }
                    }
                    got
                })
            })
            .collect();

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.join().unwrap());
        }
        let unique: HashSet<_> = all.iter().cloned().collect();
        assert_eq!(all.len(), 50);
        assert_eq!(unique.len(), 50);
        assert_eq!(f.sink.saved().len(), 50);
    }
}
