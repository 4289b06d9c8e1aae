use sweep_common::TaskKey;
use thiserror::Error;

/// Errores de las operaciones del coordinador.
///
/// Ninguno es fatal: cada operación se aplica completa o no cambia nada.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// La clave no pertenece al sweep configurado.
    #[error("unknown task key {0}")]
    UnknownKey(TaskKey),

    /// Otro worker ya terminó esta tarea.
    #[error("task {0} already finished")]
    AlreadyFinished(TaskKey),

    /// No hay tareas pendientes en este momento.
    #[error("no unfinished tasks")]
    NotFound,

    /// No se pudo guardar el resultado; la tarea queda como estaba.
    #[error("could not persist result for {key}: {source}")]
    Persist {
        key: TaskKey,
        #[source]
        source: ResultStoreError,
    },
}

#[derive(Error, Debug)]
pub enum ResultStoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),
}

/// Una clave aparece dos veces al construir el TaskStore.
#[derive(Error, Debug)]
#[error("duplicate task key {0}")]
pub struct DuplicateKey(pub TaskKey);

pub type Result<T> = std::result::Result<T, CoordinatorError>;
