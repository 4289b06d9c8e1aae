use std::{
    fs,
    path::{Path, PathBuf},
};

use sweep_common::{Submission, TaskKey};
use tracing::debug;

use crate::error::ResultStoreError;

/// Destino de los resultados enviados por los workers.
///
/// `persist` se llama con el lock del coordinador tomado, justo antes de
/// marcar la tarea como terminada.
pub trait ResultSink: Send + Sync {
    fn persist(&self, key: &TaskKey, submission: &Submission) -> Result<(), ResultStoreError>;

    /// ¿Ya hay un resultado guardado para esta clave?
    fn is_complete(&self, key: &TaskKey) -> bool;
}

/// Guarda `<filebase>.stats` y `<filebase>.preds` en YAML dentro de un directorio.
/// La existencia del `.preds` es lo que marca la tarea como completa.
#[derive(Debug, Clone)]
pub struct FsResultStore {
    dir: PathBuf,
}

impl FsResultStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, ResultStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| ResultStoreError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn preds_path(&self, key: &TaskKey) -> PathBuf {
        self.dir.join(key.filebase("preds"))
    }

    pub fn stats_path(&self, key: &TaskKey) -> PathBuf {
        self.dir.join(key.filebase("stats"))
    }

    // escribe a un temporal y renombra, para no dejar archivos a medias
    fn write_yaml(&self, path: &Path, value: &serde_json::Value) -> Result<(), ResultStoreError> {
        let body = serde_yaml::to_string(value)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, body).map_err(|source| ResultStoreError::Io {
            path: tmp.display().to_string(),
            source,
        })?;
        fs::rename(&tmp, path).map_err(|source| ResultStoreError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

impl ResultSink for FsResultStore {
    fn persist(&self, key: &TaskKey, submission: &Submission) -> Result<(), ResultStoreError> {
        if let Some(stats) = &submission.stats {
            self.write_yaml(&self.stats_path(key), stats)?;
        }
        // preds al final: su presencia significa "terminada"
        let preds = self.preds_path(key);
        self.write_yaml(&preds, &submission.predictions)?;
        debug!("resultado de {} guardado en {}", key, preds.display());
        Ok(())
    }

    fn is_complete(&self, key: &TaskKey) -> bool {
        self.preds_path(key).is_file()
    }
}

#[cfg(test)]
pub use memory::MemorySink;
