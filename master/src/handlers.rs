use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use sweep_common::{KeyRequest, StatusReport, SubmitRequest, TaskAssignment, TaskRequest};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::coordinator::Coordinator;
use crate::error::CoordinatorError;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/status", get(status))
        .route("/api/v1/tasks/request", post(request_task))
        .route("/api/v1/tasks/heartbeat", post(heartbeat))
        .route("/api/v1/tasks/release", post(release))
        .route("/api/v1/tasks/fail", post(fail))
        .route("/api/v1/tasks/submit", post(submit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- errores HTTP ---------------- */

#[derive(Debug)]
pub enum ApiError {
    Coordinator(CoordinatorError),
    /// El cuerpo no se pudo decodificar; no hubo cambio de estado.
    Malformed(String),
    Internal(String),
}

impl From<CoordinatorError> for ApiError {
    fn from(e: CoordinatorError) -> Self {
        ApiError::Coordinator(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, msg) = match self {
            ApiError::Coordinator(e) => {
                let code = match &e {
                    CoordinatorError::UnknownKey(_) | CoordinatorError::NotFound => {
                        StatusCode::NOT_FOUND
                    }
                    CoordinatorError::AlreadyFinished(_) => StatusCode::GONE,
                    CoordinatorError::Persist { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (code, e.to_string())
            }
            ApiError::Malformed(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (code, msg).into_response()
    }
}

// Decodificamos a mano (y no con el extractor Json) para que cualquier
// cuerpo inválido sea un 400.
fn decode<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        warn!("cuerpo inválido: {}", e);
        ApiError::Malformed(format!("malformed request: {e}"))
    })
}

// Todo acceso al coordinador va a un hilo bloqueante: su lock puede quedar
// tomado mientras `submit` escribe a disco, y el runtime async no debe esperar.
async fn with_coordinator<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Coordinator) -> T + Send + 'static,
    T: Send + 'static,
{
    let coordinator = state.coordinator.clone();
    tokio::task::spawn_blocking(move || f(&coordinator))
        .await
        .map_err(|e| ApiError::Internal(format!("operación abortada: {e}")))
}

fn rejected(op: &str, e: CoordinatorError) -> ApiError {
    warn!("{} rechazado: {}", op, e);
    e.into()
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusReport>, ApiError> {
    with_coordinator(&state, |c| c.status()).await.map(Json)
}

// Entrega la tarea más elegible (404 si no queda ninguna)
async fn request_task(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<TaskAssignment>, ApiError> {
    let req: TaskRequest = if body.iter().all(u8::is_ascii_whitespace) {
        TaskRequest::default()
    } else {
        decode(&body)?
    };

    let worker = req.worker.clone();
    match with_coordinator(&state, move |c| c.request_task(worker.as_deref())).await? {
        Ok(assignment) => Ok(Json(assignment)),
        Err(CoordinatorError::NotFound) => {
            info!(
                "{} pidió tarea pero no hay tareas pendientes",
                req.worker.as_deref().unwrap_or("worker anónimo")
            );
            Err(CoordinatorError::NotFound.into())
        }
        Err(e) => Err(rejected("request", e)),
    }
}

async fn heartbeat(State(state): State<AppState>, body: Bytes) -> Result<&'static str, ApiError> {
    let req: KeyRequest = decode(&body)?;
    with_coordinator(&state, move |c| c.heartbeat(&req.key))
        .await?
        .map_err(|e| rejected("heartbeat", e))?;
    Ok("OK")
}

async fn release(State(state): State<AppState>, body: Bytes) -> Result<&'static str, ApiError> {
    let req: KeyRequest = decode(&body)?;
    with_coordinator(&state, move |c| c.release(&req.key))
        .await?
        .map_err(|e| rejected("release", e))?;
    Ok("OK")
}

async fn fail(State(state): State<AppState>, body: Bytes) -> Result<&'static str, ApiError> {
    let req: KeyRequest = decode(&body)?;
    with_coordinator(&state, move |c| c.mark_failed(&req.key))
        .await?
        .map_err(|e| rejected("fail", e))?;
    Ok("OK")
}

async fn submit(State(state): State<AppState>, body: Bytes) -> Result<&'static str, ApiError> {
    let req: SubmitRequest = decode(&body)?;
    with_coordinator(&state, move |c| c.submit(&req.key, &req.result))
        .await?
        .map_err(|e| rejected("submit", e))?;
    Ok("OK")
}
