use anyhow::Result;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use sweep_common::{KeyRequest, Submission, SubmitRequest, TaskAssignment, TaskKey, TaskRequest};

/// Respuesta del master a heartbeat / release / fail / submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Ok,
    /// 404: la clave no existe en el sweep.
    UnknownKey,
    /// 410: otro worker ya terminó la tarea; hay que abandonarla.
    Gone,
    Rejected(StatusCode),
}

impl From<StatusCode> for Ack {
    fn from(code: StatusCode) -> Self {
        match code {
            StatusCode::OK => Ack::Ok,
            StatusCode::NOT_FOUND => Ack::UnknownKey,
            StatusCode::GONE => Ack::Gone,
            other => Ack::Rejected(other),
        }
    }
}

/// Cliente HTTP del master.
#[derive(Debug, Clone)]
pub struct MasterClient {
    http: Client,
    base_url: String,
}

impl MasterClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, route: &str) -> String {
        format!("{}/api/v1/tasks/{}", self.base_url, route)
    }

    /// `Ok(None)` si no hay tareas pendientes (404).
    pub async fn request_task(&self, worker: &str) -> Result<Option<TaskAssignment>> {
        let resp = self
            .http
            .post(self.url("request"))
            .json(&TaskRequest {
                worker: Some(worker.to_string()),
            })
            .send()
            .await?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            code if code.is_success() => Ok(Some(resp.json().await?)),
            code => anyhow::bail!("master respondió {} al pedir tarea", code),
        }
    }

    async fn post<T: Serialize>(&self, route: &str, body: &T) -> Result<Ack> {
        let resp = self.http.post(self.url(route)).json(body).send().await?;
        Ok(resp.status().into())
    }

    pub async fn heartbeat(&self, key: &TaskKey) -> Result<Ack> {
        self.post("heartbeat", &KeyRequest { key: key.clone() }).await
    }

    pub async fn release(&self, key: &TaskKey) -> Result<Ack> {
        self.post("release", &KeyRequest { key: key.clone() }).await
    }

    pub async fn fail(&self, key: &TaskKey) -> Result<Ack> {
        self.post("fail", &KeyRequest { key: key.clone() }).await
    }

    pub async fn submit(&self, key: &TaskKey, result: &Submission) -> Result<Ack> {
        let body = SubmitRequest {
            key: key.clone(),
            result: result.clone(),
        };
        self.post("submit", &body).await
    }
}
