use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::application::dto::{ObjectPhoto, ObjectResponse, SettingsPayload, StatusResponse};
use crate::domain::settings::Receiver;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("URL de la API inválida: {0}")]
    InvalidUrl(String),
    #[error("No se pudo contactar con la API: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{0}")]
    NotFound(String),
    #[error("La API respondió {status}: {message}")]
    Rejected { status: u16, message: String },
}

/// Cliente de las rutas `/objects`, `/object/{name}`, `/settings` y `/api/status`.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base: Url,
    http: Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let base = Url::parse(base_url).map_err(|e| ApiError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self { base, http: Client::new() })
    }

    /// Los segmentos se codifican (`traffic light` → `traffic%20light`).
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub async fn status(&self) -> Result<StatusResponse, ApiError> {
        self.get_json(&["api", "status"]).await
    }

    /// Foto del último instante con todas sus cajas.
    pub async fn objects(&self) -> Result<ObjectPhoto, ApiError> {
        self.get_json(&["objects"]).await
    }

    pub async fn object(&self, name: &str) -> Result<ObjectResponse, ApiError> {
        self.get_json(&["object", name]).await
    }

    pub async fn settings(&self, receiver: Receiver) -> Result<SettingsPayload, ApiError> {
        self.get_json(&["settings", receiver.as_str()]).await
    }

    pub async fn update_settings(&self, payload: &SettingsPayload) -> Result<(), ApiError> {
        let url = self.endpoint(&["settings"])?;
        tracing::trace!(%url, "POST");
        check(self.http.post(url).json(payload).send().await?).await?;
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ApiError> {
        let url = self.endpoint(segments)?;
        tracing::trace!(%url, "GET");
        let response = check(self.http.get(url).send().await?).await?;
        Ok(response.json().await?)
    }
}

/// Convierte una respuesta no 2xx en error, usando el campo `error` del cuerpo si lo hay.
async fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|body| body.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());

    if status == StatusCode::NOT_FOUND {
        Err(ApiError::NotFound(message))
    } else {
        Err(ApiError::Rejected { status: status.as_u16(), message })
    }
}
