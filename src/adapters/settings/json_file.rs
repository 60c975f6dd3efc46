use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::application::ports::{SettingsSource, SettingsStorePort};
use crate::domain::errors::{DomainResult, PipelineError};
use crate::domain::settings::{Receiver, SettingsMap};

/// Fichero JSON plano clave → valor (`camera_settings.json`, `model_settings.json`).
///
/// Los números y booleanos se leen como texto, `null` cuenta como ausente y
/// cualquier valor anidado invalida el fichero.
pub struct JsonSettingsFile {
    path: PathBuf,
    receiver: Receiver,
    write_lock: Mutex<()>,
}

impl JsonSettingsFile {
    pub fn new(path: impl Into<PathBuf>, receiver: Receiver) -> Self {
        Self { path: path.into(), receiver, write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn field(&self) -> String {
        self.path.display().to_string()
    }

    fn parse(&self, text: &str) -> DomainResult<Map<String, Value>> {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(PipelineError::config(self.field(), "se esperaba un objeto JSON")),
            Err(e) => Err(PipelineError::config(self.field(), e.to_string())),
        }
    }

    fn flatten(&self, map: Map<String, Value>) -> DomainResult<Vec<(String, String)>> {
        let mut out = Vec::with_capacity(map.len());
        for (key, value) in map {
            let text = match value {
                Value::Null => continue,
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Array(_) | Value::Object(_) => {
                    return Err(PipelineError::config(key, "valor anidado no soportado"));
                }
            };
            out.push((key, text));
        }
        Ok(out)
    }
}

impl SettingsSource for JsonSettingsFile {
    fn read(&self) -> DomainResult<SettingsMap> {
        let text = std::fs::read_to_string(&self.path)
            .map_err(|e| PipelineError::config(self.field(), e.to_string()))?;
        let map = self.parse(&text)?;
        Ok(self.flatten(map)?.into_iter().collect())
    }
}

#[async_trait]
impl SettingsStorePort for JsonSettingsFile {
    fn receiver(&self) -> Receiver {
        self.receiver
    }

    async fn load(&self) -> DomainResult<Vec<(String, String)>> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| PipelineError::config(self.field(), e.to_string()))?;
        self.flatten(self.parse(&text)?)
    }

    async fn update(&self, values: Vec<(String, String)>) -> DomainResult<()> {
        let _guard = self.write_lock.lock().await;

        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| PipelineError::config(self.field(), e.to_string()))?;
        let mut map = self.parse(&text)?;

        // Todo o nada: una clave desconocida rechaza la petición entera.
        if let Some((key, _)) = values.iter().find(|(k, _)| !map.contains_key(k)) {
            return Err(PipelineError::InvalidInput(format!(
                "clave desconocida '{key}' para {}",
                self.receiver.as_str()
            )));
        }
        for (key, value) in values {
            map.insert(key, Value::String(value));
        }

        let body = serde_json::to_vec_pretty(&Value::Object(map))
            .map_err(|e| PipelineError::PersistFailure(e.to_string()))?;
        write_atomically(&self.path, &body).await
    }
}

async fn write_atomically(path: &Path, body: &[u8]) -> DomainResult<()> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body)
        .await
        .map_err(|e| PipelineError::PersistFailure(e.to_string()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| PipelineError::PersistFailure(e.to_string()))
}

pub fn default_settings(receiver: Receiver) -> Value {
    match receiver {
        Receiver::Camera => serde_json::json!({
            "ip": "",
            "port": "554",
            "login": "",
            "password": "",
            "rtsp_url": ""
        }),
        Receiver::Model => serde_json::json!({
            "object_count": "10",
            "fps": "10",
            "threshold": "0.5",
            "save_folder": "camera"
        }),
    }
}

/// Crea el fichero con los valores por defecto si no existe. Devuelve `true` si lo creó.
pub fn ensure_defaults(path: &Path, receiver: Receiver) -> std::io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_vec_pretty(&default_settings(receiver))?;
    std::fs::write(path, body)?;
    Ok(true)
}
