use serde::{Deserialize, Serialize};

use crate::domain::{
    detection::{Container, DetectionRecord},
    settings::Receiver,
    status::EngineStatus,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingEntry {
    pub key: String,
    pub value: String,
}

impl From<(String, String)> for SettingEntry {
    fn from((key, value): (String, String)) -> Self {
        Self { key, value }
    }
}

/// Cuerpo de `POST /settings` y respuesta de `GET /settings/{receiver}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsPayload {
    pub receiver: Receiver,
    pub settings: Vec<SettingEntry>,
}

impl SettingsPayload {
    pub fn into_pairs(self) -> Vec<(String, String)> {
        self.settings.into_iter().map(|e| (e.key, e.value)).collect()
    }
}

/// Foto JPEG en base64 con sus dimensiones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectPhoto {
    pub height: u32,
    pub width: u32,
    pub image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectResponse {
    pub photo: ObjectPhoto,
    pub record: DetectionRecord,
    pub container: Option<Container>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Raw,
    #[default]
    Boxed,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FrameQuery {
    #[serde(default)]
    pub kind: FrameKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub error: Option<String>,
    pub reconnect_requested: bool,
    pub config_hash: Option<String>,
    pub pending_records: usize,
}

impl StatusResponse {
    pub fn new(status: EngineStatus, pending_records: usize) -> Self {
        Self {
            error: status.last_error,
            reconnect_requested: status.reconnect_requested,
            config_hash: status.config_hash,
            pending_records,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}
