use serde::Serialize;

/// Estado visible del motor; se actualiza en cada ciclo y lo lee la interfaz.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStatus {
    pub last_error: Option<String>,
    pub reconnect_requested: bool,
    /// Hash del snapshot con el que corre el Runner activo.
    pub config_hash: Option<String>,
}
