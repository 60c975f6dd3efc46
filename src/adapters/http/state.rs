use std::sync::Arc;
use crate::application::services::{PipelineService, RecordService, SettingsService};

/// Estado compartido para los manejadores HTTP de Axum.
/// Siguiendo la Arquitectura Hexagonal, el estado contiene los servicios (Casos de Uso).
#[derive(Clone)]
pub struct HttpState {
    /// Estado del motor, último frame, reconexión y canal de difusión.
    pub pipeline: Arc<PipelineService>,
    /// Lectura/escritura de los ficheros de ajustes.
    pub settings: Arc<SettingsService>,
    /// Consultas al almacén de detecciones.
    pub records: Arc<RecordService>,
}
